use anyhow::Result;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::process::Command;
use tempfile::TempDir;

#[test]
fn version_prints_package_version() -> Result<()> {
    Command::cargo_bin("buildboxctl")?
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
    Ok(())
}

#[test]
fn run_requires_an_image_source() -> Result<()> {
    Command::cargo_bin("buildboxctl")?
        .args(["run", "--", "make"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--image"));
    Ok(())
}

#[test]
fn run_rejects_invalid_env_names() -> Result<()> {
    Command::cargo_bin("buildboxctl")?
        .args(["run", "--image", "alpine:3.20", "--env", "1BAD=x", "--", "make"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid environment variable name"));
    Ok(())
}

#[test]
fn run_rejects_out_of_range_mask() -> Result<()> {
    Command::cargo_bin("buildboxctl")?
        .args(["run", "--image", "alpine:3.20", "--mask", "4", "--", "make"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("out of range"));
    Ok(())
}

#[test]
fn steps_rejects_file_with_both_sources() -> Result<()> {
    let temp = TempDir::new()?;
    let file = temp.path().join("build.yaml");
    fs::write(
        &file,
        "image: alpine:3.20\ndockerfile: .\nsteps:\n  - run: [make]\n",
    )?;

    Command::cargo_bin("buildboxctl")?
        .arg("steps")
        .arg(&file)
        .assert()
        .failure()
        .stderr(predicate::str::contains("not both"));
    Ok(())
}

#[test]
fn explicit_missing_config_fails_before_touching_the_engine() -> Result<()> {
    let temp = TempDir::new()?;
    let file = temp.path().join("build.yaml");
    fs::write(&file, "image: alpine:3.20\nsteps:\n  - run: [make]\n")?;

    Command::cargo_bin("buildboxctl")?
        .arg("steps")
        .arg(&file)
        .arg("--config")
        .arg(temp.path().join("missing.json"))
        .env("BUILDBOX_ENGINE", "/nonexistent/engine")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load config"));
    Ok(())
}

#[test]
fn missing_engine_binary_fails_the_step() -> Result<()> {
    let temp = TempDir::new()?;
    let file = temp.path().join("build.yaml");
    fs::write(&file, "image: alpine:3.20\nsteps:\n  - run: [make]\n")?;

    Command::cargo_bin("buildboxctl")?
        .current_dir(temp.path())
        .arg("steps")
        .arg(&file)
        .env_remove("BUILDBOX_CONFIG")
        .env("BUILDBOX_ENGINE", "/nonexistent/engine")
        .assert()
        .failure()
        .stderr(predicate::str::contains("/nonexistent/engine"));
    Ok(())
}
