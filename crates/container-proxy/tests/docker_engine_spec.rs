#![cfg(unix)]

use std::os::unix::fs::MetadataExt;
use std::process::Command as HostCommand;
use std::sync::Arc;

use anyhow::Result;
use container_proxy::{
    ArgumentList, BuildContext, Command, CommandRunner, DirectRunner, NamedImage, OutputMode,
    ProxyingRunner, RuntimeSettings, StdinSource, TeardownOutcome,
};
use tempfile::TempDir;

fn docker_available() -> bool {
    HostCommand::new("docker")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

#[test]
fn proxied_commands_write_workspace_files_as_the_caller() -> Result<()> {
    // Gate on docker availability
    if !docker_available() {
        return Ok(());
    }

    let workspace = TempDir::new()?;
    let workspace_dir = std::fs::canonicalize(workspace.path())?;
    let runner = ProxyingRunner::new(
        Arc::new(DirectRunner::new()),
        RuntimeSettings {
            exec_tty: false,
            ..RuntimeSettings::default()
        },
        Arc::new(NamedImage::new("alpine:3.20")),
        BuildContext::new("docker-spec", &workspace_dir),
    );

    let outcome = runner.launch(
        &Command::new(ArgumentList::plain(["sh", "-c", "pwd > where.txt"]))
            .stdin(StdinSource::Null)
            .stdout(OutputMode::Capture)
            .stderr(OutputMode::Capture),
    );
    let container = runner.context().container().cloned();
    let teardown = runner.teardown();

    let outcome = outcome?;
    assert!(outcome.success(), "exec failed: {:?}", outcome);

    let written = workspace_dir.join("where.txt");
    let contents = std::fs::read_to_string(&written)?;
    assert_eq!(contents.trim(), workspace_dir.to_str().unwrap());

    let host_uid = std::fs::metadata(&workspace_dir)?.uid();
    assert_eq!(std::fs::metadata(&written)?.uid(), host_uid);

    assert!(matches!(teardown, TeardownOutcome::Removed { removed: true, .. }));
    let container = container.expect("container was started");
    let gone = HostCommand::new("docker")
        .args(["inspect", container.as_str()])
        .output()?;
    assert!(!gone.status.success());
    Ok(())
}
