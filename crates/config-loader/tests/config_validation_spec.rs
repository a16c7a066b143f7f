use config_loader::{ConfigError, ConfigManager, ProxyConfig, CONFIG_ENV};
use serial_test::serial;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

fn write_config(content: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.json");
    fs::write(&path, content).unwrap();
    (temp_dir, path)
}

fn clear_env() {
    for key in [
        CONFIG_ENV,
        "BUILDBOX_ENGINE",
        "BUILDBOX_EXEC_TTY",
        "BUILDBOX_TMPDIR",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
#[serial]
fn given_config_env_when_new_then_file_is_explicit() {
    clear_env();
    let (_temp_dir, path) = write_config(r#"{ "placeholder": "sleep infinity" }"#);
    std::env::set_var(CONFIG_ENV, &path);

    let manager = ConfigManager::new();
    assert_eq!(manager.config_path(), path.as_path());
    let config = manager.load().unwrap();
    assert_eq!(config.placeholder, "sleep infinity");

    fs::remove_file(&path).unwrap();
    assert!(matches!(
        ConfigManager::new().load(),
        Err(ConfigError::NotFound { .. })
    ));
    clear_env();
}

#[test]
#[serial]
fn given_engine_env_when_load_then_engine_overridden() {
    clear_env();
    let (_temp_dir, path) = write_config(r#"{ "engine": "docker", "execTty": true }"#);
    std::env::set_var("BUILDBOX_ENGINE", "podman");
    std::env::set_var("BUILDBOX_EXEC_TTY", "false");

    let config = ConfigManager::with_path(&path).load().unwrap();
    assert_eq!(config.engine, "podman");
    assert!(!config.exec_tty);
    clear_env();
}

#[test]
#[serial]
fn given_relative_tmpdir_env_when_load_then_invalid() {
    clear_env();
    let (_temp_dir, path) = write_config("{}");
    std::env::set_var("BUILDBOX_TMPDIR", "tmp");

    let result = ConfigManager::with_path(&path).load();
    assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    clear_env();
}

#[test]
fn given_malformed_json_when_load_then_parse_error() {
    let (_temp_dir, path) = write_config("{ not json");
    let result = ConfigManager::with_path(&path).load_with_env(|_| None);
    assert!(matches!(result, Err(ConfigError::Parse { .. })));
}

#[test]
fn defaults_round_trip_through_json() {
    let json = serde_json::to_string(&ProxyConfig::default()).unwrap();
    assert!(json.contains("\"execTty\":true"));
}
