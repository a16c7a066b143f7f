use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, instrument};

pub const CONFIG_ENV: &str = "BUILDBOX_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = ".buildbox/config.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {path}")]
    NotFound { path: String },

    #[error("IO error reading {path}: {message}")]
    Io { path: String, message: String },

    #[error("JSON parsing failed for {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

/// Settings for the container proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct ProxyConfig {
    pub engine: String,
    pub exec_tty: bool,
    pub tmp_dir: Option<PathBuf>,
    pub placeholder: String,
    pub labels: BTreeMap<String, String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            engine: "docker".to_string(),
            exec_tty: true,
            tmp_dir: None,
            placeholder: "cat".to_string(),
            labels: BTreeMap::new(),
        }
    }
}

impl ProxyConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.trim().is_empty() {
            return Err(invalid("engine cannot be empty"));
        }

        if self.placeholder.trim().is_empty() {
            return Err(invalid("placeholder command cannot be empty"));
        }

        if let Some(dir) = &self.tmp_dir {
            if !dir.is_absolute() {
                return Err(invalid(format!(
                    "tmpDir '{}' must be an absolute path",
                    dir.display()
                )));
            }
        }

        for key in self.labels.keys() {
            if key.trim().is_empty() || key.contains('=') {
                return Err(invalid(format!(
                    "label key '{}' must be non-empty and must not contain '='",
                    key
                )));
            }
        }

        Ok(())
    }

    /// Applies `BUILDBOX_*` overrides, reading variables through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(engine) = lookup("BUILDBOX_ENGINE").filter(|v| !v.trim().is_empty()) {
            self.engine = engine.trim().to_string();
        }

        if let Some(raw) = lookup("BUILDBOX_EXEC_TTY") {
            self.exec_tty = match raw.trim().to_ascii_lowercase().as_str() {
                "" | "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                other => {
                    return Err(invalid(format!(
                        "BUILDBOX_EXEC_TTY must be a boolean (found '{}')",
                        other
                    )))
                }
            };
        }

        if let Some(dir) = lookup("BUILDBOX_TMPDIR").filter(|v| !v.trim().is_empty()) {
            self.tmp_dir = Some(PathBuf::from(dir.trim()));
        }

        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        message: message.into(),
    }
}

/// Locates, reads and validates the proxy configuration.
pub struct ConfigManager {
    config_path: PathBuf,
    explicit: bool,
}

impl ConfigManager {
    /// Uses `BUILDBOX_CONFIG` when set, else `.buildbox/config.json`.
    pub fn new() -> Self {
        match std::env::var(CONFIG_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::with_path(path),
            _ => Self {
                config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
                explicit: false,
            },
        }
    }

    /// Uses `path`, which then has to exist.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: path.into(),
            explicit: true,
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Loads the file, applies process environment overrides, and validates.
    #[instrument(skip(self), fields(path = %self.config_path.display()))]
    pub fn load(&self) -> Result<ProxyConfig, ConfigError> {
        self.load_with_env(|key| std::env::var(key).ok())
    }

    pub fn load_with_env<F>(&self, lookup: F) -> Result<ProxyConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = self.load_file()?;
        config.apply_overrides(lookup)?;
        config.validate()?;
        debug!(engine = %config.engine, exec_tty = config.exec_tty, "loaded proxy config");
        Ok(config)
    }

    fn load_file(&self) -> Result<ProxyConfig, ConfigError> {
        let path = self.config_path.display().to_string();

        if !self.config_path.exists() {
            if self.explicit {
                return Err(ConfigError::NotFound { path });
            }
            debug!("Config file not found, using defaults");
            return Ok(ProxyConfig::default());
        }

        let content = fs::read_to_string(&self.config_path).map_err(|e| ConfigError::Io {
            path: path.clone(),
            message: e.to_string(),
        })?;

        serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
            path,
            message: e.to_string(),
        })
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}
