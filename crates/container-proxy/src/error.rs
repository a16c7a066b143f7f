use std::path::PathBuf;
use thiserror::Error;

/// Failures surfaced by the container proxy.
///
/// Expected absence (an image that is not present) and recoverable pull
/// failures are plain booleans on [`crate::RuntimeClient`] and never show up
/// here. Everything in this enum aborts the build step that owns the
/// execution context.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("Failed to build image '{tag}' from {}", context_dir.display())]
    BuildFailed {
        tag: String,
        context_dir: PathBuf,
        status: i32,
    },

    #[error("Failed to start container from image '{image}' (exit status {status})")]
    RunFailed {
        image: String,
        status: i32,
        stderr: String,
    },

    #[error("Failed to resolve numeric identity with 'id {flag}' (exit status {status})")]
    IdentityFailed {
        flag: String,
        status: i32,
        stderr: String,
    },

    #[error("Failed to list containers labelled '{label}' (exit status {status})")]
    ListFailed {
        label: String,
        status: i32,
        stderr: String,
    },

    #[error("Failed to pull image '{image}'")]
    PullFailed { image: String },

    #[error("Image selection failed: {message}")]
    Selector { message: String },

    #[error("Execution context already failed during {stage}; not retrying")]
    ContextFailed { stage: &'static str },

    #[error("No image has been resolved for this execution context")]
    ImageUnresolved,

    #[error("Execution context has been torn down")]
    TornDown,
}

impl ProxyError {
    /// Pipeline stage the failure belongs to, used in log trails.
    pub fn stage(&self) -> &'static str {
        match self {
            ProxyError::Spawn { .. } => "launch",
            ProxyError::BuildFailed { .. } => "build",
            ProxyError::RunFailed { .. } => "run",
            ProxyError::IdentityFailed { .. } => "identity",
            ProxyError::PullFailed { .. } => "pull",
            ProxyError::Selector { .. } => "select",
            ProxyError::ListFailed { .. } => "teardown",
            ProxyError::ContextFailed { stage } => *stage,
            ProxyError::ImageUnresolved => "run",
            ProxyError::TornDown => "teardown",
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ProxyError::Spawn { .. } => "BUILDBOX_SPAWN_FAILED",
            ProxyError::BuildFailed { .. } => "BUILDBOX_BUILD_FAILED",
            ProxyError::RunFailed { .. } => "BUILDBOX_RUN_FAILED",
            ProxyError::IdentityFailed { .. } => "BUILDBOX_IDENTITY_FAILED",
            ProxyError::PullFailed { .. } => "BUILDBOX_PULL_FAILED",
            ProxyError::Selector { .. } => "BUILDBOX_SELECTOR_FAILED",
            ProxyError::ListFailed { .. } => "BUILDBOX_LIST_FAILED",
            ProxyError::ContextFailed { .. } => "BUILDBOX_CONTEXT_FAILED",
            ProxyError::ImageUnresolved => "BUILDBOX_IMAGE_UNRESOLVED",
            ProxyError::TornDown => "BUILDBOX_TORN_DOWN",
        }
    }

    /// Raw diagnostic text captured from the engine, when there is any.
    pub fn engine_stderr(&self) -> Option<&str> {
        match self {
            ProxyError::RunFailed { stderr, .. }
            | ProxyError::IdentityFailed { stderr, .. }
            | ProxyError::ListFailed { stderr, .. }
                if !stderr.trim().is_empty() =>
            {
                Some(stderr)
            }
            _ => None,
        }
    }
}
