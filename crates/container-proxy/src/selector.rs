use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::info;

use crate::context::ImageReference;
use crate::error::ProxyError;
use crate::runtime::RuntimeClient;

/// What a selector gets to look at when choosing the image.
#[derive(Debug, Clone, Default)]
pub struct BuildContext {
    /// Display name used in log lines.
    pub name: String,
    pub workspace_dir: PathBuf,
    /// Step environment, injected into the container on startup.
    pub env: BTreeMap<String, String>,
}

impl BuildContext {
    pub fn new(name: impl Into<String>, workspace_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            workspace_dir: workspace_dir.into(),
            env: BTreeMap::new(),
        }
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }
}

/// Supplies the image that backs an execution context.
///
/// Called at most once per context. Implementations may use the runtime
/// client to inspect, pull, or build images.
pub trait ImageSelector: Send + Sync {
    fn prepare_image(
        &self,
        runtime: &RuntimeClient,
        build: &BuildContext,
    ) -> Result<ImageReference, ProxyError>;
}

/// Uses a named image, pulling it when the engine does not have it.
#[derive(Debug, Clone)]
pub struct NamedImage {
    pub image: ImageReference,
}

impl NamedImage {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: ImageReference::new(image),
        }
    }
}

impl ImageSelector for NamedImage {
    fn prepare_image(
        &self,
        runtime: &RuntimeClient,
        build: &BuildContext,
    ) -> Result<ImageReference, ProxyError> {
        if runtime.image_exists(&self.image)? {
            info!(build = %build.name, image = %self.image, "using local image");
            return Ok(self.image.clone());
        }
        if runtime.pull_image(&self.image)? {
            return Ok(self.image.clone());
        }
        Err(ProxyError::PullFailed {
            image: self.image.to_string(),
        })
    }
}

/// Builds the image from a Dockerfile, reusing a previous build of the same file.
#[derive(Debug, Clone)]
pub struct DockerfileImage {
    pub context_dir: PathBuf,
    pub dockerfile: String,
}

impl DockerfileImage {
    pub fn new(context_dir: impl Into<PathBuf>) -> Self {
        Self {
            context_dir: context_dir.into(),
            dockerfile: "Dockerfile".to_string(),
        }
    }

    /// Resolves a relative context directory against the workspace.
    fn context_in(&self, workspace: &Path) -> PathBuf {
        if self.context_dir.is_absolute() {
            self.context_dir.clone()
        } else {
            workspace.join(&self.context_dir)
        }
    }
}

/// Deterministic tag for a Dockerfile: `buildbox/<first 12 hex of sha256>`.
pub fn dockerfile_tag(contents: &[u8]) -> ImageReference {
    let digest = hex::encode(Sha256::digest(contents));
    ImageReference::new(format!("buildbox/{}", &digest[..12]))
}

impl ImageSelector for DockerfileImage {
    fn prepare_image(
        &self,
        runtime: &RuntimeClient,
        build: &BuildContext,
    ) -> Result<ImageReference, ProxyError> {
        let context_dir = self.context_in(&build.workspace_dir);
        let dockerfile = context_dir.join(&self.dockerfile);
        let contents = fs::read(&dockerfile).map_err(|err| ProxyError::Selector {
            message: format!("cannot read {}: {}", dockerfile.display(), err),
        })?;

        let tag = dockerfile_tag(&contents);
        if runtime.image_exists(&tag)? {
            info!(build = %build.name, image = %tag, "reusing image built from Dockerfile");
            return Ok(tag);
        }
        runtime.build_image(&context_dir, &tag)?;
        Ok(tag)
    }
}
