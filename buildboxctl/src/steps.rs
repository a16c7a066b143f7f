use anyhow::{bail, Context, Result};
use container_proxy::{
    ArgumentList, BuildContext, Command, DockerfileImage, ImageSelector, NamedImage,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

static ENV_KEY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// Parses a `KEY=VALUE` pair, rejecting keys that are not valid variable names.
pub fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, found '{}'", raw))?;
    validate_env_key(key).map_err(|e| e.to_string())?;
    Ok((key.to_string(), value.to_string()))
}

fn validate_env_key(key: &str) -> Result<()> {
    if !ENV_KEY.is_match(key) {
        bail!("invalid environment variable name '{}'", key);
    }
    Ok(())
}

/// Where the build image comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Named(String),
    Dockerfile(PathBuf),
}

impl ImageSource {
    pub fn selector(&self) -> Arc<dyn ImageSelector> {
        match self {
            ImageSource::Named(image) => Arc::new(NamedImage::new(image.clone())),
            ImageSource::Dockerfile(dir) => Arc::new(DockerfileImage::new(dir.clone())),
        }
    }
}

/// A build step ready to run: one context, any number of commands.
#[derive(Debug, Clone)]
pub struct StepPlan {
    pub name: String,
    pub source: ImageSource,
    pub workspace: PathBuf,
    pub env: BTreeMap<String, String>,
    pub commands: Vec<Command>,
}

impl StepPlan {
    pub fn build_context(&self) -> BuildContext {
        BuildContext::new(self.name.clone(), self.workspace.clone()).with_env(self.env.clone())
    }

    /// Wraps `args` into a host command rooted at the workspace.
    pub fn command(&self, args: ArgumentList) -> Command {
        Command::new(args)
            .current_dir(&self.workspace)
            .envs(&self.env)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepFile {
    pub name: Option<String>,
    pub image: Option<String>,
    pub dockerfile: Option<PathBuf>,
    pub workspace: Option<PathBuf>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    pub steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Step {
    pub run: Vec<String>,
    /// Indices into `run` that must never be logged.
    #[serde(default)]
    pub masked: Vec<usize>,
}

impl StepFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read step file {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse step file {}", path.display()))
    }

    /// Resolves paths against `base_dir` and checks every step.
    pub fn into_plan(self, base_dir: &Path, default_name: &str) -> Result<StepPlan> {
        let source = match (self.image, self.dockerfile) {
            (Some(image), None) if !image.trim().is_empty() => ImageSource::Named(image),
            (None, Some(dir)) => ImageSource::Dockerfile(dir),
            (Some(_), Some(_)) => bail!("step file must set either 'image' or 'dockerfile', not both"),
            _ => bail!("step file must set 'image' or 'dockerfile'"),
        };

        if self.steps.is_empty() {
            bail!("step file has no steps");
        }
        for key in self.env.keys() {
            validate_env_key(key)?;
        }

        let workspace = resolve_workspace(base_dir, self.workspace.as_deref())?;
        let mut plan = StepPlan {
            name: self.name.unwrap_or_else(|| default_name.to_string()),
            source,
            workspace,
            env: self.env,
            commands: Vec::with_capacity(self.steps.len()),
        };

        for (idx, step) in self.steps.into_iter().enumerate() {
            if step.run.is_empty() {
                bail!("step {} has an empty 'run' list", idx + 1);
            }
            let mut masks = vec![false; step.run.len()];
            for masked in step.masked {
                let slot = masks.get_mut(masked).with_context(|| {
                    format!("step {}: masked index {} is out of range", idx + 1, masked)
                })?;
                *slot = true;
            }
            let command = plan.command(ArgumentList::with_masks(step.run, &masks));
            plan.commands.push(command);
        }

        Ok(plan)
    }
}

/// Absolute, canonical workspace directory; bind mounts need real paths.
pub fn resolve_workspace(base_dir: &Path, workspace: Option<&Path>) -> Result<PathBuf> {
    let dir = match workspace {
        Some(dir) if dir.is_absolute() => dir.to_path_buf(),
        Some(dir) => base_dir.join(dir),
        None => base_dir.to_path_buf(),
    };
    fs::canonicalize(&dir)
        .with_context(|| format!("Workspace directory {} is not accessible", dir.display()))
}
