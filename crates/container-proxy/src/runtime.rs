use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::command::{ArgumentList, Command, LaunchOutcome, OutputMode, StdinSource};
use crate::context::{ContainerId, ImageReference};
use crate::error::ProxyError;
use crate::launcher::CommandRunner;

/// Engine-facing knobs shared by every runtime command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeSettings {
    /// Engine binary; also the head of every exec prefix.
    pub engine: String,
    /// `-t` on exec when true, `-i` otherwise.
    pub exec_tty: bool,
    /// Blocking command that keeps the detached container alive.
    pub placeholder: String,
    /// Overrides the host temp directory that gets bind-mounted.
    pub tmp_dir: Option<PathBuf>,
    pub labels: BTreeMap<String, String>,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            engine: "docker".to_string(),
            exec_tty: true,
            placeholder: "cat".to_string(),
            tmp_dir: None,
            labels: BTreeMap::new(),
        }
    }
}

/// Everything `run_detached` needs to start the long-lived container.
#[derive(Debug, Clone)]
pub struct DetachedRun<'a> {
    pub image: &'a ImageReference,
    pub workspace_dir: &'a Path,
    pub temp_dir: &'a Path,
    pub env: &'a BTreeMap<String, String>,
    pub uid: &'a str,
    pub gid: &'a str,
    /// `key=value` labels applied in addition to the configured ones.
    pub labels: Vec<String>,
}

/// Builds engine command lines and classifies their results.
#[derive(Clone)]
pub struct RuntimeClient {
    runner: Arc<dyn CommandRunner>,
    settings: RuntimeSettings,
}

impl std::fmt::Debug for RuntimeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeClient")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl RuntimeClient {
    pub fn new(runner: Arc<dyn CommandRunner>, settings: RuntimeSettings) -> Self {
        Self { runner, settings }
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    pub fn engine(&self) -> &str {
        &self.settings.engine
    }

    fn engine_args<'a>(&self, rest: impl IntoIterator<Item = &'a str>) -> ArgumentList {
        let mut args = ArgumentList::new();
        args.add(self.settings.engine.clone());
        for arg in rest {
            args.add(arg);
        }
        args
    }

    fn run_captured(&self, args: ArgumentList) -> Result<LaunchOutcome, ProxyError> {
        self.runner.launch(&Command::new(args).captured())
    }

    /// Whether the engine knows `image`. Any non-zero exit means absent.
    pub fn image_exists(&self, image: &ImageReference) -> Result<bool, ProxyError> {
        let outcome = self.run_captured(self.engine_args(["inspect", image.as_str()]))?;
        debug!(image = %image, status = outcome.status, "image inspect");
        Ok(outcome.success())
    }

    /// Pulls `image`. Returns false on failure so callers can try another source.
    pub fn pull_image(&self, image: &ImageReference) -> Result<bool, ProxyError> {
        info!(image = %image, "pulling image");
        let outcome = self.run_captured(self.engine_args(["pull", image.as_str()]))?;
        if !outcome.success() {
            warn!(
                image = %image,
                status = outcome.status,
                stderr = %outcome.stderr_text().trim(),
                "image pull failed"
            );
        }
        Ok(outcome.success())
    }

    /// Builds `tag` from the Dockerfile in `context_dir`, streaming output to the host.
    pub fn build_image(&self, context_dir: &Path, tag: &ImageReference) -> Result<(), ProxyError> {
        info!(tag = %tag, context = %context_dir.display(), "building image");
        let command = Command::new(self.engine_args(["build", "-t", tag.as_str(), "."]))
            .current_dir(context_dir)
            .stdin(StdinSource::Null);
        let outcome = self.runner.launch(&command)?;
        if !outcome.success() {
            warn!(tag = %tag, status = outcome.status, stage = "build", "image build failed");
            return Err(ProxyError::BuildFailed {
                tag: tag.to_string(),
                context_dir: context_dir.to_path_buf(),
                status: outcome.status,
            });
        }
        Ok(())
    }

    /// Command line for the detached keep-alive container.
    pub fn detached_run_args(&self, run: &DetachedRun<'_>) -> ArgumentList {
        let workspace = run.workspace_dir.display().to_string();
        let temp = run.temp_dir.display().to_string();

        let mut args = self.engine_args(["run"]);
        args.add("-u").add(format!("{}:{}", run.uid, run.gid));
        // tty keeps the placeholder blocked on stdin while detached
        args.add("-td");
        args.add("-v").add(format!("{workspace}:{workspace}:rw"));
        args.add("-v").add(format!("{temp}:{temp}:rw"));
        args.add("-w").add(workspace.clone());
        for (key, value) in &self.settings.labels {
            args.add("--label").add(format!("{key}={value}"));
        }
        for label in &run.labels {
            args.add("--label").add(label.clone());
        }
        for (key, value) in run.env {
            args.add_masked("-e").add_masked(format!("{key}={value}"));
        }
        args.add(run.image.as_str());
        args.add(self.settings.placeholder.clone());
        args
    }

    /// Starts the detached container and returns its identifier.
    pub fn run_detached(&self, run: &DetachedRun<'_>) -> Result<ContainerId, ProxyError> {
        let outcome = self.run_captured(self.detached_run_args(run))?;

        if !outcome.success() {
            let stderr = outcome.stderr_text();
            warn!(
                image = %run.image,
                status = outcome.status,
                stage = "run",
                stderr = %stderr.trim(),
                "container failed to start"
            );
            return Err(ProxyError::RunFailed {
                image: run.image.to_string(),
                status: outcome.status,
                stderr,
            });
        }

        let id = outcome.stdout_text();
        if id.is_empty() {
            warn!(image = %run.image, stage = "run", "engine printed no container id");
            return Err(ProxyError::RunFailed {
                image: run.image.to_string(),
                status: outcome.status,
                stderr: "engine exited successfully but printed no container id".to_string(),
            });
        }
        info!(image = %run.image, container = %id, "container started");
        Ok(ContainerId::new(id))
    }

    /// Rewrites `command` to run inside `container`, keeping every mask bit.
    pub fn exec_command(&self, container: &ContainerId, command: &Command) -> Command {
        let tty = if self.settings.exec_tty { "-t" } else { "-i" };
        let mut args = self.engine_args(["exec", tty, container.as_str()]);
        args.extend(&command.args);
        command.with_args(args)
    }

    /// Runs `command` inside `container` with the caller's stdio and environment.
    pub fn exec_in(
        &self,
        container: &ContainerId,
        command: &Command,
    ) -> Result<LaunchOutcome, ProxyError> {
        self.runner.launch(&self.exec_command(container, command))
    }

    /// Stops `container`. Returns false when the engine reports a failure.
    pub fn stop(&self, container: &ContainerId) -> Result<bool, ProxyError> {
        let outcome = self.run_captured(self.engine_args(["stop", container.as_str()]))?;
        Ok(outcome.success())
    }

    /// Removes `container`. Returns false when the engine reports a failure.
    pub fn remove(&self, container: &ContainerId) -> Result<bool, ProxyError> {
        let outcome = self.run_captured(self.engine_args(["rm", container.as_str()]))?;
        Ok(outcome.success())
    }

    /// Force-removes `container` whatever its state.
    pub fn force_remove(&self, container: &ContainerId) -> Result<bool, ProxyError> {
        let outcome = self.run_captured(self.engine_args(["rm", "-f", container.as_str()]))?;
        Ok(outcome.success())
    }

    /// Containers, running or not, carrying `label` (`key=value`).
    pub fn list_labelled(&self, label: &str) -> Result<Vec<ContainerId>, ProxyError> {
        let filter = format!("label={label}");
        let outcome = self.run_captured(self.engine_args(["ps", "-aq", "--filter", filter.as_str()]))?;
        if !outcome.success() {
            let stderr = outcome.stderr_text();
            warn!(
                label,
                status = outcome.status,
                stderr = %stderr.trim(),
                "container listing failed"
            );
            return Err(ProxyError::ListFailed {
                label: label.to_string(),
                status: outcome.status,
                stderr,
            });
        }
        Ok(String::from_utf8_lossy(&outcome.stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(ContainerId::new)
            .collect())
    }

    /// Runs `id <flag>` on the host (`-u` or `-g`) and returns the trimmed number.
    pub fn resolve_numeric_identity(&self, flag: &str) -> Result<String, ProxyError> {
        let outcome = self.run_captured(ArgumentList::plain(["id", flag]))?;
        if !outcome.success() {
            let stderr = outcome.stderr_text();
            warn!(
                flag,
                status = outcome.status,
                stage = "identity",
                stderr = %stderr.trim(),
                "identity lookup failed"
            );
            return Err(ProxyError::IdentityFailed {
                flag: flag.to_string(),
                status: outcome.status,
                stderr,
            });
        }
        Ok(outcome.stdout_text())
    }

    /// One-shot container run that feeds `stdin` to the process.
    pub fn run_once(
        &self,
        image: &ImageReference,
        workspace_dir: &Path,
        command: &[String],
        stdin: Vec<u8>,
    ) -> Result<LaunchOutcome, ProxyError> {
        let workspace = workspace_dir.display().to_string();
        let mut args = self.engine_args(["run", "--rm", "-i"]);
        args.add("-v").add(format!("{workspace}:{workspace}:rw"));
        args.add("-w").add(workspace);
        args.add(image.as_str());
        for part in command {
            args.add(part.clone());
        }

        let outcome = self.runner.launch(
            &Command::new(args)
                .stdin(StdinSource::Bytes(stdin))
                .stdout(OutputMode::Inherit)
                .stderr(OutputMode::Inherit),
        )?;
        if !outcome.success() {
            return Err(ProxyError::RunFailed {
                image: image.to_string(),
                status: outcome.status,
                stderr: outcome.stderr_text(),
            });
        }
        Ok(outcome)
    }
}
