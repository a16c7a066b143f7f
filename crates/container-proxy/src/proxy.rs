use std::sync::Arc;

use tracing::{debug, error};

use crate::command::{Command, LaunchOutcome};
use crate::context::{ExecutionContext, ProxyState};
use crate::error::ProxyError;
use crate::launcher::CommandRunner;
use crate::resolve::resolve_image;
use crate::runtime::{RuntimeClient, RuntimeSettings};
use crate::selector::{BuildContext, ImageSelector};
use crate::startup::ensure_container;
use crate::teardown::{teardown, TeardownOutcome};

/// Runs every command inside the build container, starting it on first use.
///
/// Wraps another runner, which it uses both for engine commands and for
/// commands that run on the host once the context is disabled.
pub struct ProxyingRunner {
    inner: Arc<dyn CommandRunner>,
    runtime: RuntimeClient,
    context: Arc<ExecutionContext>,
    selector: Arc<dyn ImageSelector>,
    build: BuildContext,
}

impl ProxyingRunner {
    pub fn new(
        inner: Arc<dyn CommandRunner>,
        settings: RuntimeSettings,
        selector: Arc<dyn ImageSelector>,
        build: BuildContext,
    ) -> Self {
        Self::with_context(
            inner,
            settings,
            selector,
            build,
            Arc::new(ExecutionContext::new()),
        )
    }

    pub fn with_context(
        inner: Arc<dyn CommandRunner>,
        settings: RuntimeSettings,
        selector: Arc<dyn ImageSelector>,
        build: BuildContext,
        context: Arc<ExecutionContext>,
    ) -> Self {
        let runtime = RuntimeClient::new(inner.clone(), settings);
        Self {
            inner,
            runtime,
            context,
            selector,
            build,
        }
    }

    pub fn context(&self) -> &Arc<ExecutionContext> {
        &self.context
    }

    pub fn runtime(&self) -> &RuntimeClient {
        &self.runtime
    }

    pub fn build(&self) -> &BuildContext {
        &self.build
    }

    /// Tears the build container down. Safe to call more than once.
    pub fn teardown(&self) -> TeardownOutcome {
        teardown(&self.context, &self.runtime)
    }

    fn initialize(&self) -> Result<(), ProxyError> {
        resolve_image(
            &self.context,
            self.selector.as_ref(),
            &self.runtime,
            &self.build,
        )?;
        ensure_container(
            &self.context,
            &self.runtime,
            &self.build.workspace_dir,
            &self.build.env,
        )?;
        Ok(())
    }

    fn dispatch(&self, command: &Command) -> Result<LaunchOutcome, ProxyError> {
        match self.context.state() {
            ProxyState::Proxied(container) => {
                debug!(container = %container, command = %command.args, "exec in container");
                self.runtime.exec_in(&container, command)
            }
            ProxyState::Passthrough | ProxyState::Disabled => self.inner.launch(command),
        }
    }
}

impl CommandRunner for ProxyingRunner {
    fn launch(&self, command: &Command) -> Result<LaunchOutcome, ProxyError> {
        if self.context.state() != ProxyState::Passthrough {
            return self.dispatch(command);
        }
        if let Some(stage) = self.context.failure() {
            return Err(ProxyError::ContextFailed { stage });
        }

        match self.initialize() {
            Ok(()) => {}
            Err(ProxyError::TornDown) => {
                debug!(command = %command.args, "context torn down during startup; running on host");
                return self.inner.launch(command);
            }
            // Another command already failed setup and logged it.
            Err(err @ ProxyError::ContextFailed { .. }) => return Err(err),
            Err(err) => {
                self.context.record_failure(err.stage());
                error!(
                    build = %self.build.name,
                    stage = err.stage(),
                    code = err.code(),
                    error = %err,
                    "build environment setup failed"
                );
                return Err(err);
            }
        }

        self.dispatch(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::ArgumentList;
    use crate::context::ImageReference;
    use crate::testing::ScriptedRunner;

    struct FixedSelector(&'static str);

    impl ImageSelector for FixedSelector {
        fn prepare_image(
            &self,
            _runtime: &RuntimeClient,
            _build: &BuildContext,
        ) -> Result<ImageReference, ProxyError> {
            Ok(ImageReference::new(self.0))
        }
    }

    fn proxy(runner: &Arc<ScriptedRunner>) -> ProxyingRunner {
        ProxyingRunner::new(
            runner.clone(),
            RuntimeSettings::default(),
            Arc::new(FixedSelector("build-env:1")),
            BuildContext::new("job", "/ws"),
        )
    }

    fn mvn() -> Command {
        Command::new(ArgumentList::with_masks(
            ["mvn", "-s", ".settings.xml"],
            &[false, false, true],
        ))
    }

    #[test]
    fn first_command_starts_container_and_execs() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond_stdout("run", 0, "abc123\n");
        let proxy = proxy(&runner);

        proxy.launch(&mvn()).unwrap();
        proxy.launch(&mvn()).unwrap();

        assert_eq!(runner.calls_to("run").len(), 1);
        let execs = runner.calls_to("exec");
        assert_eq!(execs.len(), 2);
        assert_eq!(
            execs[0].args.args(),
            &["docker", "exec", "-t", "abc123", "mvn", "-s", ".settings.xml"]
        );
        assert_eq!(
            execs[0].args.masks(),
            &[false, false, false, false, false, false, true]
        );
    }

    #[test]
    fn failed_setup_is_not_retried() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond_stderr("run", 125, "boom");
        let proxy = proxy(&runner);

        let err = proxy.launch(&mvn()).unwrap_err();
        assert!(matches!(err, ProxyError::RunFailed { .. }));
        let err = proxy.launch(&mvn()).unwrap_err();
        assert!(matches!(err, ProxyError::ContextFailed { stage: "run" }));
        assert_eq!(runner.calls_to("run").len(), 1);
    }

    #[test]
    fn commands_after_teardown_run_on_host() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond_stdout("run", 0, "abc123\n");
        let proxy = proxy(&runner);
        proxy.launch(&mvn()).unwrap();
        proxy.teardown();

        proxy.launch(&mvn()).unwrap();
        let last = runner.calls().pop().unwrap();
        assert_eq!(last.args.args(), &["mvn", "-s", ".settings.xml"]);
        assert_eq!(last.args.masks(), &[false, false, true]);
    }

    #[test]
    fn teardown_before_first_command_never_starts_container() {
        let runner = Arc::new(ScriptedRunner::new());
        let proxy = proxy(&runner);
        assert_eq!(proxy.teardown(), TeardownOutcome::NoContainer);

        proxy.launch(&mvn()).unwrap();
        assert!(runner.calls_to("run").is_empty());
        assert_eq!(runner.calls().len(), 1);
    }
}
