use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::command::{Command, LaunchOutcome};
use crate::error::ProxyError;
use crate::launcher::CommandRunner;

/// Records every launch and replays canned outcomes keyed by the first or
/// second argument (`"inspect"`, `"run"`, `"id"`, ...). Unscripted calls
/// succeed with empty output.
#[derive(Default)]
pub(crate) struct ScriptedRunner {
    calls: Mutex<Vec<Command>>,
    responses: Mutex<HashMap<String, VecDeque<LaunchOutcome>>>,
}

impl ScriptedRunner {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn respond(&self, key: &str, outcome: LaunchOutcome) {
        self.responses
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .push_back(outcome);
    }

    pub(crate) fn respond_stdout(&self, key: &str, status: i32, stdout: &str) {
        self.respond(
            key,
            LaunchOutcome {
                status,
                stdout: stdout.as_bytes().to_vec(),
                stderr: Vec::new(),
            },
        );
    }

    pub(crate) fn respond_stderr(&self, key: &str, status: i32, stderr: &str) {
        self.respond(
            key,
            LaunchOutcome {
                status,
                stdout: Vec::new(),
                stderr: stderr.as_bytes().to_vec(),
            },
        );
    }

    pub(crate) fn calls(&self) -> Vec<Command> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls whose first or second argument is `key`.
    pub(crate) fn calls_to(&self, key: &str) -> Vec<Command> {
        self.calls()
            .into_iter()
            .filter(|call| Self::matches(call, key))
            .collect()
    }

    fn matches(call: &Command, key: &str) -> bool {
        call.args.args().iter().take(2).any(|arg| arg == key)
    }
}

impl CommandRunner for ScriptedRunner {
    fn launch(&self, command: &Command) -> Result<LaunchOutcome, ProxyError> {
        self.calls.lock().unwrap().push(command.clone());
        let mut responses = self.responses.lock().unwrap();
        for (key, queue) in responses.iter_mut() {
            if Self::matches(command, key) {
                if let Some(outcome) = queue.pop_front() {
                    return Ok(outcome);
                }
            }
        }
        Ok(LaunchOutcome::exited(0))
    }
}
