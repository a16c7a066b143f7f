use std::io::Write;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::thread;

use tracing::{debug, warn};

use crate::command::{Command, LaunchOutcome, OutputMode, StdinSource};
use crate::error::ProxyError;

/// Capability to run a process and report how it ended.
///
/// Every call blocks until the process exits.
pub trait CommandRunner: Send + Sync {
    fn launch(&self, command: &Command) -> Result<LaunchOutcome, ProxyError>;
}

impl<R: CommandRunner + ?Sized> CommandRunner for Arc<R> {
    fn launch(&self, command: &Command) -> Result<LaunchOutcome, ProxyError> {
        (**self).launch(command)
    }
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    fn launch(&self, command: &Command) -> Result<LaunchOutcome, ProxyError> {
        (**self).launch(command)
    }
}

/// Runs commands straight on the host.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectRunner;

impl DirectRunner {
    pub fn new() -> Self {
        Self
    }
}

impl CommandRunner for DirectRunner {
    fn launch(&self, command: &Command) -> Result<LaunchOutcome, ProxyError> {
        let (program, rest) = command.args.split_program().ok_or_else(|| ProxyError::Spawn {
            program: String::new(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
        })?;

        debug!(command = %command.args, "launch");

        let mut process = std::process::Command::new(program);
        process.args(rest);
        if let Some(dir) = &command.working_dir {
            process.current_dir(dir);
        }
        process.envs(&command.env);
        process.stdin(match &command.stdin {
            StdinSource::Inherit => Stdio::inherit(),
            StdinSource::Null => Stdio::null(),
            StdinSource::Bytes(_) => Stdio::piped(),
        });
        process.stdout(stdio_for(command.stdout));
        process.stderr(stdio_for(command.stderr));

        let spawn_error = |source: std::io::Error| ProxyError::Spawn {
            program: program.to_string(),
            source,
        };

        let mut child = process.spawn().map_err(spawn_error)?;

        let writer = match (&command.stdin, child.stdin.take()) {
            (StdinSource::Bytes(bytes), Some(mut pipe)) => {
                let bytes = bytes.clone();
                Some(thread::spawn(move || pipe.write_all(&bytes)))
            }
            _ => None,
        };

        let output = child.wait_with_output().map_err(spawn_error)?;

        if let Some(handle) = writer {
            match handle.join() {
                Ok(Ok(())) => {}
                // The process may exit before draining its input.
                Ok(Err(err)) => debug!(error = %err, "stdin write ended early"),
                Err(_) => warn!("stdin writer thread panicked"),
            }
        }

        Ok(LaunchOutcome {
            status: exit_code(&output.status),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

fn stdio_for(mode: OutputMode) -> Stdio {
    match mode {
        OutputMode::Inherit => Stdio::inherit(),
        OutputMode::Null => Stdio::null(),
        OutputMode::Capture => Stdio::piped(),
    }
}

fn exit_code(status: &ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}
