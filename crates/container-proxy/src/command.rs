use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

const MASK: &str = "********";

/// Ordered arguments with a parallel mask bit per argument.
///
/// Both sequences grow together, so they always have the same length.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArgumentList {
    args: Vec<String>,
    masks: Vec<bool>,
}

impl ArgumentList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a list where no argument is masked.
    pub fn plain<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut list = Self::new();
        for arg in args {
            list.push(arg, false);
        }
        list
    }

    /// Builds a list from arguments and their mask bits.
    ///
    /// Missing mask bits count as unmasked; extra bits are ignored.
    pub fn with_masks<I, S>(args: I, masks: &[bool]) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut list = Self::new();
        for (idx, arg) in args.into_iter().enumerate() {
            list.push(arg, masks.get(idx).copied().unwrap_or(false));
        }
        list
    }

    pub fn push(&mut self, arg: impl Into<String>, masked: bool) -> &mut Self {
        self.args.push(arg.into());
        self.masks.push(masked);
        self
    }

    pub fn add(&mut self, arg: impl Into<String>) -> &mut Self {
        self.push(arg, false)
    }

    pub fn add_masked(&mut self, arg: impl Into<String>) -> &mut Self {
        self.push(arg, true)
    }

    pub fn extend(&mut self, other: &ArgumentList) -> &mut Self {
        self.args.extend(other.args.iter().cloned());
        self.masks.extend(other.masks.iter().copied());
        self
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn masks(&self) -> &[bool] {
        &self.masks
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Program and the remaining arguments, if any.
    pub fn split_program(&self) -> Option<(&str, &[String])> {
        self.args
            .split_first()
            .map(|(program, rest)| (program.as_str(), rest))
    }

    /// Renders the list for logs with every masked argument hidden.
    pub fn to_masked_string(&self) -> String {
        let mut out = String::new();
        for (idx, (arg, masked)) in self.args.iter().zip(&self.masks).enumerate() {
            if idx > 0 {
                out.push(' ');
            }
            if *masked {
                out.push_str(MASK);
            } else if arg.is_empty() || arg.contains(char::is_whitespace) {
                out.push('\'');
                out.push_str(&arg.replace('\'', "'\\''"));
                out.push('\'');
            } else {
                out.push_str(arg);
            }
        }
        out
    }
}

impl fmt::Display for ArgumentList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_masked_string())
    }
}

/// Where a launched process reads its standard input from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StdinSource {
    #[default]
    Inherit,
    Null,
    /// Bytes written to the process once it starts; the pipe is closed afterwards.
    Bytes(Vec<u8>),
}

/// Where a launched process writes an output stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputMode {
    #[default]
    Inherit,
    Null,
    Capture,
}

/// One process invocation as seen by a [`crate::CommandRunner`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Command {
    pub args: ArgumentList,
    pub working_dir: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    pub stdin: StdinSource,
    pub stdout: OutputMode,
    pub stderr: OutputMode,
}

impl Command {
    pub fn new(args: ArgumentList) -> Self {
        Self {
            args,
            ..Self::default()
        }
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.working_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn envs(mut self, vars: &BTreeMap<String, String>) -> Self {
        self.env
            .extend(vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn stdin(mut self, stdin: StdinSource) -> Self {
        self.stdin = stdin;
        self
    }

    pub fn stdout(mut self, mode: OutputMode) -> Self {
        self.stdout = mode;
        self
    }

    pub fn stderr(mut self, mode: OutputMode) -> Self {
        self.stderr = mode;
        self
    }

    /// Capture both output streams, discarding stdin.
    pub fn captured(self) -> Self {
        self.stdin(StdinSource::Null)
            .stdout(OutputMode::Capture)
            .stderr(OutputMode::Capture)
    }

    /// Same invocation with a different argument list.
    pub fn with_args(&self, args: ArgumentList) -> Self {
        Self {
            args,
            ..self.clone()
        }
    }
}

/// What came back from a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchOutcome {
    pub status: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl LaunchOutcome {
    pub fn exited(status: i32) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    pub fn success(&self) -> bool {
        self.status == 0
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).trim().to_string()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }
}
