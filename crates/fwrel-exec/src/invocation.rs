//! Tool invocation and outcome types.

use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A fully specified external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    /// Executable path or name looked up on PATH.
    pub program: PathBuf,

    /// Arguments after the program.
    pub args: Vec<String>,

    /// Working directory (inherits the caller's when None).
    pub cwd: Option<PathBuf>,

    /// Extra environment variables layered over the inherited environment.
    pub env: Vec<(String, String)>,

    /// Wall-clock limit; None runs until the process exits.
    pub timeout: Option<Duration>,
}

impl ToolInvocation {
    /// Start an invocation of `program`.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            timeout: None,
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the working directory.
    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Add an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Bound the run time.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// True if any argument equals `needle`.
    pub fn has_arg(&self, needle: &str) -> bool {
        self.args.iter().any(|a| a == needle)
    }

    /// The argument following `flag`, if present.
    pub fn arg_after(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }

    /// File name of the program, for matching and log lines.
    pub fn program_name(&self) -> &str {
        self.program
            .file_name()
            .and_then(OsStr::to_str)
            .unwrap_or_default()
    }
}

impl fmt::Display for ToolInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            if arg.contains(char::is_whitespace) {
                write!(f, " \"{}\"", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Exited on its own with this code.
    Exited(i32),
    /// Killed by a signal it did not ask for.
    Signalled,
    /// Killed after exceeding its timeout.
    TimedOut,
    /// Killed because the operator interrupted the lane.
    Cancelled,
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitOutcome::Exited(code) => write!(f, "exit code {}", code),
            ExitOutcome::Signalled => write!(f, "terminated by signal"),
            ExitOutcome::TimedOut => write!(f, "timed out"),
            ExitOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Result of running a tool to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub outcome: ExitOutcome,

    /// Combined stdout/stderr, one line per entry joined with '\n'.
    pub output: String,

    pub duration: Duration,
}

impl ToolOutput {
    /// Exit code 0.
    pub fn success(&self) -> bool {
        self.outcome == ExitOutcome::Exited(0)
    }

    /// Exit code, when the process exited on its own.
    pub fn exit_code(&self) -> Option<i32> {
        match self.outcome {
            ExitOutcome::Exited(code) => Some(code),
            _ => None,
        }
    }
}
