//! Integration test suite invocation
//!
//! The suite probes a live device over HTTP and can run for many minutes,
//! so it has no timeout and its output is relayed line by line as it
//! arrives.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use fwrel_exec::{ExecError, ExitOutcome, ToolInvocation, ToolRunner};

use crate::config::{DEFAULT_TEST_ARGS, DEFAULT_TEST_ENTRY, DEFAULT_TEST_HOST};
use crate::context::BuildContext;

/// How to run the integration suite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestConfig {
    /// Entry script relative to the project.
    pub entry: String,

    /// Device hostname, appended as `--host` unless `args` already has one.
    pub host: String,

    /// Test-selection arguments.
    pub args: Vec<String>,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            entry: DEFAULT_TEST_ENTRY.to_string(),
            host: DEFAULT_TEST_HOST.to_string(),
            args: DEFAULT_TEST_ARGS.iter().map(|a| a.to_string()).collect(),
        }
    }
}

/// Outcome of a suite run that exited on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestRunResult {
    pub exit_code: i32,
    pub duration: Duration,
}

impl TestRunResult {
    pub fn passed(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TestRunError {
    #[error("failed to start integration tests: {0}")]
    Spawn(#[from] ExecError),

    #[error("integration tests were killed before exiting")]
    Killed,

    #[error("integration tests were cancelled")]
    Cancelled,
}

pub struct IntegrationTestRunner<'a> {
    runner: &'a dyn ToolRunner,
    config: &'a TestConfig,
}

impl<'a> IntegrationTestRunner<'a> {
    pub fn new(runner: &'a dyn ToolRunner, config: &'a TestConfig) -> Self {
        Self { runner, config }
    }

    pub fn command(&self, ctx: &BuildContext) -> ToolInvocation {
        let entry = ctx.subst_path(&self.config.entry);
        let mut invocation = ToolInvocation::new(ctx.python_exe())
            .arg("-u")
            .arg(entry.display().to_string())
            .args(self.config.args.iter().cloned());
        if !invocation.has_arg("--host") {
            invocation = invocation.args(["--host", self.config.host.as_str()]);
        }
        invocation
            .current_dir(ctx.project_dir())
            .env("PYTHONUNBUFFERED", "1")
    }

    /// Run the suite to completion, relaying each output line.
    pub fn run(&self, ctx: &BuildContext) -> Result<TestRunResult, TestRunError> {
        let invocation = self.command(ctx);
        tracing::info!("Running integration tests before publishing webtools artifacts...");
        tracing::debug!("{}", invocation);

        let output = self
            .runner
            .run_streaming(&invocation, &mut |line| tracing::info!("[tests] {}", line))?;

        match output.outcome {
            ExitOutcome::Exited(exit_code) => Ok(TestRunResult {
                exit_code,
                duration: output.duration,
            }),
            ExitOutcome::Cancelled => Err(TestRunError::Cancelled),
            ExitOutcome::Signalled | ExitOutcome::TimedOut => Err(TestRunError::Killed),
        }
    }
}
