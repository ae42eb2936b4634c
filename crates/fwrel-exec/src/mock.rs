//! Scripted runner for tests.
//!
//! Stands in for the merge utility, the package installer, and the test
//! suite so orchestration logic can be exercised without any of them
//! installed. Every invocation is recorded; responses come from the first
//! rule whose predicate matches, or a default success.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::invocation::{ExitOutcome, ToolInvocation, ToolOutput};
use crate::{ExecError, ToolRunner};

type Predicate = Box<dyn Fn(&ToolInvocation) -> bool + Send + Sync>;
type Effect = Box<dyn Fn(&ToolInvocation) + Send + Sync>;

/// Scripted response for a matched invocation.
pub struct MockResponse {
    outcome: ExitOutcome,
    lines: Vec<String>,
    effect: Option<Effect>,
    spawn_error: bool,
}

impl MockResponse {
    /// Exit with `code`.
    pub fn exit(code: i32) -> Self {
        Self {
            outcome: ExitOutcome::Exited(code),
            lines: Vec::new(),
            effect: None,
            spawn_error: false,
        }
    }

    /// Exit 0.
    pub fn success() -> Self {
        Self::exit(0)
    }

    /// Report a timeout.
    pub fn timed_out() -> Self {
        Self {
            outcome: ExitOutcome::TimedOut,
            ..Self::success()
        }
    }

    /// Fail to start, as if the program did not exist.
    pub fn spawn_error() -> Self {
        Self {
            spawn_error: true,
            ..Self::success()
        }
    }

    /// Emit these output lines before exiting.
    pub fn with_lines<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lines = lines.into_iter().map(Into::into).collect();
        self
    }

    /// Run a side effect (e.g. create the tool's output file) when matched.
    pub fn with_effect(mut self, effect: impl Fn(&ToolInvocation) + Send + Sync + 'static) -> Self {
        self.effect = Some(Box::new(effect));
        self
    }
}

struct MockRule {
    predicate: Predicate,
    response: MockResponse,
}

/// In-process fake for [`ToolRunner`].
#[derive(Clone, Default)]
pub struct MockRunner {
    rules: Arc<Mutex<Vec<MockRule>>>,
    calls: Arc<Mutex<Vec<ToolInvocation>>>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Respond with `response` to invocations matching `predicate`.
    pub fn on(
        self,
        predicate: impl Fn(&ToolInvocation) -> bool + Send + Sync + 'static,
        response: MockResponse,
    ) -> Self {
        if let Ok(mut rules) = self.rules.lock() {
            rules.push(MockRule {
                predicate: Box::new(predicate),
                response,
            });
        }
        self
    }

    /// Respond to invocations carrying `arg` anywhere in their argv.
    pub fn on_arg(self, arg: &str, response: MockResponse) -> Self {
        let arg = arg.to_string();
        self.on(move |inv| inv.has_arg(&arg), response)
    }

    /// All invocations so far, in order.
    pub fn calls(&self) -> Vec<ToolInvocation> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Invocations carrying `arg`.
    pub fn calls_with_arg(&self, arg: &str) -> Vec<ToolInvocation> {
        self.calls()
            .into_iter()
            .filter(|inv| inv.has_arg(arg))
            .collect()
    }
}

impl ToolRunner for MockRunner {
    fn run_streaming(
        &self,
        invocation: &ToolInvocation,
        on_line: &mut dyn FnMut(&str),
    ) -> Result<ToolOutput, ExecError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(invocation.clone());
        }

        let rules = self
            .rules
            .lock()
            .map_err(|_| ExecError::Io(std::io::Error::other("mock rules poisoned")))?;

        let Some(rule) = rules.iter().find(|r| (r.predicate)(invocation)) else {
            return Ok(ToolOutput {
                outcome: ExitOutcome::Exited(0),
                output: String::new(),
                duration: Duration::ZERO,
            });
        };

        let response = &rule.response;
        if response.spawn_error {
            return Err(ExecError::Spawn {
                program: invocation.program.display().to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "mock: not found"),
            });
        }
        if let Some(ref effect) = response.effect {
            effect(invocation);
        }
        for line in &response.lines {
            on_line(line);
        }

        Ok(ToolOutput {
            outcome: response.outcome,
            output: response.lines.join("\n"),
            duration: Duration::ZERO,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_success_and_recorded() {
        let runner = MockRunner::new();
        let out = runner.run(&ToolInvocation::new("python").arg("-V")).unwrap();
        assert!(out.success());
        assert_eq!(runner.calls().len(), 1);
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let runner = MockRunner::new()
            .on_arg("install", MockResponse::exit(1))
            .on(|_| true, MockResponse::exit(7));
        let install = runner
            .run(&ToolInvocation::new("python").args(["-m", "pip", "install"]))
            .unwrap();
        assert_eq!(install.exit_code(), Some(1));
        let other = runner.run(&ToolInvocation::new("python")).unwrap();
        assert_eq!(other.exit_code(), Some(7));
        assert_eq!(runner.calls_with_arg("install").len(), 1);
    }

    #[test]
    fn test_lines_streamed_and_effect_runs() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("made");
        let marker_clone = marker.clone();
        let runner = MockRunner::new().on(
            |_| true,
            MockResponse::success()
                .with_lines(["x", "y"])
                .with_effect(move |_| std::fs::write(&marker_clone, b"1").unwrap()),
        );
        let mut seen = Vec::new();
        runner
            .run_streaming(&ToolInvocation::new("tool"), &mut |l| seen.push(l.to_string()))
            .unwrap();
        assert_eq!(seen, vec!["x", "y"]);
        assert!(marker.exists());
    }

    #[test]
    fn test_spawn_error() {
        let runner = MockRunner::new().on(|_| true, MockResponse::spawn_error());
        assert!(runner.run(&ToolInvocation::new("missing")).is_err());
    }
}
