//! Real process execution.
//!
//! Output from stdout and stderr is read on two threads and funnelled into a
//! single channel, so the caller sees combined output line by line while the
//! process is still running. The main thread polls the child for exit,
//! timeout, and cancellation.

use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::cancel::CancelToken;
use crate::invocation::{ExitOutcome, ToolInvocation, ToolOutput};
use crate::{ExecError, ToolRunner};

/// How often the child is polled while no output arrives.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long to keep draining output after the child has exited.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Runs tools as real child processes.
#[derive(Debug, Clone, Default)]
pub struct SystemRunner {
    cancel: Option<CancelToken>,
}

impl SystemRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill running children once `token` is cancelled.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }

    fn spawn(&self, invocation: &ToolInvocation) -> Result<Child, ExecError> {
        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(ref dir) = invocation.cwd {
            command.current_dir(dir);
        }
        for (key, value) in &invocation.env {
            command.env(key, value);
        }

        command.spawn().map_err(|source| ExecError::Spawn {
            program: invocation.program.display().to_string(),
            source,
        })
    }
}

fn spawn_line_reader<R>(stream: R, tx: Sender<String>) -> JoinHandle<()>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let reader = BufReader::new(stream);
        for line in reader.split(b'\n') {
            let Ok(bytes) = line else { break };
            let text = String::from_utf8_lossy(&bytes);
            let text = text.trim_end_matches('\r').to_string();
            if tx.send(text).is_err() {
                break;
            }
        }
    })
}

fn kill_child(child: &mut Child) -> Result<(), ExecError> {
    // The process may already have exited between polls.
    let _ = child.kill();
    child.wait()?;
    Ok(())
}

impl ToolRunner for SystemRunner {
    fn run_streaming(
        &self,
        invocation: &ToolInvocation,
        on_line: &mut dyn FnMut(&str),
    ) -> Result<ToolOutput, ExecError> {
        let started = Instant::now();
        let mut child = self.spawn(invocation)?;

        let (tx, rx) = mpsc::channel::<String>();
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_line_reader(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_line_reader(stderr, tx.clone()));
        }
        drop(tx);

        let mut captured = Vec::new();
        let mut outcome: Option<ExitOutcome> = None;
        let mut exited_at: Option<Instant> = None;
        let mut disconnected = false;

        loop {
            if !disconnected {
                match rx.recv_timeout(POLL_INTERVAL) {
                    Ok(line) => {
                        on_line(&line);
                        captured.push(line);
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => disconnected = true,
                }
            }

            match outcome {
                Some(_) => {
                    let drained_long_enough =
                        exited_at.is_some_and(|t| t.elapsed() >= DRAIN_GRACE);
                    if disconnected || drained_long_enough {
                        break;
                    }
                }
                None => {
                    if let Some(status) = child.try_wait()? {
                        outcome = Some(match status.code() {
                            Some(code) => ExitOutcome::Exited(code),
                            None => ExitOutcome::Signalled,
                        });
                        exited_at = Some(Instant::now());
                    } else if invocation
                        .timeout
                        .is_some_and(|limit| started.elapsed() >= limit)
                    {
                        tracing::debug!("{} exceeded its timeout, killing", invocation.program_name());
                        kill_child(&mut child)?;
                        outcome = Some(ExitOutcome::TimedOut);
                        exited_at = Some(Instant::now());
                    } else if self.is_cancelled() {
                        kill_child(&mut child)?;
                        outcome = Some(ExitOutcome::Cancelled);
                        exited_at = Some(Instant::now());
                    } else if disconnected {
                        thread::sleep(POLL_INTERVAL);
                    }
                }
            }
        }

        if disconnected {
            for reader in readers {
                let _ = reader.join();
            }
        }

        Ok(ToolOutput {
            outcome: outcome.unwrap_or(ExitOutcome::Signalled),
            output: captured.join("\n"),
            duration: started.elapsed(),
        })
    }
}
