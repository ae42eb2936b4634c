//! Ctrl-C handling
//!
//! The first interrupt cancels the shared [`CancelToken`]: the runner kills
//! the running child and the enclosing step fails with `Cancelled`. A second
//! interrupt exits at once with [`EXIT_CODE_CANCELLED`].

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use fwrel_exec::CancelToken;

/// Exit code for cancelled runs
pub const EXIT_CODE_CANCELLED: i32 = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// First signal: cancel the running step
    Cancel,
    /// Second signal: exit immediately
    ImmediateExit,
    /// Third+ signal: ignore
    Ignore,
}

#[derive(Debug)]
pub struct SignalState {
    signal_count: AtomicU8,
    token: CancelToken,
}

impl SignalState {
    pub fn new(token: CancelToken) -> Self {
        Self {
            signal_count: AtomicU8::new(0),
            token,
        }
    }

    pub fn signal_count(&self) -> u8 {
        self.signal_count.load(Ordering::SeqCst)
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Record one interrupt and decide what to do about it.
    pub fn handle_signal(&self) -> SignalAction {
        match self.signal_count.fetch_add(1, Ordering::SeqCst) {
            0 => {
                self.token.cancel();
                SignalAction::Cancel
            }
            1 => SignalAction::ImmediateExit,
            _ => SignalAction::Ignore,
        }
    }
}

pub struct SignalHandler {
    state: Arc<SignalState>,
}

impl SignalHandler {
    pub fn new(token: CancelToken) -> Self {
        Self {
            state: Arc::new(SignalState::new(token)),
        }
    }

    pub fn state(&self) -> Arc<SignalState> {
        Arc::clone(&self.state)
    }

    /// Install the process-wide handler. Call once at startup.
    pub fn install(&self) -> Result<(), ctrlc::Error> {
        let state = Arc::clone(&self.state);
        ctrlc::set_handler(move || match state.handle_signal() {
            SignalAction::Cancel => {
                tracing::warn!("Received interrupt, stopping the running step...");
            }
            SignalAction::ImmediateExit => {
                eprintln!("\nReceived second interrupt, exiting immediately");
                std::process::exit(EXIT_CODE_CANCELLED);
            }
            SignalAction::Ignore => {}
        })
    }
}
