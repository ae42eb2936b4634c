//! External tool invocation for the fwrel release lane.
//!
//! Every external process the lane depends on (interpreter probes, the
//! package installer, the image merge utility, the integration test suite)
//! goes through the [`ToolRunner`] trait. Production code uses
//! [`SystemRunner`]; tests use [`MockRunner`].

mod cancel;
mod invocation;
pub mod mock;
mod system;

pub use cancel::CancelToken;
pub use invocation::{ExitOutcome, ToolInvocation, ToolOutput};
pub use mock::{MockResponse, MockRunner};
pub use system::SystemRunner;

use std::io;

/// Errors starting or supervising a tool.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error while supervising tool: {0}")]
    Io(#[from] io::Error),
}

/// Capability interface for running an external tool to completion.
///
/// A nonzero exit is not an error at this level; callers decide what an
/// exit code means.
pub trait ToolRunner: Send + Sync {
    /// Run the tool, handing each combined output line to `on_line` as it
    /// arrives.
    fn run_streaming(
        &self,
        invocation: &ToolInvocation,
        on_line: &mut dyn FnMut(&str),
    ) -> Result<ToolOutput, ExecError>;

    /// Run the tool, collecting output.
    fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput, ExecError> {
        self.run_streaming(invocation, &mut |_| {})
    }
}
