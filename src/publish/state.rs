//! Publish state machine
//!
//! `IDLE → [TEST_GATING] → CLEARING_STALE_ARTIFACTS → MERGING →
//! WRITING_MANIFEST → DONE`, with `FAILED` reachable from every
//! non-terminal state.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PublishState {
    /// Nothing has happened yet
    Idle,
    /// Integration suite is running
    TestGating,
    /// Removing the previous cycle's outputs
    ClearingStaleArtifacts,
    /// Merge tool is running
    Merging,
    WritingManifest,
    Done,
    Failed,
}

impl PublishState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PublishState::Done | PublishState::Failed)
    }

    /// Check if transition from this state to target is valid
    pub fn can_transition_to(&self, target: PublishState) -> bool {
        use PublishState::*;
        match (self, target) {
            (Idle, TestGating) => true,
            (Idle, ClearingStaleArtifacts) => true,
            (Idle, Failed) => true, // precondition checks

            (TestGating, ClearingStaleArtifacts) => true,
            (TestGating, Failed) => true,

            (ClearingStaleArtifacts, Merging) => true,
            (ClearingStaleArtifacts, Failed) => true,

            (Merging, WritingManifest) => true,
            (Merging, Failed) => true,

            (WritingManifest, Done) => true,
            (WritingManifest, Failed) => true,

            _ => false,
        }
    }
}

impl fmt::Display for PublishState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PublishState::Idle => "idle",
            PublishState::TestGating => "test_gating",
            PublishState::ClearingStaleArtifacts => "clearing_stale_artifacts",
            PublishState::Merging => "merging",
            PublishState::WritingManifest => "writing_manifest",
            PublishState::Done => "done",
            PublishState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Invalid publish transition from {from} to {to}")]
pub struct InvalidTransition {
    pub from: PublishState,
    pub to: PublishState,
}

/// Current state plus every state visited, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRun {
    state: PublishState,
    history: Vec<PublishState>,
}

impl Default for PublishRun {
    fn default() -> Self {
        Self::new()
    }
}

impl PublishRun {
    pub fn new() -> Self {
        Self {
            state: PublishState::Idle,
            history: vec![PublishState::Idle],
        }
    }

    pub fn state(&self) -> PublishState {
        self.state
    }

    pub fn history(&self) -> &[PublishState] {
        &self.history
    }

    pub fn visited(&self, state: PublishState) -> bool {
        self.history.contains(&state)
    }

    pub fn transition(&mut self, to: PublishState) -> Result<(), InvalidTransition> {
        if !self.state.can_transition_to(to) {
            return Err(InvalidTransition {
                from: self.state,
                to,
            });
        }
        tracing::debug!("publish: {} -> {}", self.state, to);
        self.state = to;
        self.history.push(to);
        Ok(())
    }

    /// Move to `Failed` unless already terminal.
    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            self.state = PublishState::Failed;
            self.history.push(PublishState::Failed);
        }
    }
}
