//! Timeouts for bounded subprocess steps
//!
//! Probes, package installs, and certificate-bundle generation are bounded.
//! The merge utility and the integration test suite are not: they run until
//! the external process exits on its own.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upper bound for any configured timeout (1 hour).
const MAX_TIMEOUT_SECONDS: u64 = 3600;

/// Timeout configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Import probe per package (default: 5)
    pub probe_seconds: u64,

    /// Batched package install (default: 120)
    pub install_seconds: u64,

    /// Certificate bundle generation (default: 60)
    pub crt_bundle_seconds: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            probe_seconds: 5,
            install_seconds: 120,
            crt_bundle_seconds: 60,
        }
    }
}

impl TimeoutConfig {
    /// Validate timeout configuration.
    ///
    /// Every value must be in (0, 3600], and a probe may not outlast the
    /// install it gates.
    pub fn validate(&self) -> Result<(), TimeoutValidationError> {
        for (name, value) in [
            ("probe_seconds", self.probe_seconds),
            ("install_seconds", self.install_seconds),
            ("crt_bundle_seconds", self.crt_bundle_seconds),
        ] {
            if value == 0 || value > MAX_TIMEOUT_SECONDS {
                return Err(TimeoutValidationError::OutOfBounds { name, value });
            }
        }

        if self.probe_seconds > self.install_seconds {
            return Err(TimeoutValidationError::ProbeExceedsInstall {
                probe: self.probe_seconds,
                install: self.install_seconds,
            });
        }

        Ok(())
    }

    pub fn probe(&self) -> Duration {
        Duration::from_secs(self.probe_seconds)
    }

    pub fn install(&self) -> Duration {
        Duration::from_secs(self.install_seconds)
    }

    pub fn crt_bundle(&self) -> Duration {
        Duration::from_secs(self.crt_bundle_seconds)
    }
}

/// Timeout validation errors
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TimeoutValidationError {
    #[error("{name} must be in (0, 3600], got {value}")]
    OutOfBounds { name: &'static str, value: u64 },

    #[error("probe_seconds ({probe}) must not exceed install_seconds ({install})")]
    ProbeExceedsInstall { probe: u64, install: u64 },
}
