//! Custom build targets offered to the operator
//!
//! The build driver registers these by name; both depend on the
//! application image so the driver compiles before publishing.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::image::ImageConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PublishTarget {
    /// Merge, copy the OTA image, write the manifest.
    #[serde(rename = "package_webtools")]
    Package,
    /// Same, but only after the integration suite passes.
    #[serde(rename = "verify_and_publish_webtools")]
    VerifyAndPublish,
}

impl PublishTarget {
    pub const ALL: [PublishTarget; 2] = [PublishTarget::Package, PublishTarget::VerifyAndPublish];

    pub fn name(&self) -> &'static str {
        match self {
            PublishTarget::Package => "package_webtools",
            PublishTarget::VerifyAndPublish => "verify_and_publish_webtools",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            PublishTarget::Package => "SOTACAT: build and publish webtools binaries",
            PublishTarget::VerifyAndPublish => "SOTACAT: build, test, and publish webtools binaries",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            PublishTarget::Package => {
                "Build current env and publish OTA bin, merged bin, and manifest.json"
            }
            PublishTarget::VerifyAndPublish => {
                "Build current env, run tests, and publish only if tests pass"
            }
        }
    }

    pub fn runs_tests(&self) -> bool {
        matches!(self, PublishTarget::VerifyAndPublish)
    }
}

impl fmt::Display for PublishTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown publish target: {0}")]
pub struct UnknownTarget(pub String);

impl FromStr for PublishTarget {
    type Err = UnknownTarget;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PublishTarget::ALL
            .into_iter()
            .find(|t| t.name() == s)
            .ok_or_else(|| UnknownTarget(s.to_string()))
    }
}

/// One registration record as the build driver consumes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRegistration {
    pub name: String,
    pub dependency: String,
    pub title: String,
    pub description: String,
}

/// Registrations for every publish target.
pub fn target_registrations(image: &ImageConfig) -> Vec<TargetRegistration> {
    let dependency = format!("$BUILD_DIR/{}", image.application.file);
    PublishTarget::ALL
        .iter()
        .map(|target| TargetRegistration {
            name: target.name().to_string(),
            dependency: dependency.clone(),
            title: target.title().to_string(),
            description: target.description().to_string(),
        })
        .collect()
}
