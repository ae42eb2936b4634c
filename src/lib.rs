//! fwrel - firmware release lane
//!
//! Pre-build and publish steps for the SOTACAT ESP32-C3 firmware: keeps the
//! interpreter dependencies, compressed web assets, and build timestamp
//! header current before each compile, and turns a finished build into the
//! webtools release (merged image, OTA image, manifest), optionally gated on
//! the integration suite.

pub mod assets;
pub mod bootstrap;
pub mod build_info;
pub mod config;
pub mod context;
pub mod crt_bundle;
pub mod fsutil;
pub mod image;
pub mod manifest;
pub mod prebuild;
pub mod publish;
pub mod signal;
pub mod testrun;
pub mod timeout;

pub use config::{ConfigError, EffectiveConfig, ReleaseConfig};
pub use context::{BuildContext, BuildType};
pub use prebuild::{PrebuildHook, PrebuildReport};
pub use publish::{PublishError, PublishOrchestrator, PublishReport, PublishState, PublishTarget};

pub use fwrel_classifier::{classify, BuildInvocation, Classification, InvocationKind};
pub use fwrel_exec::{CancelToken, MockRunner, SystemRunner, ToolRunner};
