//! Layered release configuration
//!
//! Three layers, later wins:
//! 1. Built-in defaults
//! 2. Repo config (`.fwrel/release.toml`)
//! 3. Environment overrides (`SOTACAT_TEST_HOST`, `SOTACAT_TEST_ARGS`)

mod defaults;
mod effective;
mod merge;
mod release;

pub use defaults::*;
pub use effective::{
    env_overrides, ConfigError, ConfigOrigin, ConfigSource, EffectiveConfig, ENV_TEST_ARGS,
    ENV_TEST_HOST, REPO_CONFIG_PATH,
};
pub use merge::{deep_merge, merge_layers};
pub use release::{OutputConfig, ReleaseConfig};
