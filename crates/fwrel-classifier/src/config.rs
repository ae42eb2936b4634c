//! Classifier configuration types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Prefix the build driver uses for its internal application upload aliases.
pub const DEFAULT_UPLOAD_ALIAS_PREFIX: &str = "__upload";

/// Token that marks a clean target (`clean`, `fullclean`, ...).
pub const DEFAULT_CLEAN_TOKEN: &str = "clean";

/// Targets that introspect the project or only touch the filesystem image.
pub const DEFAULT_NON_COMPILE_TARGETS: &[&str] = &[
    "clean",
    "idedata",
    "compiledb",
    "envdump",
    "menuconfig",
    "erase",
    "buildfs",
    "uploadfs",
    "uploadfsota",
];

/// Targets that build, upload, size, or publish the application image.
pub const DEFAULT_COMPILE_TARGETS: &[&str] = &[
    "buildprog",
    "program",
    "app",
    "upload",
    "size",
    "package_webtools",
    "verify_and_publish_webtools",
];

/// Errors for an invalid classifier rule table.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ClassifierConfigError {
    #[error("upload alias prefix must not be empty")]
    EmptyUploadAliasPrefix,

    #[error("clean token must not be empty")]
    EmptyCleanToken,

    #[error("target '{0}' is listed as both compile and non-compile")]
    OverlappingTarget(String),
}

/// The rule table driving classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Any target starting with this prefix is an application upload.
    #[serde(default = "default_upload_alias_prefix")]
    pub upload_alias_prefix: String,

    /// A target equal to, or ending in, this token is a clean action.
    #[serde(default = "default_clean_token")]
    pub clean_token: String,

    /// Target sets made only of these never compile.
    #[serde(default = "default_non_compile_targets")]
    pub non_compile_targets: BTreeSet<String>,

    /// Any of these in the target set compiles.
    #[serde(default = "default_compile_targets")]
    pub compile_targets: BTreeSet<String>,
}

fn default_upload_alias_prefix() -> String {
    DEFAULT_UPLOAD_ALIAS_PREFIX.to_string()
}

fn default_clean_token() -> String {
    DEFAULT_CLEAN_TOKEN.to_string()
}

fn default_non_compile_targets() -> BTreeSet<String> {
    DEFAULT_NON_COMPILE_TARGETS.iter().map(|s| s.to_string()).collect()
}

fn default_compile_targets() -> BTreeSet<String> {
    DEFAULT_COMPILE_TARGETS.iter().map(|s| s.to_string()).collect()
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            upload_alias_prefix: default_upload_alias_prefix(),
            clean_token: default_clean_token(),
            non_compile_targets: default_non_compile_targets(),
            compile_targets: default_compile_targets(),
        }
    }
}

impl ClassifierConfig {
    /// Check that the rule table is usable.
    pub fn validate(&self) -> Result<(), ClassifierConfigError> {
        if self.upload_alias_prefix.is_empty() {
            return Err(ClassifierConfigError::EmptyUploadAliasPrefix);
        }
        if self.clean_token.is_empty() {
            return Err(ClassifierConfigError::EmptyCleanToken);
        }
        if let Some(overlap) = self
            .compile_targets
            .intersection(&self.non_compile_targets)
            .next()
        {
            return Err(ClassifierConfigError::OverlappingTarget(overlap.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ClassifierConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert!(config.non_compile_targets.contains("idedata"));
        assert!(config.compile_targets.contains("verify_and_publish_webtools"));
    }

    #[test]
    fn test_overlap_rejected() {
        let mut config = ClassifierConfig::default();
        config.compile_targets.insert("erase".to_string());
        assert_eq!(
            config.validate(),
            Err(ClassifierConfigError::OverlappingTarget("erase".to_string()))
        );
    }

    #[test]
    fn test_partial_deserialization_fills_defaults() {
        let config: ClassifierConfig =
            serde_json::from_str(r#"{"compile_targets": ["firmware"]}"#).unwrap();
        assert_eq!(config.upload_alias_prefix, "__upload");
        assert_eq!(config.compile_targets.len(), 1);
        assert!(config.non_compile_targets.contains("clean"));
    }

    #[test]
    fn test_empty_prefix_rejected() {
        let config = ClassifierConfig {
            upload_alias_prefix: String::new(),
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ClassifierConfigError::EmptyUploadAliasPrefix)
        );
    }
}
