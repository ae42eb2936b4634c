//! Typed release configuration
//!
//! The merged configuration value deserialises into [`ReleaseConfig`].
//! Each section belongs to the component that consumes it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

use fwrel_classifier::ClassifierConfig;

use super::defaults::*;
use super::ConfigError;
use crate::assets::AssetConfig;
use crate::bootstrap::BootstrapConfig;
use crate::build_info::BuildInfoConfig;
use crate::context::BuildContext;
use crate::crt_bundle::CrtBundleConfig;
use crate::image::ImageConfig;
use crate::manifest::ManifestConfig;
use crate::testrun::TestConfig;
use crate::timeout::TimeoutConfig;

/// Everything the lane can be configured with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReleaseConfig {
    pub classifier: ClassifierConfig,
    pub timeouts: TimeoutConfig,
    pub bootstrap: BootstrapConfig,
    pub assets: AssetConfig,
    pub build_info: BuildInfoConfig,
    pub crt_bundle: CrtBundleConfig,
    pub image: ImageConfig,
    pub output: OutputConfig,
    pub manifest: ManifestConfig,
    pub tests: TestConfig,
}

/// Names and location of the published artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Output directory; `$VAR` references are expanded.
    pub dir: String,

    /// Flashable merged image.
    pub merged_name: String,

    /// Standalone OTA copy of the application image.
    pub ota_name: String,

    pub manifest_name: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: DEFAULT_OUTPUT_DIR.to_string(),
            merged_name: DEFAULT_MERGED_NAME.to_string(),
            ota_name: DEFAULT_OTA_NAME.to_string(),
            manifest_name: DEFAULT_MANIFEST_NAME.to_string(),
        }
    }
}

impl OutputConfig {
    pub fn dir(&self, ctx: &BuildContext) -> PathBuf {
        ctx.subst_path(&self.dir)
    }

    pub fn merged_path(&self, ctx: &BuildContext) -> PathBuf {
        self.dir(ctx).join(&self.merged_name)
    }

    pub fn ota_path(&self, ctx: &BuildContext) -> PathBuf {
        self.dir(ctx).join(&self.ota_name)
    }

    pub fn manifest_path(&self, ctx: &BuildContext) -> PathBuf {
        self.dir(ctx).join(&self.manifest_name)
    }
}

impl ReleaseConfig {
    /// Check cross-field constraints serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.timeouts
            .validate()
            .map_err(|e| ConfigError::ValidationError(format!("timeouts: {}", e)))?;
        self.classifier
            .validate()
            .map_err(|e| ConfigError::ValidationError(format!("classifier: {}", e)))?;

        let segments = self.image.segments();
        for segment in &segments {
            if segment.file.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "image segment at {:#06x} has an empty file name",
                    segment.offset
                )));
            }
        }
        if !segments.windows(2).all(|w| w[0].offset < w[1].offset) {
            return Err(ConfigError::ValidationError(
                "image segment offsets must be strictly ascending (bootloader, partitions, application)"
                    .to_string(),
            ));
        }
        if self.image.merge_command.is_empty() {
            return Err(ConfigError::ValidationError(
                "image.merge_command must name a program".to_string(),
            ));
        }

        let names = [
            &self.output.merged_name,
            &self.output.ota_name,
            &self.output.manifest_name,
        ];
        if names.iter().any(|n| n.trim().is_empty()) {
            return Err(ConfigError::ValidationError(
                "output names must not be empty".to_string(),
            ));
        }
        let distinct: BTreeSet<&String> = names.iter().copied().collect();
        if distinct.len() != names.len() {
            return Err(ConfigError::ValidationError(
                "output names must be distinct".to_string(),
            ));
        }

        if self.assets.extensions.is_empty() {
            return Err(ConfigError::ValidationError(
                "assets.extensions must not be empty".to_string(),
            ));
        }
        if let Some(ext) = self
            .assets
            .extensions
            .iter()
            .find(|e| e.is_empty() || e.contains('.'))
        {
            return Err(ConfigError::ValidationError(format!(
                "asset extension '{}' must be a bare extension without dots",
                ext
            )));
        }

        if !self.manifest.part_url.contains("{tag}") {
            return Err(ConfigError::ValidationError(
                "manifest.part_url must contain {tag}".to_string(),
            ));
        }

        if self.tests.entry.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "tests.entry must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_paths() {
        let ctx = BuildContext::builder("/fw").build();
        let output = OutputConfig::default();
        assert_eq!(
            output.merged_path(&ctx),
            PathBuf::from("/fw/firmware/webtools/esp32c3.bin")
        );
        assert_eq!(
            output.ota_path(&ctx),
            PathBuf::from("/fw/firmware/webtools/SOTACAT-ESP32C3-OTA.bin")
        );
        assert_eq!(
            output.manifest_path(&ctx),
            PathBuf::from("/fw/firmware/webtools/manifest.json")
        );
    }

    #[test]
    fn test_duplicate_output_names_rejected() {
        let mut config = ReleaseConfig::default();
        config.output.ota_name = config.output.merged_name.clone();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(msg)) if msg.contains("distinct")
        ));
    }

    #[test]
    fn test_offsets_must_ascend() {
        let mut config = ReleaseConfig::default();
        config.image.partitions.offset = 0x20000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_dotted_extension_rejected() {
        let mut config = ReleaseConfig::default();
        config.assets.extensions = vec![".html".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_section_keeps_defaults() {
        let config: ReleaseConfig =
            serde_json::from_value(serde_json::json!({"tests": {"host": "10.0.0.7"}})).unwrap();
        assert_eq!(config.tests.host, "10.0.0.7");
        assert_eq!(config.tests.entry, DEFAULT_TEST_ENTRY);
        assert_eq!(config.image.chip, DEFAULT_CHIP);
    }
}
