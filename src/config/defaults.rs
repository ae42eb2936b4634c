//! Built-in lane defaults (layer 1)
//!
//! The values every release configuration starts from. Repo and
//! environment layers only need to name what they change.

use serde_json::Value;

use super::release::ReleaseConfig;

/// Chip identifier passed to the merge utility.
pub const DEFAULT_CHIP: &str = "esp32c3";

/// Chip family written into the manifest.
pub const DEFAULT_CHIP_FAMILY: &str = "ESP32-C3";

pub const DEFAULT_FLASH_MODE: &str = "dio";
pub const DEFAULT_FLASH_FREQ: &str = "80m";
pub const DEFAULT_FLASH_SIZE: &str = "4MB";

/// Raw build outputs and their flash offsets.
pub const DEFAULT_BOOTLOADER: (&str, u32) = ("bootloader.bin", 0x0000);
pub const DEFAULT_PARTITIONS: (&str, u32) = ("partitions.bin", 0x8000);
pub const DEFAULT_APPLICATION: (&str, u32) = ("firmware.bin", 0x10000);

/// Where published artifacts land.
pub const DEFAULT_OUTPUT_DIR: &str = "$PROJECT_DIR/firmware/webtools";
pub const DEFAULT_MERGED_NAME: &str = "esp32c3.bin";
pub const DEFAULT_OTA_NAME: &str = "SOTACAT-ESP32C3-OTA.bin";
pub const DEFAULT_MANIFEST_NAME: &str = "manifest.json";

/// Generated header holding the build timestamp.
pub const DEFAULT_HEADER: &str = "include/build_info.h";

/// Web UI sources compressed before each compile.
pub const DEFAULT_WEB_DIR: &str = "src/web";
pub const DEFAULT_WEB_EXTENSIONS: &[&str] = &["html", "js", "css"];

/// Source trees whose changes invalidate the build timestamp, as
/// (root, glob) pairs relative to the project directory.
pub const DEFAULT_TRACKED_SOURCES: &[(&str, &str)] = &[
    ("src", "**/*.cpp"),
    ("include", "**/*.h"),
    ("src/web", "*.html"),
    ("src/web", "*.js"),
    ("src/web", "*.css"),
    ("lib", "**/*.cpp"),
    ("lib", "**/*.h"),
];

/// Individual build configuration files tracked alongside the sources.
pub const DEFAULT_TRACKED_CONFIG_FILES: &[&str] =
    &["platformio.ini", "CMakeLists.txt", "src/CMakeLists.txt"];

/// Manifest `name` used when no prior manifest supplies one.
pub const DEFAULT_PRODUCT_NAME: &str = "SOTACAT for Elecraft KX2, KX3, and KH1";

/// Published location of the merged image; `{tag}` is the release tag.
pub const DEFAULT_PART_URL: &str =
    "https://github.com/SOTAmat/SOTAcat/releases/download/{tag}/esp32c3.bin";

/// Merge utility command prefix, before `--chip`.
pub const DEFAULT_MERGE_COMMAND: &[&str] = &[
    "$PYTHONEXE",
    "$PLATFORMIO_HOME/packages/tool-esptoolpy/esptool.py",
];

pub const DEFAULT_TEST_ENTRY: &str = "test/integration/run_tests.py";
pub const DEFAULT_TEST_HOST: &str = "sotacat.local";
pub const DEFAULT_TEST_ARGS: &[&str] = &["--all"];

/// Upper bound on certificates in the pre-generated bundle.
pub const DEFAULT_MAX_CERTS: u32 = 200;

/// Built-in default configuration values
#[derive(Debug, Clone, Default)]
pub struct BuiltinDefaults {
    config: ReleaseConfig,
}

impl BuiltinDefaults {
    /// The defaults as a typed config.
    pub fn config(&self) -> &ReleaseConfig {
        &self.config
    }

    /// Convert to JSON Value for merging
    pub fn to_value(&self) -> Value {
        serde_json::to_value(&self.config).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_value() {
        let value = BuiltinDefaults::default().to_value();

        assert_eq!(value["image"]["chip"], "esp32c3");
        assert_eq!(value["image"]["flash_size"], "4MB");
        assert_eq!(value["image"]["application"]["offset"], 0x10000);
        assert_eq!(value["output"]["merged_name"], "esp32c3.bin");
        assert_eq!(value["tests"]["host"], "sotacat.local");
        assert_eq!(value["timeouts"]["install_seconds"], 120);
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(BuiltinDefaults::default().config().validate().is_ok());
    }

    #[test]
    fn test_tracked_sources_cover_web_extensions() {
        for ext in DEFAULT_WEB_EXTENSIONS {
            let glob = format!("*.{}", ext);
            assert!(DEFAULT_TRACKED_SOURCES
                .iter()
                .any(|(root, pattern)| *root == DEFAULT_WEB_DIR && *pattern == glob));
        }
    }
}
