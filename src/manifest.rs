//! Web-flasher installation manifest
//!
//! The manifest's version is re-derived from the build timestamp header
//! every time, never from the clock at write time, so the tag in the
//! manifest always matches the release the merged image was built for.
//! Regeneration is a read-modify-write: descriptive fields an operator
//! added to an existing manifest survive, `version` and `builds` are
//! replaced.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::build_info::{parse_header, BuildTimestamp};
use crate::config::{DEFAULT_CHIP_FAMILY, DEFAULT_PART_URL, DEFAULT_PRODUCT_NAME};
use crate::fsutil;

/// Manifest contents the lane controls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestConfig {
    /// `name` used when no prior manifest supplies one.
    pub name: String,

    pub chip_family: String,

    /// Download URL of the merged image; `{tag}` is replaced by the
    /// release tag.
    pub part_url: String,
}

impl Default for ManifestConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_PRODUCT_NAME.to_string(),
            chip_family: DEFAULT_CHIP_FAMILY.to_string(),
            part_url: DEFAULT_PART_URL.to_string(),
        }
    }
}

/// Release tag derived from a build timestamp (`250101:1430` → `v250101.1430`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ReleaseVersion(String);

impl ReleaseVersion {
    pub fn from_timestamp(timestamp: &BuildTimestamp) -> Self {
        Self(format!("v{}", timestamp.as_str().replace(':', ".")))
    }

    /// Read and parse the timestamp header.
    pub fn from_header(header: &Path) -> Result<(BuildTimestamp, Self), ManifestError> {
        let contents = fs::read_to_string(header).map_err(|source| ManifestError::HeaderRead {
            path: header.to_path_buf(),
            source,
        })?;
        let raw = parse_header(&contents).ok_or_else(|| ManifestError::MissingVersion {
            path: header.to_path_buf(),
        })?;
        let timestamp = BuildTimestamp::parse(raw).ok_or_else(|| ManifestError::InvalidVersion {
            path: header.to_path_buf(),
            value: raw.to_string(),
        })?;
        let version = Self::from_timestamp(&timestamp);
        Ok((timestamp, version))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReleaseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestPart {
    pub path: String,
    pub offset: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildEntry {
    #[serde(rename = "chipFamily")]
    pub chip_family: String,
    pub parts: Vec<ManifestPart>,
}

/// Typed manifest with pass-through for fields the lane does not own.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default)]
    pub builds: Vec<BuildEntry>,

    /// Everything else, preserved verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Manifest {
    /// Interpret arbitrary JSON as a prior manifest.
    ///
    /// Non-objects yield an empty manifest. `version` and `builds` are
    /// dropped since they are always regenerated; a non-string `name` is
    /// dropped so the default applies.
    pub fn from_value(value: Value) -> Self {
        let Value::Object(mut extra) = value else {
            return Self::default();
        };
        let name = match extra.remove("name") {
            Some(Value::String(name)) => Some(name),
            Some(other) => {
                tracing::debug!("ignoring non-string manifest name: {}", other);
                None
            }
            None => None,
        };
        extra.remove("version");
        extra.remove("builds");
        Self {
            name,
            version: None,
            builds: Vec::new(),
            extra,
        }
    }

    /// Load a prior manifest, treating a missing or malformed file as empty.
    pub fn load_lenient(path: &Path) -> Self {
        let Ok(text) = fs::read_to_string(path) else {
            return Self::default();
        };
        match serde_json::from_str::<Value>(&text) {
            Ok(value) => Self::from_value(value),
            Err(e) => {
                tracing::warn!("ignoring malformed manifest {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Overlay this release onto `prior`.
    pub fn merge(prior: Manifest, config: &ManifestConfig, version: &ReleaseVersion) -> Self {
        let url = config.part_url.replace("{tag}", version.as_str());
        Self {
            name: Some(prior.name.unwrap_or_else(|| config.name.clone())),
            version: Some(version.to_string()),
            builds: vec![BuildEntry {
                chip_family: config.chip_family.clone(),
                parts: vec![ManifestPart { path: url, offset: 0 }],
            }],
            extra: prior.extra,
        }
    }

    /// Pretty JSON with four-space indentation.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.serialize(&mut ser)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("failed to read {path}: {source}")]
    HeaderRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not parse BUILD_DATE_TIME from {path}")]
    MissingVersion { path: PathBuf },

    #[error("BUILD_DATE_TIME in {path} is '{value}', expected YYMMDD:HHMM")]
    InvalidVersion { path: PathBuf, value: String },

    #[error("failed to serialise manifest: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Writes the manifest for the release recorded in the header.
pub struct ManifestWriter<'a> {
    config: &'a ManifestConfig,
}

impl<'a> ManifestWriter<'a> {
    pub fn new(config: &'a ManifestConfig) -> Self {
        Self { config }
    }

    /// Read-modify-write the manifest at `path`.
    pub fn write(&self, header: &Path, path: &Path) -> Result<Manifest, ManifestError> {
        let prior = Manifest::load_lenient(path);
        self.write_with_prior(header, path, prior)
    }

    /// Write the manifest at `path`, seeded with an already-loaded prior.
    ///
    /// The header is parsed before anything is written.
    pub fn write_with_prior(
        &self,
        header: &Path,
        path: &Path,
        prior: Manifest,
    ) -> Result<Manifest, ManifestError> {
        let (_, version) = ReleaseVersion::from_header(header)?;
        let manifest = Manifest::merge(prior, self.config, &version);
        let json = manifest.to_json()?;
        fsutil::write_atomic(path, json.as_bytes()).map_err(|source| ManifestError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!("Wrote webtools manifest: {} ({})", path.display(), version);
        Ok(manifest)
    }
}
