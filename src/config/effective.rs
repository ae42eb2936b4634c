//! Effective configuration with full provenance
//!
//! The effective config captures the merged configuration plus
//! information about where each value came from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

use super::defaults::BuiltinDefaults;
use super::merge::merge_layers;
use super::release::ReleaseConfig;

/// Schema version for the effective config record
pub const SCHEMA_VERSION: u32 = 1;

/// Schema identifier
pub const SCHEMA_ID: &str = "fwrel/effective_config@1";

/// Repo config file, relative to the project directory.
pub const REPO_CONFIG_PATH: &str = ".fwrel/release.toml";

/// Overrides the integration test host.
pub const ENV_TEST_HOST: &str = "SOTACAT_TEST_HOST";

/// Overrides the integration test arguments (whitespace separated). A set
/// but blank value means no arguments.
pub const ENV_TEST_ARGS: &str = "SOTACAT_TEST_ARGS";

/// Origin of a configuration source
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOrigin {
    Builtin,
    Repo,
    Env,
}

/// A contributing config source with provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSource {
    /// Origin of this source
    pub origin: ConfigOrigin,

    /// File path (None for builtin/env)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// SHA-256 digest of raw file bytes (None for builtin/env)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,

    /// Variables that contributed (env layer only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<String>,
}

/// Effective configuration with full provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveConfig {
    /// Schema version
    pub schema_version: u32,

    /// Schema identifier
    pub schema_id: String,

    /// When this config was computed
    pub created_at: DateTime<Utc>,

    /// The merged configuration object
    pub config: Value,

    /// Contributing sources in precedence order
    pub sources: Vec<ConfigSource>,
}

impl EffectiveConfig {
    /// Build effective config from layers
    pub fn build(
        repo_config_path: Option<&Path>,
        env_overrides: Option<(Value, Vec<String>)>,
    ) -> Result<Self, ConfigError> {
        let mut layers = Vec::new();
        let mut sources = Vec::new();

        // Layer 1: Built-in defaults
        layers.push(BuiltinDefaults::default().to_value());
        sources.push(ConfigSource {
            origin: ConfigOrigin::Builtin,
            path: None,
            digest: None,
            keys: Vec::new(),
        });

        // Layer 2: Repo config
        if let Some(path) = repo_config_path {
            if path.exists() {
                let (value, digest) = Self::load_toml_file(path)?;
                layers.push(value);
                sources.push(ConfigSource {
                    origin: ConfigOrigin::Repo,
                    path: Some(path.to_string_lossy().to_string()),
                    digest: Some(digest),
                    keys: Vec::new(),
                });
            }
        }

        // Layer 3: Environment overrides
        if let Some((value, keys)) = env_overrides {
            layers.push(value);
            sources.push(ConfigSource {
                origin: ConfigOrigin::Env,
                path: None,
                digest: None,
                keys,
            });
        }

        let merged = merge_layers(layers);

        let effective = Self {
            schema_version: SCHEMA_VERSION,
            schema_id: SCHEMA_ID.to_string(),
            created_at: Utc::now(),
            config: merged,
            sources,
        };

        // Surface type and range errors at load time rather than mid-publish.
        effective.release_config()?;

        Ok(effective)
    }

    /// Build from the repo config under `project_dir` (or `explicit`) and
    /// the process environment.
    pub fn load(project_dir: &Path, explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let repo_path = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::IoError(format!(
                        "config file not found: {}",
                        path.display()
                    )));
                }
                path.to_path_buf()
            }
            None => project_dir.join(REPO_CONFIG_PATH),
        };
        let env = env_overrides(|key| std::env::var(key).ok());
        Self::build(Some(&repo_path), env)
    }

    /// Deserialize the merged value into the typed config and validate it.
    pub fn release_config(&self) -> Result<ReleaseConfig, ConfigError> {
        let config: ReleaseConfig = serde_json::from_value(self.config.clone())
            .map_err(|e| ConfigError::ParseError(format!("invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and parse a TOML file, returning the value and digest
    fn load_toml_file(path: &Path) -> Result<(Value, String), ConfigError> {
        let bytes = fs::read(path)
            .map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;

        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let digest = hex::encode(hasher.finalize());

        let contents = String::from_utf8(bytes)
            .map_err(|e| ConfigError::ParseError(format!("Invalid UTF-8: {}", e)))?;

        let toml_value: toml::Value = toml::from_str(&contents).map_err(|e| {
            ConfigError::ParseError(format!("{}: TOML parse error: {}", path.display(), e))
        })?;

        Ok((Self::toml_to_json(toml_value), digest))
    }

    /// Convert TOML Value to JSON Value
    fn toml_to_json(toml: toml::Value) -> Value {
        match toml {
            toml::Value::String(s) => Value::String(s),
            toml::Value::Integer(i) => Value::Number(i.into()),
            toml::Value::Float(f) => serde_json::Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            toml::Value::Boolean(b) => Value::Bool(b),
            toml::Value::Datetime(dt) => Value::String(dt.to_string()),
            toml::Value::Array(arr) => {
                Value::Array(arr.into_iter().map(Self::toml_to_json).collect())
            }
            toml::Value::Table(table) => Value::Object(
                table
                    .into_iter()
                    .map(|(k, v)| (k, Self::toml_to_json(v)))
                    .collect(),
            ),
        }
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Collect the environment override layer.
///
/// Returns None when no override variable is set. A blank host is ignored;
/// a blank argument string clears the default arguments.
pub fn env_overrides(lookup: impl Fn(&str) -> Option<String>) -> Option<(Value, Vec<String>)> {
    let mut tests = serde_json::Map::new();
    let mut keys = Vec::new();

    if let Some(host) = lookup(ENV_TEST_HOST).filter(|v| !v.trim().is_empty()) {
        tests.insert("host".to_string(), Value::String(host.trim().to_string()));
        keys.push(ENV_TEST_HOST.to_string());
    }

    if let Some(args) = lookup(ENV_TEST_ARGS) {
        let args = args
            .split_whitespace()
            .map(|a| Value::String(a.to_string()))
            .collect();
        tests.insert("args".to_string(), Value::Array(args));
        keys.push(ENV_TEST_ARGS.to_string());
    }

    if keys.is_empty() {
        return None;
    }
    Some((serde_json::json!({ "tests": tests }), keys))
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}
