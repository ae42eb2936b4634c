//! mbedtls certificate bundle pre-generation
//!
//! ESP-IDF builds sometimes reach the embed step before CMake has produced
//! `esp-idf/mbedtls/x509_crt_bundle`. Generating it up front avoids that
//! race. The compile regenerates it anyway when needed, so every failure
//! here is logged at debug level and otherwise ignored.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use fwrel_exec::{ToolInvocation, ToolRunner};

use crate::bootstrap::{find_espidf_python, ESPIDF_FRAMEWORK};
use crate::config::DEFAULT_MAX_CERTS;
use crate::context::BuildContext;
use crate::timeout::TimeoutConfig;

/// Generated bundle, relative to the build directory.
pub const BUNDLE_RELATIVE_PATH: &str = "esp-idf/mbedtls/x509_crt_bundle";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrtBundleConfig {
    pub enabled: bool,
    pub max_certs: u32,
}

impl Default for CrtBundleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_certs: DEFAULT_MAX_CERTS,
        }
    }
}

/// What the pre-generation step did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrtBundleOutcome {
    Generated(PathBuf),
    AlreadyPresent(PathBuf),
    /// Not applicable or not possible; the compile will handle it.
    Skipped(String),
}

/// Locate `gen_crt_bundle.py` in an installed ESP-IDF framework package.
///
/// Returns the directory holding the script and its PEM inputs.
pub fn find_generator_dir(platformio_home: &Path) -> Option<PathBuf> {
    let packages = platformio_home.join("packages");
    let mut candidates: Vec<PathBuf> = fs::read_dir(packages)
        .ok()?
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().starts_with("framework-espidf"))
        .map(|e| e.path().join("components").join("mbedtls").join("esp_crt_bundle"))
        .filter(|dir| dir.join("gen_crt_bundle.py").is_file())
        .collect();
    candidates.sort();
    candidates.into_iter().next()
}

/// Generate the bundle if the build needs one and it is missing.
pub fn ensure_crt_bundle(
    ctx: &BuildContext,
    config: &CrtBundleConfig,
    timeouts: &TimeoutConfig,
    runner: &dyn ToolRunner,
) -> CrtBundleOutcome {
    let skip = |reason: &str| {
        tracing::debug!("x509_crt_bundle pre-generation skipped: {}", reason);
        CrtBundleOutcome::Skipped(reason.to_string())
    };

    if !config.enabled {
        return skip("disabled");
    }
    if !ctx.has_framework(ESPIDF_FRAMEWORK) {
        return skip("build does not use ESP-IDF");
    }

    let bundle = ctx.build_dir().join(BUNDLE_RELATIVE_PATH);
    let Some(out_dir) = bundle.parent().map(Path::to_path_buf) else {
        return skip("bundle path has no parent");
    };
    if bundle.is_file() {
        tracing::info!("x509_crt_bundle already exists, skipping regeneration");
        return CrtBundleOutcome::AlreadyPresent(bundle);
    }

    let Some(generator_dir) = find_generator_dir(ctx.platformio_home()) else {
        return skip("gen_crt_bundle.py not found");
    };
    let cacrt_all = generator_dir.join("cacrt_all.pem");
    if !cacrt_all.is_file() {
        return skip("cacrt_all.pem not found");
    }
    let Some(python) = find_espidf_python(ctx.platformio_home()) else {
        return skip("no ESP-IDF interpreter found");
    };
    if let Err(e) = fs::create_dir_all(&out_dir) {
        return skip(&format!("cannot create {}: {}", out_dir.display(), e));
    }

    let mut invocation = ToolInvocation::new(python)
        .arg(generator_dir.join("gen_crt_bundle.py").display().to_string())
        .arg("--input")
        .arg(cacrt_all.display().to_string());
    let cacrt_local = generator_dir.join("cacrt_local.pem");
    if cacrt_local.is_file() {
        invocation = invocation.arg(cacrt_local.display().to_string());
    }
    let invocation = invocation
        .args(["-q", "--max-certs", &config.max_certs.to_string()])
        .current_dir(&out_dir)
        .timeout(timeouts.crt_bundle());

    match runner.run(&invocation) {
        Ok(output) if output.success() => {
            tracing::info!("Pre-generated x509_crt_bundle for mbedtls");
            CrtBundleOutcome::Generated(bundle)
        }
        Ok(output) => skip(&format!("generator ended with {:?}", output.outcome)),
        Err(e) => skip(&e.to_string()),
    }
}
