//! Interpreter package bootstrap
//!
//! Before any build step runs, each configured interpreter environment is
//! probed for its required packages (`python -c "import <module>"`, bounded)
//! and the missing ones are installed with one batched, bounded
//! `pip install`. Nothing here is fatal: a failed install is logged and the
//! compile that follows reports the real problem.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use fwrel_exec::{ExecError, ExitOutcome, ToolInvocation, ToolRunner};

use crate::context::BuildContext;
use crate::timeout::TimeoutConfig;

/// Framework name that enables the ESP-IDF environment.
pub const ESPIDF_FRAMEWORK: &str = "espidf";

/// Which interpreter an environment runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterpreterSource {
    /// The interpreter the build driver itself runs on.
    Current,
    /// The isolated ESP-IDF virtualenv under `$PLATFORMIO_HOME/penv`.
    EspidfVenv,
}

/// One isolated environment and the packages it needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentSpec {
    pub name: String,

    pub interpreter: InterpreterSource,

    /// Only bootstrap when the build uses this framework.
    #[serde(default)]
    pub requires_framework: Option<String>,

    /// Package name → module imported to probe for it.
    #[serde(default)]
    pub packages: BTreeMap<String, String>,
}

/// Bootstrap configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    pub environments: Vec<EnvironmentSpec>,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        let packages = |pairs: &[(&str, &str)]| {
            pairs
                .iter()
                .map(|(p, m)| (p.to_string(), m.to_string()))
                .collect()
        };
        Self {
            environments: vec![
                EnvironmentSpec {
                    name: "platformio".to_string(),
                    interpreter: InterpreterSource::Current,
                    requires_framework: None,
                    packages: packages(&[("intelhex", "intelhex")]),
                },
                EnvironmentSpec {
                    name: "espidf".to_string(),
                    interpreter: InterpreterSource::EspidfVenv,
                    requires_framework: Some(ESPIDF_FRAMEWORK.to_string()),
                    packages: packages(&[
                        ("idf-component-manager", "idf_component_manager"),
                        ("esp-idf-kconfig", "kconfgen"),
                        ("cryptography", "cryptography"),
                    ]),
                },
            ],
        }
    }
}

/// Locate the ESP-IDF virtualenv interpreter.
///
/// The venv is the lexicographically last `penv/.espidf-*` directory;
/// None if it or its interpreter is missing.
pub fn find_espidf_python(platformio_home: &Path) -> Option<PathBuf> {
    let penv = platformio_home.join("penv");
    let mut venvs: Vec<PathBuf> = fs::read_dir(&penv)
        .ok()?
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().starts_with(".espidf-"))
        .map(|e| e.path())
        .collect();
    venvs.sort();
    let venv = venvs.pop()?;

    let python = if cfg!(windows) {
        venv.join("Scripts").join("python.exe")
    } else {
        venv.join("bin").join("python")
    };
    python.is_file().then_some(python)
}

/// Why a batched install did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("pip install failed (exit {0})")]
    InstallFailed(i32),

    #[error("pip install was killed by a signal")]
    InstallSignalled,

    #[error("pip install timed out after {0}s")]
    InstallTimedOut(u64),

    #[error("pip install was cancelled")]
    Cancelled,

    #[error(transparent)]
    Exec(#[from] ExecError),
}

/// What happened to one environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BootstrapOutcome {
    /// Every probe succeeded; nothing installed.
    Satisfied,
    /// These packages were missing and installed.
    Installed { packages: Vec<String> },
    /// The install was attempted and did not succeed.
    InstallFailed { packages: Vec<String>, reason: String },
    /// The environment did not apply to this build.
    Skipped { reason: String },
}

/// Per-environment result.
#[derive(Debug, Clone, Serialize)]
pub struct EnvironmentReport {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub interpreter: Option<PathBuf>,

    #[serde(flatten)]
    pub outcome: BootstrapOutcome,
}

/// Result of one bootstrap pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BootstrapReport {
    pub environments: Vec<EnvironmentReport>,
}

impl BootstrapReport {
    /// Any environment left with missing packages.
    pub fn is_degraded(&self) -> bool {
        self.environments
            .iter()
            .any(|e| matches!(e.outcome, BootstrapOutcome::InstallFailed { .. }))
    }

    /// Packages installed across all environments.
    pub fn installed(&self) -> Vec<&str> {
        self.environments
            .iter()
            .flat_map(|e| match &e.outcome {
                BootstrapOutcome::Installed { packages } => packages.as_slice(),
                _ => &[][..],
            })
            .map(String::as_str)
            .collect()
    }
}

/// Probes and installs interpreter packages.
pub struct DependencyBootstrapper<'a> {
    runner: &'a dyn ToolRunner,
    timeouts: TimeoutConfig,
}

impl<'a> DependencyBootstrapper<'a> {
    pub fn new(runner: &'a dyn ToolRunner, timeouts: TimeoutConfig) -> Self {
        Self { runner, timeouts }
    }

    /// Bootstrap every configured environment in order.
    pub fn run(&self, ctx: &BuildContext, config: &BootstrapConfig) -> BootstrapReport {
        let environments = config
            .environments
            .iter()
            .map(|spec| self.ensure(ctx, spec))
            .collect();
        BootstrapReport { environments }
    }

    /// Bootstrap one environment.
    pub fn ensure(&self, ctx: &BuildContext, spec: &EnvironmentSpec) -> EnvironmentReport {
        let skipped = |reason: String| {
            tracing::debug!("skipping {} environment: {}", spec.name, reason);
            EnvironmentReport {
                name: spec.name.clone(),
                interpreter: None,
                outcome: BootstrapOutcome::Skipped { reason },
            }
        };

        if let Some(ref framework) = spec.requires_framework {
            if !ctx.has_framework(framework) {
                return skipped(format!("build does not use the {} framework", framework));
            }
        }

        let python = match spec.interpreter {
            InterpreterSource::Current => ctx.python_exe().to_path_buf(),
            InterpreterSource::EspidfVenv => match find_espidf_python(ctx.platformio_home()) {
                Some(python) => python,
                None => return skipped("no ESP-IDF interpreter found".to_string()),
            },
        };

        let missing: Vec<String> = spec
            .packages
            .iter()
            .filter(|(_, module)| !self.probe(&python, module))
            .map(|(package, _)| package.clone())
            .collect();

        let outcome = if missing.is_empty() {
            BootstrapOutcome::Satisfied
        } else {
            tracing::info!(
                "Installing missing {} Python packages: {}...",
                spec.name,
                missing.join(", ")
            );
            match self.install(&python, &missing) {
                Ok(()) => {
                    tracing::info!("  Installed successfully");
                    BootstrapOutcome::Installed { packages: missing }
                }
                Err(e) => {
                    tracing::warn!("  WARNING: {}. Build may fail.", e);
                    BootstrapOutcome::InstallFailed {
                        packages: missing,
                        reason: e.to_string(),
                    }
                }
            }
        };

        EnvironmentReport {
            name: spec.name.clone(),
            interpreter: Some(python),
            outcome,
        }
    }

    /// Whether `module` imports in `python`. Timeouts and spawn failures
    /// count as missing.
    fn probe(&self, python: &Path, module: &str) -> bool {
        let invocation = ToolInvocation::new(python)
            .args(["-c", &format!("import {}", module)])
            .timeout(self.timeouts.probe());
        match self.runner.run(&invocation) {
            Ok(output) => output.success(),
            Err(e) => {
                tracing::debug!("probe for {} failed to start: {}", module, e);
                false
            }
        }
    }

    fn install(&self, python: &Path, packages: &[String]) -> Result<(), BootstrapError> {
        let invocation = ToolInvocation::new(python)
            .args(["-m", "pip", "install", "--quiet"])
            .args(packages.iter().cloned())
            .timeout(self.timeouts.install());
        let output = self.runner.run(&invocation)?;
        match output.outcome {
            ExitOutcome::Exited(0) => Ok(()),
            ExitOutcome::Exited(code) => Err(BootstrapError::InstallFailed(code)),
            ExitOutcome::Signalled => Err(BootstrapError::InstallSignalled),
            ExitOutcome::TimedOut => Err(BootstrapError::InstallTimedOut(
                self.timeouts.install_seconds,
            )),
            ExitOutcome::Cancelled => Err(BootstrapError::Cancelled),
        }
    }
}
