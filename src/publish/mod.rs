//! Publish orchestration
//!
//! A publish cycle turns the build outputs into the webtools release: the
//! merged image, the OTA copy of the application, and the manifest. Every
//! cycle starts by removing the previous cycle's outputs, so a failure part
//! way through never leaves an older image next to a newer manifest.
//!
//! The manifest's descriptive fields are read into memory before the file is
//! removed and carried into the new one.

mod state;
mod targets;

pub use state::{InvalidTransition, PublishRun, PublishState};
pub use targets::{target_registrations, PublishTarget, TargetRegistration, UnknownTarget};

use std::io;
use std::path::{Path, PathBuf};

use fwrel_exec::{CancelToken, ToolRunner};

use crate::config::{ConfigError, ReleaseConfig};
use crate::context::BuildContext;
use crate::fsutil;
use crate::image::{BinaryMerger, FirmwareImageSet, MergeError, MergedArtifacts};
use crate::manifest::{Manifest, ManifestError, ManifestWriter, ReleaseVersion};
use crate::signal::EXIT_CODE_CANCELLED;
use crate::testrun::{IntegrationTestRunner, TestRunError, TestRunResult};

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("cannot publish: {0}")]
    Precondition(#[source] ManifestError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error(transparent)]
    Manifest(ManifestError),

    #[error("Integration tests failed with exit code {0}")]
    TestsFailed(i32),

    #[error(transparent)]
    Tests(#[from] TestRunError),

    #[error("failed to remove stale artifact {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("publish cancelled")]
    Cancelled,

    #[error(transparent)]
    Transition(#[from] InvalidTransition),
}

impl PublishError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            PublishError::Config(_) => 1,
            PublishError::Precondition(_) => 2,
            PublishError::Merge(MergeError::MissingInput { .. }) => 2,
            PublishError::Merge(MergeError::Cancelled) => EXIT_CODE_CANCELLED,
            PublishError::Merge(_) => 3,
            PublishError::Manifest(_) => 4,
            PublishError::TestsFailed(_) => 5,
            PublishError::Tests(TestRunError::Cancelled) => EXIT_CODE_CANCELLED,
            PublishError::Tests(_) => 5,
            PublishError::Io { .. } => 1,
            PublishError::Cancelled => EXIT_CODE_CANCELLED,
            PublishError::Transition(_) => 1,
        }
    }
}

/// What a completed cycle produced.
#[derive(Debug, Clone)]
pub struct PublishReport {
    pub target: PublishTarget,
    pub version: ReleaseVersion,
    pub artifacts: MergedArtifacts,
    pub manifest_path: PathBuf,
    pub manifest: Manifest,
    /// Previous-cycle files that were removed.
    pub removed: Vec<PathBuf>,
    pub tests: Option<TestRunResult>,
}

/// Drives one publish cycle through [`PublishState`].
pub struct PublishOrchestrator<'a> {
    ctx: &'a BuildContext,
    config: &'a ReleaseConfig,
    runner: &'a dyn ToolRunner,
    cancel: Option<CancelToken>,
    run: PublishRun,
}

impl<'a> PublishOrchestrator<'a> {
    pub fn new(ctx: &'a BuildContext, config: &'a ReleaseConfig, runner: &'a dyn ToolRunner) -> Self {
        Self {
            ctx,
            config,
            runner,
            cancel: None,
            run: PublishRun::new(),
        }
    }

    /// Stop between steps once `token` is cancelled.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn state(&self) -> PublishState {
        self.run.state()
    }

    pub fn run(&self) -> &PublishRun {
        &self.run
    }

    pub fn build_and_publish(&mut self) -> Result<PublishReport, PublishError> {
        self.publish(PublishTarget::Package)
    }

    /// Run the integration suite and publish only if it passes.
    pub fn verify_and_publish(&mut self) -> Result<PublishReport, PublishError> {
        self.publish(PublishTarget::VerifyAndPublish)
    }

    pub fn publish(&mut self, target: PublishTarget) -> Result<PublishReport, PublishError> {
        let span = tracing::info_span!("publish", target = %target);
        let _enter = span.enter();

        let result = self.drive(target);
        if let Err(e) = &result {
            self.run.fail();
            tracing::error!("{} failed: {}", target, e);
        }
        result
    }

    fn drive(&mut self, target: PublishTarget) -> Result<PublishReport, PublishError> {
        let (ctx, config, runner) = (self.ctx, self.config, self.runner);
        let header = ctx.subst_path(&config.build_info.header);
        let merged = config.output.merged_path(ctx);
        let ota = config.output.ota_path(ctx);
        let manifest_path = config.output.manifest_path(ctx);

        let (_, version) =
            ReleaseVersion::from_header(&header).map_err(PublishError::Precondition)?;
        tracing::debug!("publishing release {}", version);

        let tests = if target.runs_tests() {
            self.run.transition(PublishState::TestGating)?;
            let span = tracing::info_span!("tests");
            let _enter = span.enter();
            let result = IntegrationTestRunner::new(runner, &config.tests).run(ctx)?;
            if !result.passed() {
                return Err(PublishError::TestsFailed(result.exit_code));
            }
            tracing::info!("Integration tests passed in {:.1}s", result.duration.as_secs_f64());
            Some(result)
        } else {
            None
        };
        self.check_cancelled()?;

        tracing::info!("Running build-and-publish webtools step...");
        self.run.transition(PublishState::ClearingStaleArtifacts)?;
        let prior = Manifest::load_lenient(&manifest_path);
        let removed = clear_stale(&[ota.as_path(), merged.as_path(), manifest_path.as_path()])?;
        self.check_cancelled()?;

        self.run.transition(PublishState::Merging)?;
        let artifacts = {
            let span = tracing::info_span!("merge");
            let _enter = span.enter();
            let images = FirmwareImageSet::from_config(ctx, &config.image);
            BinaryMerger::new(runner, &config.image).merge(ctx, &images, &merged, &ota)?
        };

        self.run.transition(PublishState::WritingManifest)?;
        let written = {
            let span = tracing::info_span!("manifest");
            let _enter = span.enter();
            ManifestWriter::new(&config.manifest).write_with_prior(&header, &manifest_path, prior)
        };
        let manifest = match written {
            Ok(manifest) => manifest,
            Err(e) => {
                if let Err(rm) = artifacts.remove() {
                    tracing::warn!("could not remove merged outputs after manifest failure: {}", rm);
                }
                return Err(PublishError::Manifest(e));
            }
        };

        self.run.transition(PublishState::Done)?;
        tracing::info!("Published webtools release {}", version);

        Ok(PublishReport {
            target,
            version,
            artifacts,
            manifest_path,
            manifest,
            removed,
            tests,
        })
    }

    fn check_cancelled(&self) -> Result<(), PublishError> {
        match &self.cancel {
            Some(token) if token.is_cancelled() => Err(PublishError::Cancelled),
            _ => Ok(()),
        }
    }
}

/// Remove whichever of `paths` exist, returning the removed ones.
fn clear_stale(paths: &[&Path]) -> Result<Vec<PathBuf>, PublishError> {
    let mut removed = Vec::new();
    for path in paths {
        let existed = fsutil::remove_if_exists(path).map_err(|source| PublishError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if existed {
            tracing::info!("Removed stale webtools artifact: {}", path.display());
            removed.push(path.to_path_buf());
        }
    }
    Ok(removed)
}
