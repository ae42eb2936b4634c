//! The pre-build hook
//!
//! Runs before every build-driver invocation. Non-compile invocations
//! (clean, IDE scans, metadata queries) return after classification so they
//! never touch the tree. Compile invocations run, in order: dependency
//! bootstrap, web asset compression, certificate bundle pre-generation, and
//! the build timestamp header. None of these can fail the build; failures
//! are logged and recorded in the report.

use fwrel_classifier::{classify, Classification, MatchedRule};
use fwrel_exec::{CancelToken, ToolRunner};

use crate::assets::{AssetCompressor, CompressionReport};
use crate::bootstrap::{BootstrapReport, DependencyBootstrapper};
use crate::build_info::{BuildMetadataWriter, HeaderUpdate};
use crate::config::ReleaseConfig;
use crate::context::{BuildContext, BuildType};
use crate::crt_bundle::{ensure_crt_bundle, CrtBundleOutcome};

/// Result of a best-effort step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome<T> {
    NotRun,
    Done(T),
    /// Failed; the build continues without it.
    Failed(String),
}

impl<T> StepOutcome<T> {
    pub fn is_failed(&self) -> bool {
        matches!(self, StepOutcome::Failed(_))
    }

    pub fn done(&self) -> Option<&T> {
        match self {
            StepOutcome::Done(value) => Some(value),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PrebuildReport {
    pub classification: Classification,
    pub build_type: BuildType,
    pub bootstrap: StepOutcome<BootstrapReport>,
    pub assets: StepOutcome<CompressionReport>,
    pub crt_bundle: StepOutcome<CrtBundleOutcome>,
    pub header: StepOutcome<HeaderUpdate>,
    /// An interrupt stopped the hook between steps.
    pub cancelled: bool,
}

impl PrebuildReport {
    fn new(classification: Classification, build_type: BuildType) -> Self {
        Self {
            classification,
            build_type,
            bootstrap: StepOutcome::NotRun,
            assets: StepOutcome::NotRun,
            crt_bundle: StepOutcome::NotRun,
            header: StepOutcome::NotRun,
            cancelled: false,
        }
    }

    /// Whether the hook went past classification.
    pub fn mutated(&self) -> bool {
        self.classification.is_compile()
    }
}

pub struct PrebuildHook<'a> {
    ctx: &'a BuildContext,
    config: &'a ReleaseConfig,
    runner: &'a dyn ToolRunner,
    cancel: Option<CancelToken>,
}

impl<'a> PrebuildHook<'a> {
    pub fn new(ctx: &'a BuildContext, config: &'a ReleaseConfig, runner: &'a dyn ToolRunner) -> Self {
        Self {
            ctx,
            config,
            runner,
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn run(&self) -> PrebuildReport {
        let span = tracing::info_span!("prebuild");
        let _enter = span.enter();

        let classification = classify(self.ctx.invocation(), &self.config.classifier);
        let mut report = PrebuildReport::new(classification, self.ctx.build_type());

        if !report.classification.is_compile() {
            if report.classification.rule == MatchedRule::IntegrationDump {
                tracing::info!("IDE integration scan: registering custom targets only");
            } else {
                tracing::info!("Skipping pre-build mutations for non-compile target(s)");
            }
            return report;
        }
        tracing::info!("Build type: {}", report.build_type);

        report.bootstrap = StepOutcome::Done(self.bootstrap());
        if self.stop(&mut report) {
            return report;
        }

        report.assets = self.compress_assets();
        if self.stop(&mut report) {
            return report;
        }

        report.crt_bundle = StepOutcome::Done(ensure_crt_bundle(
            self.ctx,
            &self.config.crt_bundle,
            &self.config.timeouts,
            self.runner,
        ));
        if self.stop(&mut report) {
            return report;
        }

        report.header = self.update_header();
        report
    }

    fn bootstrap(&self) -> BootstrapReport {
        let span = tracing::info_span!("bootstrap");
        let _enter = span.enter();
        DependencyBootstrapper::new(self.runner, self.config.timeouts)
            .run(self.ctx, &self.config.bootstrap)
    }

    fn compress_assets(&self) -> StepOutcome<CompressionReport> {
        let span = tracing::info_span!("assets");
        let _enter = span.enter();
        match AssetCompressor::from_config(self.ctx, &self.config.assets).run() {
            Ok(report) => {
                tracing::info!("{}", report.summary());
                StepOutcome::Done(report)
            }
            Err(e) => {
                tracing::warn!("Web asset compression failed: {}", e);
                StepOutcome::Failed(e.to_string())
            }
        }
    }

    fn update_header(&self) -> StepOutcome<HeaderUpdate> {
        let span = tracing::info_span!("build_info");
        let _enter = span.enter();
        let result = BuildMetadataWriter::from_config(self.ctx, &self.config.build_info)
            .and_then(|writer| writer.update(false));
        match result {
            Ok(update) => StepOutcome::Done(update),
            Err(e) => {
                tracing::warn!("Build info header not updated: {}", e);
                StepOutcome::Failed(e.to_string())
            }
        }
    }

    fn stop(&self, report: &mut PrebuildReport) -> bool {
        let cancelled = self.cancel.as_ref().is_some_and(CancelToken::is_cancelled);
        if cancelled {
            tracing::warn!("Pre-build step interrupted");
            report.cancelled = true;
        }
        cancelled
    }
}
