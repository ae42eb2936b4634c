//! fwrel CLI
//!
//! Entry point for the `fwrel` command-line tool. The build driver calls
//! `fwrel prebuild` before each compile and one of the publish subcommands
//! for the custom targets; the rest are for operators.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

use fwrel::assets::AssetCompressor;
use fwrel::build_info::{BuildMetadataWriter, HeaderUpdate};
use fwrel::config::EffectiveConfig;
use fwrel::manifest::ManifestWriter;
use fwrel::publish::{target_registrations, PublishOrchestrator, PublishTarget};
use fwrel::signal::{SignalHandler, EXIT_CODE_CANCELLED};
use fwrel::{
    classify, BuildContext, BuildInvocation, CancelToken, PrebuildHook, ReleaseConfig,
    SystemRunner,
};

#[derive(Parser)]
#[command(name = "fwrel")]
#[command(about = "Firmware release lane: pre-build metadata, image merge, manifest, test-gated publish", version)]
struct Cli {
    /// Log at debug level (RUST_LOG overrides)
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Emit logs as newline-delimited JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pre-build hook: bootstrap, compress assets, update the build header
    Prebuild {
        #[command(flatten)]
        context: ContextArgs,
    },

    /// Explain whether an invocation counts as a compile
    Classify {
        /// Output in human-readable format instead of JSON
        #[arg(long)]
        human: bool,

        #[command(flatten)]
        context: ContextArgs,
    },

    /// Gzip the web assets
    Compress {
        /// Recompress even if outputs are newer than their sources
        #[arg(long)]
        force: bool,

        #[command(flatten)]
        context: ContextArgs,
    },

    /// Update the build timestamp header
    BuildInfo {
        /// Rewrite even if no tracked source changed
        #[arg(long)]
        force: bool,

        #[command(flatten)]
        context: ContextArgs,
    },

    /// Merge images and write the manifest (package_webtools)
    Package {
        #[command(flatten)]
        context: ContextArgs,
    },

    /// Run the integration suite, then package (verify_and_publish_webtools)
    VerifyAndPublish {
        #[command(flatten)]
        context: ContextArgs,
    },

    /// Write the manifest only
    Manifest {
        #[command(flatten)]
        context: ContextArgs,
    },

    /// Print the custom target registrations as JSON
    Targets {
        #[command(flatten)]
        context: ContextArgs,
    },

    /// Print the effective configuration and its sources
    Config {
        #[command(flatten)]
        context: ContextArgs,
    },
}

/// What the build driver knows about the current invocation.
#[derive(Args, Debug, Clone)]
struct ContextArgs {
    /// Project root
    #[arg(long, env = "PROJECT_DIR", default_value = ".")]
    project_dir: PathBuf,

    /// Build output directory (default: .pio/build/<env>)
    #[arg(long, env = "BUILD_DIR")]
    build_dir: Option<PathBuf>,

    /// Interpreter used by the build driver
    #[arg(long = "python", env = "PYTHONEXE")]
    python: Option<PathBuf>,

    /// Build flag string, scanned for DEBUG/RELEASE defines
    #[arg(long, env = "BUILD_FLAGS", default_value = "", allow_hyphen_values = true)]
    build_flags: String,

    /// Requested build targets (repeatable, comma separated)
    #[arg(long = "target", short = 't')]
    targets: Vec<String>,

    /// The driver runs in clean mode
    #[arg(long)]
    clean: bool,

    /// The driver is only scanning the project for an IDE
    #[arg(long)]
    integration_dump: bool,

    /// Frameworks of the current environment (comma separated)
    #[arg(long = "framework", env = "PIOFRAMEWORK", value_delimiter = ',')]
    frameworks: Vec<String>,

    /// Build environment name
    #[arg(long, env = "PIOENV")]
    env_name: Option<String>,

    /// PlatformIO home (default: ~/.platformio)
    #[arg(long, env = "PLATFORMIO_HOME")]
    platformio_home: Option<PathBuf>,

    /// Path to repo config file (default: .fwrel/release.toml)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,
}

impl ContextArgs {
    fn context(&self) -> BuildContext {
        let project_dir =
            std::fs::canonicalize(&self.project_dir).unwrap_or_else(|_| self.project_dir.clone());
        let invocation = BuildInvocation::new(&self.targets, self.clean)
            .with_integration_dump(self.integration_dump);

        let mut builder = BuildContext::builder(project_dir)
            .build_flags(self.build_flags.as_str())
            .invocation(invocation)
            .frameworks(self.frameworks.iter().map(|f| f.trim().to_string()));
        if let Some(ref dir) = self.build_dir {
            builder = builder.build_dir(dir);
        }
        if let Some(ref python) = self.python {
            builder = builder.python_exe(python);
        }
        if let Some(ref env) = self.env_name {
            builder = builder.env_name(env.as_str());
        }
        if let Some(ref home) = self.platformio_home {
            builder = builder.platformio_home(home);
        }
        builder.build()
    }

    fn effective_config(&self, ctx: &BuildContext) -> EffectiveConfig {
        match EffectiveConfig::load(ctx.project_dir(), self.config.as_deref()) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Configuration error: {}", e);
                process::exit(1);
            }
        }
    }

    /// Context plus validated configuration; exits on config errors.
    fn load(&self) -> (BuildContext, ReleaseConfig) {
        let ctx = self.context();
        match self.effective_config(&ctx).release_config() {
            Ok(config) => (ctx, config),
            Err(e) => {
                eprintln!("Configuration error: {}", e);
                process::exit(1);
            }
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let code = match cli.command {
        Commands::Prebuild { context } => run_prebuild(&context),
        Commands::Classify { human, context } => run_classify(&context, human),
        Commands::Compress { force, context } => run_compress(&context, force),
        Commands::BuildInfo { force, context } => run_build_info(&context, force),
        Commands::Package { context } => run_publish(&context, PublishTarget::Package),
        Commands::VerifyAndPublish { context } => {
            run_publish(&context, PublishTarget::VerifyAndPublish)
        }
        Commands::Manifest { context } => run_manifest(&context),
        Commands::Targets { context } => run_targets(&context),
        Commands::Config { context } => run_config(&context),
    };
    process::exit(code);
}

fn init_tracing(verbose: bool, json: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Runner whose children die on Ctrl-C.
fn interruptible_runner() -> (SystemRunner, CancelToken) {
    let token = CancelToken::new();
    if let Err(e) = SignalHandler::new(token.clone()).install() {
        tracing::warn!("Could not install interrupt handler: {}", e);
    }
    (SystemRunner::new().with_cancel(token.clone()), token)
}

fn run_prebuild(args: &ContextArgs) -> i32 {
    let (ctx, config) = args.load();
    let (runner, token) = interruptible_runner();

    let report = PrebuildHook::new(&ctx, &config, &runner)
        .with_cancel(token)
        .run();
    if report.cancelled {
        EXIT_CODE_CANCELLED
    } else {
        0
    }
}

fn run_classify(args: &ContextArgs, human: bool) -> i32 {
    let (ctx, config) = args.load();
    let classification = classify(ctx.invocation(), &config.classifier);

    if human {
        println!("{}", classification.to_human());
    } else {
        match classification.to_json() {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error serializing output: {}", e);
                return 1;
            }
        }
    }

    if classification.is_compile() {
        0
    } else {
        1
    }
}

fn run_compress(args: &ContextArgs, force: bool) -> i32 {
    let (ctx, config) = args.load();
    let compressor = AssetCompressor::from_config(&ctx, &config.assets).force(force);

    match compressor.run() {
        Ok(report) => {
            print!("{}", report.size_table());
            println!("{}", report.summary());
            0
        }
        Err(e) => {
            eprintln!("Compression failed: {}", e);
            1
        }
    }
}

fn run_build_info(args: &ContextArgs, force: bool) -> i32 {
    let (ctx, config) = args.load();
    let result = BuildMetadataWriter::from_config(&ctx, &config.build_info)
        .and_then(|writer| writer.update(force));

    match result {
        Ok(HeaderUpdate::Written { timestamp, reason }) => {
            println!("BUILD_DATE_TIME {} ({:?})", timestamp, reason);
            0
        }
        Ok(HeaderUpdate::Skipped) => {
            println!("Build info header is current");
            0
        }
        Err(e) => {
            eprintln!("Build info update failed: {}", e);
            1
        }
    }
}

fn run_publish(args: &ContextArgs, target: PublishTarget) -> i32 {
    let (ctx, config) = args.load();
    let (runner, token) = interruptible_runner();

    let mut orchestrator = PublishOrchestrator::new(&ctx, &config, &runner).with_cancel(token);
    match orchestrator.publish(target) {
        Ok(report) => {
            println!("Published {} ({})", report.version, target);
            println!("  merged:   {}", report.artifacts.merged.display());
            println!("  ota:      {}", report.artifacts.ota.display());
            println!("  manifest: {}", report.manifest_path.display());
            0
        }
        Err(e) => {
            eprintln!("{} failed: {}", target, e);
            e.exit_code()
        }
    }
}

fn run_manifest(args: &ContextArgs) -> i32 {
    let (ctx, config) = args.load();
    let header = ctx.subst_path(&config.build_info.header);
    let path = config.output.manifest_path(&ctx);

    match ManifestWriter::new(&config.manifest).write(&header, &path) {
        Ok(manifest) => {
            println!(
                "Wrote {} ({})",
                path.display(),
                manifest.version.as_deref().unwrap_or_default()
            );
            0
        }
        Err(e) => {
            eprintln!("Manifest not written: {}", e);
            4
        }
    }
}

fn run_targets(args: &ContextArgs) -> i32 {
    let (_, config) = args.load();
    match serde_json::to_string_pretty(&target_registrations(&config.image)) {
        Ok(json) => {
            println!("{}", json);
            0
        }
        Err(e) => {
            eprintln!("Error serializing output: {}", e);
            1
        }
    }
}

fn run_config(args: &ContextArgs) -> i32 {
    let ctx = args.context();
    let effective = args.effective_config(&ctx);
    match effective.to_json() {
        Ok(json) => {
            println!("{}", json);
            0
        }
        Err(e) => {
            eprintln!("Error serializing output: {}", e);
            1
        }
    }
}
