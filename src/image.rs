//! Firmware image assembly
//!
//! Three raw build outputs (bootloader, partition table, application) are
//! combined by the external merge utility into one flashable image at
//! fixed flash offsets, and the application is copied verbatim as the OTA
//! image. All three inputs must exist before the tool is invoked.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use fwrel_exec::{ExecError, ExitOutcome, ToolInvocation, ToolRunner};

use crate::config::{
    DEFAULT_APPLICATION, DEFAULT_BOOTLOADER, DEFAULT_CHIP, DEFAULT_FLASH_FREQ,
    DEFAULT_FLASH_MODE, DEFAULT_FLASH_SIZE, DEFAULT_MERGE_COMMAND, DEFAULT_PARTITIONS,
};
use crate::context::BuildContext;
use crate::fsutil;

/// One raw input and where it lands in flash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentConfig {
    /// File name under the build directory.
    pub file: String,
    pub offset: u32,
}

impl SegmentConfig {
    fn new((file, offset): (&str, u32)) -> Self {
        Self {
            file: file.to_string(),
            offset,
        }
    }
}

/// Merge utility parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub chip: String,
    pub flash_mode: String,
    pub flash_freq: String,
    pub flash_size: String,

    /// Program and leading arguments; `$VAR` references are expanded.
    pub merge_command: Vec<String>,

    pub bootloader: SegmentConfig,
    pub partitions: SegmentConfig,
    pub application: SegmentConfig,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            chip: DEFAULT_CHIP.to_string(),
            flash_mode: DEFAULT_FLASH_MODE.to_string(),
            flash_freq: DEFAULT_FLASH_FREQ.to_string(),
            flash_size: DEFAULT_FLASH_SIZE.to_string(),
            merge_command: DEFAULT_MERGE_COMMAND.iter().map(|s| s.to_string()).collect(),
            bootloader: SegmentConfig::new(DEFAULT_BOOTLOADER),
            partitions: SegmentConfig::new(DEFAULT_PARTITIONS),
            application: SegmentConfig::new(DEFAULT_APPLICATION),
        }
    }
}

impl ImageConfig {
    /// Segments in flash order.
    pub fn segments(&self) -> [&SegmentConfig; 3] {
        [&self.bootloader, &self.partitions, &self.application]
    }
}

/// Role of a segment in the merged image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentRole {
    Bootloader,
    PartitionTable,
    Application,
}

impl fmt::Display for SegmentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegmentRole::Bootloader => write!(f, "bootloader"),
            SegmentRole::PartitionTable => write!(f, "partition table"),
            SegmentRole::Application => write!(f, "application"),
        }
    }
}

/// Render an offset the way the merge utility expects (`0x0000`, `0x10000`).
pub fn format_offset(offset: u32) -> String {
    format!("{:#06x}", offset)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSegment {
    pub role: SegmentRole,
    pub path: PathBuf,
    pub offset: u32,
}

/// The three required inputs, in ascending offset order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImageSet {
    segments: [ImageSegment; 3],
}

impl FirmwareImageSet {
    pub fn from_config(ctx: &BuildContext, config: &ImageConfig) -> Self {
        let segment = |role, seg: &SegmentConfig| ImageSegment {
            role,
            path: ctx.build_dir().join(ctx.subst(&seg.file)),
            offset: seg.offset,
        };
        Self {
            segments: [
                segment(SegmentRole::Bootloader, &config.bootloader),
                segment(SegmentRole::PartitionTable, &config.partitions),
                segment(SegmentRole::Application, &config.application),
            ],
        }
    }

    pub fn segments(&self) -> &[ImageSegment] {
        &self.segments
    }

    pub fn application(&self) -> &ImageSegment {
        &self.segments[2]
    }

    /// Fail on the first missing input.
    pub fn verify(&self) -> Result<(), MergeError> {
        match self.segments.iter().find(|s| !s.path.is_file()) {
            Some(missing) => Err(MergeError::MissingInput {
                role: missing.role,
                path: missing.path.clone(),
            }),
            None => Ok(()),
        }
    }
}

/// The two outputs of a successful merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedArtifacts {
    pub merged: PathBuf,
    pub ota: PathBuf,
}

impl MergedArtifacts {
    /// Remove both outputs (used when a later step fails).
    pub fn remove(&self) -> io::Result<()> {
        fsutil::remove_if_exists(&self.merged)?;
        fsutil::remove_if_exists(&self.ota)?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("required {role} binary missing: {path}")]
    MissingInput { role: SegmentRole, path: PathBuf },

    #[error("merge command is empty")]
    EmptyCommand,

    #[error("failed to run merge tool `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: ExecError,
    },

    #[error("merge tool exited with code {code}: {command}")]
    ToolExit { command: String, code: i32 },

    #[error("merge tool did not finish ({reason}): {command}")]
    ToolAborted { command: String, reason: String },

    #[error("merge cancelled")]
    Cancelled,

    #[error("merge tool reported success but wrote no image at {0}")]
    NoOutput(PathBuf),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl MergeError {
    fn io(path: &Path) -> impl FnOnce(io::Error) -> MergeError {
        let path = path.to_path_buf();
        move |source| MergeError::Io { path, source }
    }
}

/// Drives the external merge utility.
pub struct BinaryMerger<'a> {
    runner: &'a dyn ToolRunner,
    config: &'a ImageConfig,
}

impl<'a> BinaryMerger<'a> {
    pub fn new(runner: &'a dyn ToolRunner, config: &'a ImageConfig) -> Self {
        Self { runner, config }
    }

    /// The full merge command writing to `output`.
    pub fn command(
        &self,
        ctx: &BuildContext,
        images: &FirmwareImageSet,
        output: &Path,
    ) -> Result<ToolInvocation, MergeError> {
        let (program, prefix) = self
            .config
            .merge_command
            .split_first()
            .ok_or(MergeError::EmptyCommand)?;

        let mut invocation = ToolInvocation::new(ctx.subst(program))
            .args(prefix.iter().map(|a| ctx.subst(a)))
            .args(["--chip", self.config.chip.as_str(), "merge_bin", "-o"])
            .arg(output.display().to_string())
            .args([
                "--flash_mode",
                self.config.flash_mode.as_str(),
                "--flash_freq",
                self.config.flash_freq.as_str(),
                "--flash_size",
                self.config.flash_size.as_str(),
            ]);
        for segment in images.segments() {
            invocation = invocation
                .arg(format_offset(segment.offset))
                .arg(segment.path.display().to_string());
        }
        Ok(invocation)
    }

    /// Merge into `merged` and copy the application to `ota`.
    ///
    /// The tool writes to a temp sibling that is renamed on success, so a
    /// failed merge never leaves a partial image at `merged`.
    pub fn merge(
        &self,
        ctx: &BuildContext,
        images: &FirmwareImageSet,
        merged: &Path,
        ota: &Path,
    ) -> Result<MergedArtifacts, MergeError> {
        tracing::info!("Preparing to merge firmware binaries...");
        images.verify()?;

        if let Some(parent) = merged.parent() {
            fs::create_dir_all(parent).map_err(MergeError::io(parent))?;
        }
        let temp = fsutil::tmp_sibling(merged);
        fsutil::remove_if_exists(&temp).map_err(MergeError::io(&temp))?;

        let invocation = self.command(ctx, images, &temp)?;
        let command = invocation.to_string();
        tracing::info!("Merging firmware binaries with the following command: {}", command);

        let output = self
            .runner
            .run_streaming(&invocation, &mut |line| tracing::debug!("{}", line))
            .map_err(|source| MergeError::Spawn {
                command: command.clone(),
                source,
            })?;

        let failure = match output.outcome {
            ExitOutcome::Exited(0) => None,
            ExitOutcome::Exited(code) => Some(MergeError::ToolExit { command, code }),
            ExitOutcome::Cancelled => Some(MergeError::Cancelled),
            other => Some(MergeError::ToolAborted {
                command,
                reason: format!("{:?}", other).to_lowercase(),
            }),
        };
        if let Some(err) = failure {
            let _ = fsutil::remove_if_exists(&temp);
            if !output.output.is_empty() {
                tracing::error!("merge tool output:\n{}", output.output);
            }
            return Err(err);
        }
        if !temp.is_file() {
            return Err(MergeError::NoOutput(merged.to_path_buf()));
        }
        fsutil::commit(&temp, merged).map_err(MergeError::io(merged))?;
        tracing::info!("Merged firmware created at: {}", merged.display());

        let app = &images.application().path;
        if let Err(source) = fsutil::copy_atomic(app, ota) {
            // no OTA image means no release: drop the merged image too
            let _ = fsutil::remove_if_exists(merged);
            return Err(MergeError::Io {
                path: ota.to_path_buf(),
                source,
            });
        }
        tracing::info!("Copied {} to: {}", app.display(), ota.display());

        Ok(MergedArtifacts {
            merged: merged.to_path_buf(),
            ota: ota.to_path_buf(),
        })
    }
}
