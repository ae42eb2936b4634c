//! Build timestamp header
//!
//! `include/build_info.h` holds one line, `#define BUILD_DATE_TIME
//! "YYMMDD:HHMM"`, and is the only source of the release tag. It is
//! rewritten only when a tracked source or config file is strictly newer
//! than it, so unchanged trees keep both the header's content and its
//! mtime (and the compiler does not rebuild everything that includes it).

use chrono::{DateTime, Local, TimeZone};
use globset::{GlobBuilder, GlobMatcher};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::SystemTime;
use walkdir::WalkDir;

use crate::config::{DEFAULT_HEADER, DEFAULT_TRACKED_CONFIG_FILES, DEFAULT_TRACKED_SOURCES};
use crate::context::BuildContext;
use crate::fsutil;

/// Macro the header defines.
pub const TIMESTAMP_MACRO: &str = "BUILD_DATE_TIME";

/// `strftime` format of the timestamp.
pub const TIMESTAMP_FORMAT: &str = "%y%m%d:%H%M";

/// A glob evaluated under one source root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedPattern {
    /// Directory relative to the project; skipped if absent.
    pub root: String,

    /// Glob relative to `root`. `*` does not cross directories; use `**/`.
    pub pattern: String,
}

/// What the header tracks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildInfoConfig {
    pub header: String,
    pub sources: Vec<TrackedPattern>,
    pub config_files: Vec<String>,
}

impl Default for BuildInfoConfig {
    fn default() -> Self {
        Self {
            header: DEFAULT_HEADER.to_string(),
            sources: DEFAULT_TRACKED_SOURCES
                .iter()
                .map(|(root, pattern)| TrackedPattern {
                    root: root.to_string(),
                    pattern: pattern.to_string(),
                })
                .collect(),
            config_files: DEFAULT_TRACKED_CONFIG_FILES
                .iter()
                .map(|f| f.to_string())
                .collect(),
        }
    }
}

/// A `YYMMDD:HHMM` build timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuildTimestamp(String);

impl BuildTimestamp {
    /// Capture the local wall-clock time.
    pub fn now() -> Self {
        Self::from_datetime(&Local::now())
    }

    pub fn from_datetime<Tz: TimeZone>(at: &DateTime<Tz>) -> Self
    where
        Tz::Offset: fmt::Display,
    {
        Self(at.format(TIMESTAMP_FORMAT).to_string())
    }

    /// Accept only the exact `YYMMDD:HHMM` shape.
    pub fn parse(raw: &str) -> Option<Self> {
        let valid = raw.len() == 11
            && raw.char_indices().all(|(i, c)| match i {
                6 => c == ':',
                _ => c.is_ascii_digit(),
            });
        valid.then(|| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The header file contents.
    pub fn header_line(&self) -> String {
        format!("#define {} \"{}\"\n", TIMESTAMP_MACRO, self.0)
    }
}

impl fmt::Display for BuildTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn timestamp_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"BUILD_DATE_TIME\s+"([^"]+)""#).expect("timestamp pattern is a valid regex")
    })
}

/// Extract the quoted timestamp from header contents.
///
/// Returns the raw string between the quotes; the caller decides whether
/// its shape is acceptable.
pub fn parse_header(contents: &str) -> Option<&str> {
    timestamp_pattern()
        .captures(contents)?
        .get(1)
        .map(|m| m.as_str())
}

#[derive(Debug, thiserror::Error)]
pub enum BuildInfoError {
    #[error("invalid tracked pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Why the header is (or is not) out of date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Staleness {
    /// No header yet.
    Missing,
    /// This tracked file is newer than the header.
    NewerInput(PathBuf),
    /// Nothing tracked is newer.
    Current,
}

impl Staleness {
    pub fn is_stale(&self) -> bool {
        !matches!(self, Staleness::Current)
    }
}

/// Result of one `update` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderUpdate {
    Written {
        timestamp: BuildTimestamp,
        reason: Staleness,
    },
    Skipped,
}

struct CompiledPattern {
    root: PathBuf,
    matcher: GlobMatcher,
    recursive: bool,
}

/// Maintains the build timestamp header.
pub struct BuildMetadataWriter {
    header: PathBuf,
    patterns: Vec<CompiledPattern>,
    config_files: Vec<PathBuf>,
}

impl BuildMetadataWriter {
    pub fn from_config(ctx: &BuildContext, config: &BuildInfoConfig) -> Result<Self, BuildInfoError> {
        let mut patterns = Vec::with_capacity(config.sources.len());
        for tracked in &config.sources {
            let glob = GlobBuilder::new(&tracked.pattern)
                .literal_separator(true)
                .build()
                .map_err(|source| BuildInfoError::Pattern {
                    pattern: tracked.pattern.clone(),
                    source,
                })?;
            patterns.push(CompiledPattern {
                root: ctx.subst_path(&tracked.root),
                matcher: glob.compile_matcher(),
                recursive: tracked.pattern.contains('/'),
            });
        }

        Ok(Self {
            header: ctx.subst_path(&config.header),
            patterns,
            config_files: config
                .config_files
                .iter()
                .map(|f| ctx.subst_path(f))
                .collect(),
        })
    }

    pub fn header_path(&self) -> &Path {
        &self.header
    }

    /// Evaluate the update predicate against current mtimes.
    pub fn staleness(&self) -> Staleness {
        let Some(header_mtime) = fsutil::mtime(&self.header) else {
            return Staleness::Missing;
        };
        let header_id = identity(&self.header);

        for tracked in &self.patterns {
            if !tracked.root.is_dir() {
                continue;
            }
            let mut walker = WalkDir::new(&tracked.root).follow_links(true);
            if !tracked.recursive {
                walker = walker.max_depth(1);
            }
            for entry in walker.into_iter().filter_map(Result::ok) {
                if !entry.file_type().is_file() {
                    continue;
                }
                let Ok(rel) = entry.path().strip_prefix(&tracked.root) else {
                    continue;
                };
                if !tracked.matcher.is_match(rel) {
                    continue;
                }
                if identity(entry.path()) == header_id {
                    continue;
                }
                if is_newer(entry.path(), header_mtime) {
                    return Staleness::NewerInput(entry.path().to_path_buf());
                }
            }
        }

        for config_file in &self.config_files {
            if config_file.is_file() && is_newer(config_file, header_mtime) {
                return Staleness::NewerInput(config_file.clone());
            }
        }

        Staleness::Current
    }

    pub fn should_update(&self) -> bool {
        self.staleness().is_stale()
    }

    /// Rewrite the header with the current time if it is stale (or `force`).
    pub fn update(&self, force: bool) -> Result<HeaderUpdate, BuildInfoError> {
        self.update_with(force, BuildTimestamp::now)
    }

    /// As [`update`](Self::update) with an injected clock.
    pub fn update_with(
        &self,
        force: bool,
        clock: impl FnOnce() -> BuildTimestamp,
    ) -> Result<HeaderUpdate, BuildInfoError> {
        let reason = self.staleness();
        if !force && !reason.is_stale() {
            tracing::info!(
                "Skipped {} update (no source changes detected)",
                self.header.display()
            );
            return Ok(HeaderUpdate::Skipped);
        }

        let timestamp = clock();
        fsutil::write_atomic(&self.header, timestamp.header_line().as_bytes()).map_err(
            |source| BuildInfoError::Write {
                path: self.header.clone(),
                source,
            },
        )?;
        tracing::info!(
            "Updated {} with build date/time {}",
            self.header.display(),
            timestamp
        );
        Ok(HeaderUpdate::Written { timestamp, reason })
    }
}

fn is_newer(path: &Path, than: SystemTime) -> bool {
    fsutil::mtime(path).is_some_and(|m| m > than)
}

/// Canonical form for comparing paths that may be spelled differently.
fn identity(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use filetime::{set_file_mtime, FileTime};

    const OLD: i64 = 1_600_000_000;
    const NEW: i64 = 1_700_000_000;

    fn project() -> (tempfile::TempDir, BuildContext) {
        let dir = tempfile::tempdir().unwrap();
        for sub in ["src/web", "include", "lib/radio"] {
            fs::create_dir_all(dir.path().join(sub)).unwrap();
        }
        let ctx = BuildContext::builder(dir.path()).build();
        (dir, ctx)
    }

    fn touch(path: &Path, secs: i64) {
        if !path.exists() {
            fs::write(path, b"x").unwrap();
        }
        set_file_mtime(path, FileTime::from_unix_time(secs, 0)).unwrap();
    }

    fn writer(ctx: &BuildContext) -> BuildMetadataWriter {
        BuildMetadataWriter::from_config(ctx, &BuildInfoConfig::default()).unwrap()
    }

    fn fixed() -> BuildTimestamp {
        BuildTimestamp::parse("250101:1430").unwrap()
    }

    #[test]
    fn test_timestamp_format() {
        let at = NaiveDate::from_ymd_opt(2025, 1, 1)
            .unwrap()
            .and_hms_opt(14, 30, 59)
            .unwrap()
            .and_utc();
        assert_eq!(BuildTimestamp::from_datetime(&at).as_str(), "250101:1430");
        assert!(BuildTimestamp::parse(BuildTimestamp::now().as_str()).is_some());
    }

    #[test]
    fn test_timestamp_parse_rejects_other_shapes() {
        assert!(BuildTimestamp::parse("250101:1430").is_some());
        assert!(BuildTimestamp::parse("2501011430").is_none());
        assert!(BuildTimestamp::parse("250101.1430").is_none());
        assert!(BuildTimestamp::parse("25010a:1430").is_none());
    }

    #[test]
    fn test_parse_header() {
        assert_eq!(
            parse_header("#define BUILD_DATE_TIME \"250101:1430\"\n"),
            Some("250101:1430")
        );
        assert_eq!(parse_header("#define BUILD_DATE_TIME\t\"x\""), Some("x"));
        assert_eq!(parse_header("#define BUILD_DATE \"250101:1430\""), None);
        assert_eq!(parse_header(""), None);
    }

    #[test]
    fn test_missing_header_is_written() {
        let (dir, ctx) = project();
        let writer = writer(&ctx);

        let result = writer.update_with(false, fixed).unwrap();

        assert_eq!(
            result,
            HeaderUpdate::Written {
                timestamp: fixed(),
                reason: Staleness::Missing
            }
        );
        assert_eq!(
            fs::read_to_string(dir.path().join("include/build_info.h")).unwrap(),
            "#define BUILD_DATE_TIME \"250101:1430\"\n"
        );
    }

    #[test]
    fn test_unchanged_tree_leaves_header_untouched() {
        let (dir, ctx) = project();
        let header = dir.path().join("include/build_info.h");
        touch(&dir.path().join("src/main.cpp"), OLD);
        touch(&dir.path().join("platformio.ini"), OLD);
        fs::write(&header, fixed().header_line()).unwrap();
        touch(&header, NEW);

        let writer = writer(&ctx);
        assert_eq!(writer.update_with(false, || unreachable!()).unwrap(), HeaderUpdate::Skipped);
        assert_eq!(writer.update_with(false, || unreachable!()).unwrap(), HeaderUpdate::Skipped);

        assert_eq!(
            FileTime::from_last_modification_time(&fs::metadata(&header).unwrap()),
            FileTime::from_unix_time(NEW, 0)
        );
        assert_eq!(fs::read_to_string(&header).unwrap(), fixed().header_line());
    }

    #[test]
    fn test_header_excluded_from_its_own_comparison() {
        let (dir, ctx) = project();
        let header = dir.path().join("include/build_info.h");
        fs::write(&header, fixed().header_line()).unwrap();
        touch(&dir.path().join("include/globals.h"), OLD);
        touch(&header, NEW);

        assert_eq!(writer(&ctx).staleness(), Staleness::Current);
    }

    #[test]
    fn test_nested_source_newer() {
        let (dir, ctx) = project();
        let header = dir.path().join("include/build_info.h");
        touch(&header, OLD);
        let nested = dir.path().join("lib/radio/kx.cpp");
        touch(&nested, NEW);

        assert_eq!(writer(&ctx).staleness(), Staleness::NewerInput(nested));
    }

    #[test]
    fn test_config_file_newer() {
        let (dir, ctx) = project();
        touch(&dir.path().join("include/build_info.h"), OLD);
        let ini = dir.path().join("platformio.ini");
        touch(&ini, NEW);

        assert_eq!(writer(&ctx).staleness(), Staleness::NewerInput(ini));
    }

    #[test]
    fn test_equal_mtime_is_not_newer() {
        let (dir, ctx) = project();
        touch(&dir.path().join("include/build_info.h"), OLD);
        touch(&dir.path().join("src/main.cpp"), OLD);

        assert!(!writer(&ctx).should_update());
    }

    #[test]
    fn test_web_pattern_is_not_recursive_and_untracked_ignored() {
        let (dir, ctx) = project();
        touch(&dir.path().join("include/build_info.h"), OLD);
        fs::create_dir_all(dir.path().join("src/web/vendor")).unwrap();
        touch(&dir.path().join("src/web/vendor/lib.js"), NEW);
        touch(&dir.path().join("src/web/index.htmlgz"), NEW);
        touch(&dir.path().join("README.md"), NEW);

        assert_eq!(writer(&ctx).staleness(), Staleness::Current);

        touch(&dir.path().join("src/web/index.html"), NEW);
        assert!(writer(&ctx).should_update());
    }

    #[test]
    fn test_force_rewrites_current_header() {
        let (dir, ctx) = project();
        let header = dir.path().join("include/build_info.h");
        fs::write(&header, "#define BUILD_DATE_TIME \"240101:0000\"\n").unwrap();

        let result = writer(&ctx).update_with(true, fixed).unwrap();

        assert!(matches!(result, HeaderUpdate::Written { .. }));
        assert_eq!(fs::read_to_string(&header).unwrap(), fixed().header_line());
    }
}
