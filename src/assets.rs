//! Web asset compression
//!
//! Each web source (`index.html`) has a gzip sibling with the extension
//! suffixed by `gz` (`index.htmlgz`) that the firmware embeds. A sibling is
//! current when it exists and its mtime is at least the source's, so a
//! second run over unchanged sources writes nothing.

use flate2::{write::GzEncoder, Compression};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::config::{DEFAULT_WEB_DIR, DEFAULT_WEB_EXTENSIONS};
use crate::context::BuildContext;
use crate::fsutil;

/// Which assets to compress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetConfig {
    /// Directory holding the sources, relative to the project.
    pub dir: String,

    /// Bare extensions (`html`, not `.html`).
    pub extensions: Vec<String>,
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            dir: DEFAULT_WEB_DIR.to_string(),
            extensions: DEFAULT_WEB_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("web directory not found: {0}")]
    MissingDirectory(PathBuf),

    #[error("failed to compress {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// The gzip sibling for `source`: the file name with `gz` appended.
pub fn compressed_path(source: &Path) -> PathBuf {
    let mut name = source
        .file_name()
        .map(OsString::from)
        .unwrap_or_default();
    name.push("gz");
    source.with_file_name(name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetAction {
    Compressed,
    Unchanged,
}

/// One source and what happened to it.
#[derive(Debug, Clone, Serialize)]
pub struct AssetEntry {
    pub source: PathBuf,
    pub compressed: PathBuf,
    pub action: AssetAction,
    pub original_size: u64,
    pub compressed_size: u64,
}

impl AssetEntry {
    /// Percentage saved by compression.
    pub fn savings(&self) -> f64 {
        savings_percent(self.original_size, self.compressed_size)
    }
}

fn savings_percent(original: u64, compressed: u64) -> f64 {
    if original == 0 {
        return 0.0;
    }
    100.0 - (compressed as f64 * 100.0 / original as f64)
}

/// Counts and per-file sizes from one pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CompressionReport {
    pub entries: Vec<AssetEntry>,
}

impl CompressionReport {
    pub fn compressed(&self) -> usize {
        self.count(AssetAction::Compressed)
    }

    pub fn unchanged(&self) -> usize {
        self.count(AssetAction::Unchanged)
    }

    fn count(&self, action: AssetAction) -> usize {
        self.entries.iter().filter(|e| e.action == action).count()
    }

    /// One-line progress summary.
    pub fn summary(&self) -> String {
        if self.compressed() > 0 {
            format!(
                "Compressed {} web asset(s), {} unchanged",
                self.compressed(),
                self.unchanged()
            )
        } else {
            format!("Web assets up to date ({} file(s) unchanged)", self.unchanged())
        }
    }

    /// Table of sizes for the standalone `compress` command.
    pub fn size_table(&self) -> String {
        let rule = "=".repeat(70);
        let mut out = String::new();
        out.push_str(&rule);
        out.push('\n');
        let (mut total_original, mut total_compressed) = (0u64, 0u64);
        for entry in &self.entries {
            let name = entry
                .source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let marker = match entry.action {
                AssetAction::Compressed => "",
                AssetAction::Unchanged => " (unchanged)",
            };
            out.push_str(&format!(
                "{:25} {:>8} -> {:>8} bytes ({:5.1}% saved){}\n",
                name,
                entry.original_size,
                entry.compressed_size,
                entry.savings(),
                marker
            ));
            total_original += entry.original_size;
            total_compressed += entry.compressed_size;
        }
        out.push_str(&rule);
        out.push('\n');
        if self.entries.is_empty() {
            out.push_str("No files found to compress\n");
        } else {
            out.push_str(&format!(
                "Total: {} -> {} bytes ({:.1}% saved)\n",
                total_original,
                total_compressed,
                savings_percent(total_original, total_compressed)
            ));
            out.push_str(&format!(
                "Flash savings: {} bytes\n",
                total_original.saturating_sub(total_compressed)
            ));
        }
        out
    }
}

/// Regenerates stale gzip siblings.
#[derive(Debug, Clone)]
pub struct AssetCompressor {
    dir: PathBuf,
    extensions: Vec<String>,
    force: bool,
}

impl AssetCompressor {
    pub fn new(dir: impl Into<PathBuf>, extensions: Vec<String>) -> Self {
        Self {
            dir: dir.into(),
            extensions,
            force: false,
        }
    }

    pub fn from_config(ctx: &BuildContext, config: &AssetConfig) -> Self {
        Self::new(ctx.subst_path(&config.dir), config.extensions.clone())
    }

    /// Recompress regardless of mtimes.
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Sources in extension order, then by name (top level only).
    pub fn sources(&self) -> Result<Vec<PathBuf>, AssetError> {
        if !self.dir.is_dir() {
            return Err(AssetError::MissingDirectory(self.dir.clone()));
        }
        let entries = fs::read_dir(&self.dir).map_err(|source| AssetError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let files: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .collect();

        let mut sources = Vec::new();
        for ext in &self.extensions {
            let mut matching: Vec<PathBuf> = files
                .iter()
                .filter(|p| p.extension().is_some_and(|e| e == ext.as_str()))
                .cloned()
                .collect();
            matching.sort();
            sources.extend(matching);
        }
        Ok(sources)
    }

    /// Compress every stale source.
    pub fn run(&self) -> Result<CompressionReport, AssetError> {
        let mut report = CompressionReport::default();
        for source in self.sources()? {
            let compressed = compressed_path(&source);
            let original_size = file_len(&source)?;

            if !self.force && fsutil::is_up_to_date(&compressed, &source) {
                report.entries.push(AssetEntry {
                    compressed_size: file_len(&compressed)?,
                    source,
                    compressed,
                    action: AssetAction::Unchanged,
                    original_size,
                });
                continue;
            }

            let compressed_size = compress_file(&source, &compressed)?;
            tracing::info!(
                "  Compressed {} -> {}",
                display_name(&source),
                display_name(&compressed)
            );
            report.entries.push(AssetEntry {
                source,
                compressed,
                action: AssetAction::Compressed,
                original_size,
                compressed_size,
            });
        }
        Ok(report)
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn file_len(path: &Path) -> Result<u64, AssetError> {
    fs::metadata(path)
        .map(|m| m.len())
        .map_err(|source| AssetError::Io {
            path: path.to_path_buf(),
            source,
        })
}

/// Gzip at maximum ratio into `dest` via a temp sibling. Returns the
/// compressed size.
fn compress_file(source: &Path, dest: &Path) -> Result<u64, AssetError> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source: io::Error| AssetError::Io { path, source }
    };

    let data = fs::read(source).map_err(io_err(source))?;
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::best());
    encoder.write_all(&data).map_err(io_err(source))?;
    let gz = encoder.finish().map_err(io_err(source))?;

    fsutil::write_atomic(dest, &gz).map_err(io_err(dest))?;
    Ok(gz.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::{set_file_mtime, FileTime};
    use flate2::read::GzDecoder;
    use std::io::Read;

    fn html_js_css() -> Vec<String> {
        vec!["html".to_string(), "js".to_string(), "css".to_string()]
    }

    #[test]
    fn test_compressed_path_per_extension() {
        assert_eq!(
            compressed_path(Path::new("/w/index.html")),
            PathBuf::from("/w/index.htmlgz")
        );
        assert_eq!(compressed_path(Path::new("/w/app.js")), PathBuf::from("/w/app.jsgz"));
        assert_eq!(
            compressed_path(Path::new("/w/style.css")),
            PathBuf::from("/w/style.cssgz")
        );
    }

    #[test]
    fn test_compresses_then_idle() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.html"), "<html>".repeat(200)).unwrap();
        fs::write(dir.path().join("main.js"), "let x = 1;\n".repeat(100)).unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        let compressor = AssetCompressor::new(dir.path(), html_js_css());

        let first = compressor.run().unwrap();
        assert_eq!(first.compressed(), 2);
        assert_eq!(first.unchanged(), 0);
        assert!(!dir.path().join("notes.txtgz").exists());

        let gz = dir.path().join("index.htmlgz");
        let before = fs::metadata(&gz).unwrap().modified().unwrap();
        let second = compressor.run().unwrap();
        assert_eq!(second.compressed(), 0);
        assert_eq!(second.unchanged(), 2);
        assert_eq!(fs::metadata(&gz).unwrap().modified().unwrap(), before);
        assert_eq!(second.summary(), "Web assets up to date (2 file(s) unchanged)");
    }

    #[test]
    fn test_output_decompresses_to_source() {
        let dir = tempfile::tempdir().unwrap();
        let body = "body { color: red; }\n".repeat(50);
        fs::write(dir.path().join("style.css"), &body).unwrap();

        AssetCompressor::new(dir.path(), html_js_css()).run().unwrap();

        let gz = fs::read(dir.path().join("style.cssgz")).unwrap();
        let mut out = String::new();
        GzDecoder::new(&gz[..]).read_to_string(&mut out).unwrap();
        assert_eq!(out, body);
    }

    #[test]
    fn test_newer_source_recompressed() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("index.html");
        fs::write(&src, "<p>a</p>").unwrap();
        let compressor = AssetCompressor::new(dir.path(), html_js_css());
        compressor.run().unwrap();

        set_file_mtime(compressed_path(&src), FileTime::from_unix_time(1_000, 0)).unwrap();
        set_file_mtime(&src, FileTime::from_unix_time(2_000, 0)).unwrap();

        let report = compressor.run().unwrap();
        assert_eq!(report.compressed(), 1);
        assert_eq!(report.summary(), "Compressed 1 web asset(s), 0 unchanged");
    }

    #[test]
    fn test_equal_mtime_is_current() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("index.html");
        fs::write(&src, "<p>a</p>").unwrap();
        fs::write(compressed_path(&src), "stale").unwrap();
        let t = FileTime::from_unix_time(5_000, 0);
        set_file_mtime(&src, t).unwrap();
        set_file_mtime(compressed_path(&src), t).unwrap();

        let report = AssetCompressor::new(dir.path(), html_js_css()).run().unwrap();
        assert_eq!(report.unchanged(), 1);
        assert_eq!(fs::read_to_string(compressed_path(&src)).unwrap(), "stale");
    }

    #[test]
    fn test_force_recompresses() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.html"), "<p>a</p>").unwrap();
        let compressor = AssetCompressor::new(dir.path(), html_js_css());
        compressor.run().unwrap();

        let report = compressor.force(true).run().unwrap();
        assert_eq!(report.compressed(), 1);
        assert!(report.size_table().contains("index.html"));
    }

    #[test]
    fn test_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = AssetCompressor::new(dir.path().join("web"), html_js_css())
            .run()
            .unwrap_err();
        assert!(matches!(err, AssetError::MissingDirectory(_)));
    }

    #[test]
    fn test_sources_ordered_by_extension_then_name() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.html", "a.css", "a.html", "z.js", "index.htmlgz"] {
            fs::write(dir.path().join(name), "x").unwrap();
        }
        let names: Vec<String> = AssetCompressor::new(dir.path(), html_js_css())
            .sources()
            .unwrap()
            .iter()
            .map(|p| display_name(p))
            .collect();
        assert_eq!(names, vec!["a.html", "b.html", "z.js", "a.css"]);
    }
}
