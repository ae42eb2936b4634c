//! Filesystem helpers shared by the writers
//!
//! Readers (an operator inspecting the output directory, the web flasher)
//! may look at any file at any time, so generated files are written to a
//! sibling temp path and renamed into place.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Sibling temp path used while `path` is being produced (`name.ext.tmp`).
pub fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("out"));
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write atomically (write-then-rename), creating parent directories.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let temp_path = tmp_sibling(path);
    if let Err(e) = fs::write(&temp_path, contents) {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }
    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        e
    })
}

/// Copy `src` to `dst` atomically. The result is byte-identical to `src`.
pub fn copy_atomic(src: &Path, dst: &Path) -> io::Result<u64> {
    if let Some(parent) = dst.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let temp_path = tmp_sibling(dst);
    let copied = match fs::copy(src, &temp_path) {
        Ok(n) => n,
        Err(e) => {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }
    };
    fs::rename(&temp_path, dst).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        e
    })?;
    Ok(copied)
}

/// Move a finished temp file into place.
pub fn commit(temp_path: &Path, path: &Path) -> io::Result<()> {
    fs::rename(temp_path, path)
}

/// Remove `path` if present. Returns whether a file was removed.
pub fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Modification time, or None if the file is missing or unreadable.
pub fn mtime(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// `candidate` is at least as new as `reference`.
///
/// False when either file is missing.
pub fn is_up_to_date(candidate: &Path, reference: &Path) -> bool {
    match (mtime(candidate), mtime(reference)) {
        (Some(c), Some(r)) => c >= r,
        _ => false,
    }
}
