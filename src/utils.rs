//! Utility functions for restorething
//!
//! Path manipulation, atomic file replacement and small formatting helpers
//! shared by the index store, the executor and the CLI.

use crate::error::{Result, RestoreError};
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::trace;

/// Directory names Syncthing keeps inside every synced folder
pub const SYNCTHING_MARKER_DIRS: [&str; 2] = [".stfolder", ".stversions"];

/// Make a path relative to a base path
///
/// Both sides are normalised lexically first, so `a/../b` and `./b` match
/// `b`. If that fails, both sides are canonicalised through their deepest
/// existing ancestor; the path itself does not have to exist.
///
/// # Errors
///
/// - [`RestoreError::Internal`] if the path is not under the base path
/// - [`RestoreError::Io`] if canonicalization fails (fallback case only)
///
/// # Example
///
/// ```rust,ignore
/// use crate::utils::make_relative;
/// use std::path::{Path, PathBuf};
///
/// let relative = make_relative(Path::new("/sync/docs/a.txt"), Path::new("/sync"))?;
/// assert_eq!(relative, PathBuf::from("docs/a.txt"));
/// ```
pub fn make_relative(path: &Path, base: &Path) -> Result<PathBuf> {
    let path = normalize_path(path);
    let base = normalize_path(base);
    if let Ok(relative) = path.strip_prefix(&base) {
        return Ok(relative.to_path_buf());
    }

    let path_canon = canonicalize_existing_prefix(&path)?;
    let base_canon = canonicalize_existing_prefix(&base)?;

    path_canon
        .strip_prefix(&base_canon)
        .map(|p| p.to_path_buf())
        .map_err(|_| RestoreError::internal(format!(
            "Path {:?} is not relative to {:?}",
            path_canon, base_canon
        )))
}

/// Resolve `.` and `..` components without touching the filesystem
///
/// `..` at the root stays at the root; a leading `..` on a relative path is
/// kept.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match normalized.components().next_back() {
                Some(Component::Normal(_)) => {
                    normalized.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => normalized.push(".."),
            },
            other => normalized.push(other.as_os_str()),
        }
    }
    if normalized.as_os_str().is_empty() {
        normalized.push(".");
    }
    normalized
}

/// Canonicalise the deepest existing ancestor and re-append the rest
fn canonicalize_existing_prefix(path: &Path) -> Result<PathBuf> {
    let mut missing = Vec::new();
    let mut existing = path;
    loop {
        match existing.canonicalize() {
            Ok(canon) => {
                return Ok(missing.iter().rev().fold(canon, |acc: PathBuf, part| acc.join(part)));
            }
            Err(e) => match (existing.parent(), existing.file_name()) {
                (Some(parent), Some(name)) => {
                    missing.push(name.to_os_string());
                    existing = parent;
                }
                _ => return Err(e.into()),
            },
        }
    }
}

/// Format bytes in human-readable form
///
/// Uses 1024 as the conversion factor; values under 1 KB are whole numbers.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

/// Atomic file replacement
///
/// The content is staged in a temporary file in the destination directory,
/// synced, and renamed over `path`. Readers see either the old file or the
/// complete new one. The staging file is removed if any step fails.
///
/// # Errors
///
/// - [`RestoreError::Io`] if staging, syncing or the rename fails
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;

    let mut staged = tempfile::Builder::new()
        .prefix(".restorething-")
        .suffix(".staging")
        .tempfile_in(dir)?;
    staged.write_all(content)?;
    staged.as_file().sync_all()?;
    staged.persist(path).map_err(|e| RestoreError::Io(e.error))?;

    trace!("Atomically replaced {:?} ({} bytes)", path, content.len());
    Ok(())
}

/// Epoch seconds of a `SystemTime`, negative before 1970
pub fn system_time_to_epoch(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => -(e.duration().as_secs() as i64),
    }
}

/// Whether `path` or one of its ancestors holds Syncthing's marker folders
///
/// Restoring into a synced folder makes Syncthing propagate the restored files
/// to every device, which is rarely what the user wants.
pub fn is_inside_synced_folder(path: &Path) -> bool {
    path.ancestors().any(|dir| {
        SYNCTHING_MARKER_DIRS
            .iter()
            .any(|marker| dir.join(marker).is_dir() || dir.file_name().is_some_and(|n| n == *marker))
    })
}
