//! Core data types used throughout the restorething library
//!
//! ## Overview
//!
//! - **Identity**: [`LogicalFile`] names a file of the live folder independent
//!   of any archived version.
//! - **Observations**: [`VersionRecord`] is one archived snapshot of a logical
//!   file, as found by the scanner.
//! - **Index state**: [`IndexMetadata`] describes the last committed scan.
//! - **Configuration**: [`RestoreConfig`] collects the settings a
//!   [`crate::Restorer`] was built with.
//! - **Progress**: [`ProgressInfo`] and [`ProgressCallback`] for long scans.
//!
//! ## Examples
//!
//! ```rust
//! use restorething::types::LogicalFile;
//! use std::path::Path;
//!
//! let file = LogicalFile::new("docs/reports", "q3.txt");
//! assert_eq!(file.relative_path(), Path::new("docs/reports/q3.txt"));
//! assert_eq!(file.to_string(), "docs/reports/q3.txt");
//! ```

use crate::error::{Result, RestoreError};
use crate::timestamp::TimePolicy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Identity of a file in the live folder
///
/// Ordered by directory, then name, which is the order every report and plan
/// uses.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LogicalFile {
    /// Directory relative to the live folder root (empty for the root)
    pub relative_dir: PathBuf,
    /// File name as it appears in the live folder
    pub base_name: String,
}

impl LogicalFile {
    /// Create a logical file from its directory and name
    pub fn new(relative_dir: impl Into<PathBuf>, base_name: impl Into<String>) -> Self {
        Self {
            relative_dir: relative_dir.into(),
            base_name: base_name.into(),
        }
    }

    /// Path of the file relative to the live folder
    pub fn relative_path(&self) -> PathBuf {
        self.relative_dir.join(&self.base_name)
    }

    /// Directory as a `/`-separated string, used by directory filters
    pub fn dir_string(&self) -> String {
        self.relative_dir
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Resolve an absolute path inside the live folder to its logical file
    ///
    /// # Errors
    ///
    /// - [`RestoreError::SelectionInput`] if `path` is relative, lies outside
    ///   `live_root`, or names the root itself
    pub fn from_live_path(live_root: &Path, path: &Path) -> Result<Self> {
        if !path.is_absolute() {
            return Err(RestoreError::selection(format!(
                "{:?} is not an absolute path",
                path
            )));
        }
        let relative = crate::utils::make_relative(path, live_root).map_err(|_| {
            RestoreError::selection(format!(
                "{:?} is not inside the synced folder {:?}",
                path, live_root
            ))
        })?;
        let base_name = relative
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| RestoreError::selection(format!("{:?} does not name a file", path)))?;
        let relative_dir = relative.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(Self::new(relative_dir, base_name))
    }
}

impl fmt::Display for LogicalFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dir = self.dir_string();
        if dir.is_empty() {
            write!(f, "{}", self.base_name)
        } else {
            write!(f, "{}/{}", dir, self.base_name)
        }
    }
}

/// One archived snapshot of a logical file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    /// File this version belongs to
    pub logical_file: LogicalFile,
    /// Version timestamp in epoch seconds
    pub timestamp_epoch: i64,
    /// Absolute path of the archived file
    pub source_path: PathBuf,
    /// Whether the archived entry is a sync-conflict copy
    pub is_conflict: bool,
    /// Whether the entry marks a deletion or rename rather than content
    pub is_deleted_or_renamed: bool,
    /// Size of the archived file
    pub size_bytes: u64,
    /// Modification time of the archived file in epoch seconds
    pub source_mtime: i64,
}

impl VersionRecord {
    /// Distance in seconds between this version and `target`
    pub fn distance_to(&self, target: i64) -> u64 {
        self.timestamp_epoch.abs_diff(target)
    }

    /// Archived file name, including version tag
    pub fn archived_name(&self) -> String {
        self.source_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.logical_file.base_name.clone())
    }

    /// Stable ordering inside a logical file: timestamp, then source path
    pub fn version_order(&self, other: &Self) -> std::cmp::Ordering {
        self.timestamp_epoch
            .cmp(&other.timestamp_epoch)
            .then_with(|| self.source_path.cmp(&other.source_path))
    }
}

/// Description of the last committed full scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMetadata {
    /// Version of the snapshot format
    pub format_version: u32,
    /// restorething version that wrote the snapshot
    pub tool_version: String,
    /// Versioning directory that was scanned
    pub versioning_dir: PathBuf,
    /// Calendar used to decode timestamps
    pub time_policy: TimePolicy,
    /// Epoch seconds of the last successful full scan
    pub last_full_scan_epoch: i64,
    /// Number of records committed
    pub record_count: usize,
    /// Number of archive entries that could not be decoded
    pub skipped_count: usize,
}

/// Settings a [`crate::Restorer`] was built with
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreConfig {
    /// Versioning directory (`.stversions`)
    pub versioning_dir: PathBuf,
    /// Location of the persisted index snapshot
    pub index_path: PathBuf,
    /// Freeze window in seconds
    pub freeze_window_secs: u64,
    /// Calendar for timestamps
    pub time_policy: TimePolicy,
    /// Number of parallel workers for scanning
    pub parallel_workers: usize,
    /// Glob patterns of archive entries to ignore
    pub ignore_patterns: Vec<String>,
    /// How long to wait for another run's index lock, in milliseconds
    pub lock_timeout_ms: u64,
    /// restorething version that created this config
    pub version: String,
}

/// Progress callback for long-running operations
pub type ProgressCallback = Arc<dyn Fn(ProgressInfo) + Send + Sync>;

/// Information passed to progress callbacks
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// Operation being performed
    pub operation: String,
    /// Current item being processed
    pub current_item: Option<String>,
    /// Items processed so far
    pub processed: usize,
    /// Total items to process (if known)
    pub total: Option<usize>,
}

impl ProgressInfo {
    /// Get progress as a percentage (0-100)
    pub fn percentage(&self) -> Option<f32> {
        match self.total {
            Some(total) if total > 0 => Some((self.processed as f32 / total as f32) * 100.0),
            _ => None,
        }
    }
}
