//! Archive scanning
//!
//! The scanner walks a Syncthing versioning directory, decodes every archived
//! entry and returns the complete set of [`VersionRecord`]s found there.
//!
//! ## Phases
//!
//! 1. **Walk**: `walkdir` enumerates the tree sequentially. Any directory read
//!    error aborts the scan with [`RestoreError::Scan`]; a partial listing
//!    would prune versions that still exist.
//! 2. **Decode**: entries are decoded and stat'ed in parallel on a dedicated
//!    rayon pool. Entries that do not follow the versioned-filename grammar are
//!    skipped with a warning and listed in [`ScanReport::skipped`].
//! 3. **Join**: records are sorted into index order before anything is handed
//!    to the store.
//!
//! ## Example
//!
//! ```rust,no_run
//! use restorething::scanner::{ArchiveScanner, VersionSource};
//! use restorething::TimePolicy;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let scanner = ArchiveScanner::new(PathBuf::from("sync/.stversions"), TimePolicy::Local)
//!     .with_parallel_workers(4);
//! let report = scanner.scan()?;
//! println!("{} versions, {} skipped", report.records.len(), report.skipped.len());
//! # Ok(())
//! # }
//! ```

use crate::decoder::VersionDecoder;
use crate::error::{Result, RestoreError};
use crate::timestamp::TimePolicy;
use crate::types::{ProgressCallback, ProgressInfo, VersionRecord};
use crate::utils;
use globset::{Glob, GlobSet, GlobSetBuilder};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Archive entries Syncthing leaves behind that are never versions
pub const DEFAULT_IGNORE_PATTERNS: [&str; 3] = [".syncthing.*.tmp", "~syncthing~*.tmp", ".stfolder"];

/// Anything that can produce a full set of version records
///
/// The index store refreshes itself from a `VersionSource`; the archive
/// scanner is the production implementation.
pub trait VersionSource: Send + Sync {
    /// Root of the archive this source reads
    fn versioning_dir(&self) -> &Path;

    /// Produce every version currently in the archive
    fn scan(&self) -> Result<ScanReport>;
}

/// An archive entry the scanner could not turn into a version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEntry {
    /// Path relative to the versioning directory
    pub path: PathBuf,
    /// Why the entry was skipped
    pub reason: String,
}

/// Outcome of a full scan
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    /// Decoded versions in index order
    pub records: Vec<VersionRecord>,
    /// Entries that were not versions
    pub skipped: Vec<SkippedEntry>,
    /// Files enumerated by the walk
    pub entries_seen: usize,
    /// Wall time of the scan
    pub duration: Duration,
}

/// Scanner for a Syncthing versioning directory
pub struct ArchiveScanner {
    versioning_dir: PathBuf,
    decoder: VersionDecoder,
    ignore_patterns: Vec<String>,
    ignore: GlobSet,
    parallel_workers: usize,
    progress_callback: Option<ProgressCallback>,
}

impl std::fmt::Debug for ArchiveScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveScanner")
            .field("versioning_dir", &self.versioning_dir)
            .field("decoder", &self.decoder)
            .field("ignore_patterns", &self.ignore_patterns)
            .field("parallel_workers", &self.parallel_workers)
            .field("progress_callback", &self.progress_callback.is_some())
            .finish()
    }
}

enum EntryOutcome {
    Version(VersionRecord),
    Skipped(SkippedEntry),
}

impl ArchiveScanner {
    /// Create a scanner with the default ignore patterns and one worker per CPU
    pub fn new(versioning_dir: PathBuf, policy: TimePolicy) -> Self {
        let ignore_patterns: Vec<String> = DEFAULT_IGNORE_PATTERNS.iter().map(|s| s.to_string()).collect();
        // The defaults are literal, known-good globs.
        let ignore = build_globset(&ignore_patterns).unwrap_or_else(|_| GlobSet::empty());
        Self {
            versioning_dir,
            decoder: VersionDecoder::new(policy),
            ignore_patterns,
            ignore,
            parallel_workers: num_cpus::get(),
            progress_callback: None,
        }
    }

    /// Replace the ignore patterns
    ///
    /// Patterns are globs matched against both the entry's file name and its
    /// path relative to the versioning directory.
    ///
    /// # Errors
    ///
    /// - [`RestoreError::InvalidPattern`] if a pattern is not a valid glob
    pub fn with_ignore_patterns(mut self, patterns: Vec<String>) -> Result<Self> {
        self.ignore = build_globset(&patterns)?;
        self.ignore_patterns = patterns;
        Ok(self)
    }

    /// Set number of parallel workers (minimum 1)
    pub fn with_parallel_workers(mut self, workers: usize) -> Self {
        self.parallel_workers = workers.max(1);
        self
    }

    /// Report progress for every processed entry
    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    /// Calendar used for decoding
    pub fn time_policy(&self) -> TimePolicy {
        self.decoder.policy()
    }

    fn is_ignored(&self, relative: &Path) -> bool {
        let by_name = relative
            .file_name()
            .map(|name| self.ignore.is_match(name))
            .unwrap_or(false);
        by_name || self.ignore.is_match(relative)
    }

    /// Enumerate archive files as paths relative to the versioning directory
    ///
    /// The iterator yields an error for the first unreadable directory; the
    /// consumer stops there.
    pub fn walk_entries(&self) -> Result<impl Iterator<Item = Result<PathBuf>> + '_> {
        let root = &self.versioning_dir;
        if !root.is_dir() {
            return Err(RestoreError::scan(format!(
                "versioning directory {:?} does not exist or is not a directory",
                root
            )));
        }

        let walker = WalkDir::new(root)
            .follow_links(false)
            .min_depth(1)
            .into_iter()
            .filter_entry(move |entry| match entry.path().strip_prefix(root) {
                Ok(relative) => !self.is_ignored(relative),
                Err(_) => true,
            });

        Ok(walker.filter_map(move |entry| match entry {
            Ok(entry) if entry.file_type().is_file() => {
                Some(utils::make_relative(entry.path(), root))
            }
            Ok(_) => None,
            Err(e) => {
                let at = e.path().map(|p| p.to_path_buf()).unwrap_or_else(|| root.clone());
                Some(Err(RestoreError::scan(format!("cannot read {:?}: {}", at, e))))
            }
        }))
    }

    /// Decode an already enumerated set of archive entries
    ///
    /// Enumeration errors abort immediately, before any decoding happens.
    pub fn scan_entries<I>(&self, entries: I) -> Result<ScanReport>
    where
        I: IntoIterator<Item = Result<PathBuf>>,
    {
        let start = Instant::now();
        let paths = entries.into_iter().collect::<Result<Vec<PathBuf>>>()?;
        let total = paths.len();
        debug!("Walk of {:?} found {} entries", self.versioning_dir, total);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.parallel_workers)
            .build()
            .map_err(|e| RestoreError::internal(format!("Failed to build scan pool: {}", e)))?;

        let processed = AtomicUsize::new(0);
        let outcomes: Vec<EntryOutcome> = pool.install(|| {
            paths
                .par_iter()
                .map(|relative| {
                    let outcome = self.process_entry(relative);
                    let done = processed.fetch_add(1, Ordering::Relaxed) + 1;
                    if let Some(ref callback) = self.progress_callback {
                        callback(ProgressInfo {
                            operation: "Indexing versions".to_string(),
                            current_item: Some(relative.to_string_lossy().into_owned()),
                            processed: done,
                            total: Some(total),
                        });
                    }
                    outcome
                })
                .collect()
        });

        let mut report = ScanReport {
            entries_seen: total,
            ..Default::default()
        };
        for outcome in outcomes {
            match outcome {
                EntryOutcome::Version(record) => report.records.push(record),
                EntryOutcome::Skipped(skipped) => report.skipped.push(skipped),
            }
        }

        report.records.sort_by(|a, b| {
            a.logical_file
                .cmp(&b.logical_file)
                .then_with(|| a.version_order(b))
        });
        report.skipped.sort_by(|a, b| a.path.cmp(&b.path));
        report.duration = start.elapsed();

        info!(
            "Scanned {:?}: {} versions, {} skipped in {:?}",
            self.versioning_dir,
            report.records.len(),
            report.skipped.len(),
            report.duration
        );
        Ok(report)
    }

    fn process_entry(&self, relative: &Path) -> EntryOutcome {
        let decoded = match self.decoder.decode(relative) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("Skipping {:?}: {}", relative, e);
                return EntryOutcome::Skipped(SkippedEntry {
                    path: relative.to_path_buf(),
                    reason: e.to_string(),
                });
            }
        };

        let source_path = self.versioning_dir.join(relative);
        let metadata = match fs::metadata(&source_path) {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!("Skipping {:?}: cannot stat: {}", relative, e);
                return EntryOutcome::Skipped(SkippedEntry {
                    path: relative.to_path_buf(),
                    reason: format!("cannot stat: {}", e),
                });
            }
        };
        let source_mtime = metadata
            .modified()
            .map(utils::system_time_to_epoch)
            .unwrap_or(decoded.timestamp_epoch);

        EntryOutcome::Version(VersionRecord {
            logical_file: decoded.logical_file,
            timestamp_epoch: decoded.timestamp_epoch,
            source_path,
            is_conflict: decoded.is_conflict,
            is_deleted_or_renamed: decoded.is_deleted_or_renamed,
            size_bytes: metadata.len(),
            source_mtime,
        })
    }
}

impl VersionSource for ArchiveScanner {
    fn versioning_dir(&self) -> &Path {
        &self.versioning_dir
    }

    fn scan(&self) -> Result<ScanReport> {
        let entries = self.walk_entries()?;
        self.scan_entries(entries)
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
