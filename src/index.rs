//! Persisted version index
//!
//! The index is one snapshot file holding the [`IndexMetadata`], the
//! [`RestoreConfig`] of the committing run and every
//! [`VersionRecord`] of the last full scan, encoded with bincode. It is only
//! ever replaced whole: a rescan stages the new snapshot next to the old one
//! and renames it into place, so a failed or interrupted scan leaves the
//! previous snapshot intact.
//!
//! Rebuilding requires an [`IndexLock`], an exclusive advisory lock on
//! `<index>.lock`. Readers of a committed snapshot do not lock.

use crate::error::{Result, RestoreError};
use crate::scanner::{ScanReport, VersionSource};
use crate::timestamp::TimePolicy;
use crate::types::{IndexMetadata, LogicalFile, RestoreConfig, VersionRecord};
use crate::utils;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Snapshot format written by this version
pub const INDEX_FORMAT_VERSION: u32 = 2;

/// Default time to wait for another run's lock
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(2);

const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Exclusive advisory lock on an index store
///
/// Released on drop.
#[derive(Debug)]
pub struct IndexLock {
    file: File,
    path: PathBuf,
}

impl IndexLock {
    /// Acquire the lock for the index at `index_path`
    ///
    /// Retries until `timeout` has passed.
    ///
    /// # Errors
    ///
    /// - [`RestoreError::IndexLocked`] if another holder keeps the lock past
    ///   the timeout
    /// - [`RestoreError::Io`] if the lock file cannot be opened
    pub fn acquire(index_path: &Path, timeout: Duration) -> Result<Self> {
        let path = lock_path_for(index_path);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        let deadline = Instant::now() + timeout;
        loop {
            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => {
                    debug!("Acquired index lock {:?}", path);
                    return Ok(Self { file, path });
                }
                Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                    if Instant::now() >= deadline {
                        warn!("Index lock {:?} still held after {:?}", path, timeout);
                        return Err(RestoreError::IndexLocked(path));
                    }
                    std::thread::sleep(LOCK_RETRY_INTERVAL);
                }
                Err(e) => return Err(RestoreError::Io(e)),
            }
        }
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for IndexLock {
    fn drop(&mut self) {
        // Unlock errors on drop are ignored; closing the file releases it too.
        let _ = FileExt::unlock(&self.file);
        trace!("Released index lock {:?}", self.path);
    }
}

/// Lock file path for an index file (`<index>.lock`)
pub fn lock_path_for(index_path: &Path) -> PathBuf {
    let mut name = index_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    index_path.with_file_name(name)
}

#[derive(Serialize, Deserialize)]
struct SnapshotFile {
    metadata: IndexMetadata,
    config: Option<RestoreConfig>,
    records: Vec<VersionRecord>,
}

/// A committed, immutable index
///
/// Records are grouped by logical file and sorted by timestamp inside each
/// group.
#[derive(Debug, Clone)]
pub struct IndexSnapshot {
    metadata: IndexMetadata,
    config: Option<RestoreConfig>,
    records: Vec<VersionRecord>,
    by_file: BTreeMap<LogicalFile, Range<usize>>,
}

impl IndexSnapshot {
    /// Build a snapshot from metadata and records in any order
    pub fn new(metadata: IndexMetadata, mut records: Vec<VersionRecord>) -> Self {
        records.sort_by(|a, b| {
            a.logical_file
                .cmp(&b.logical_file)
                .then_with(|| a.version_order(b))
        });

        let mut by_file: BTreeMap<LogicalFile, Range<usize>> = BTreeMap::new();
        let mut start = 0;
        while start < records.len() {
            let file = &records[start].logical_file;
            let len = records[start..]
                .iter()
                .take_while(|r| &r.logical_file == file)
                .count();
            by_file.insert(file.clone(), start..start + len);
            start += len;
        }

        Self {
            metadata,
            config: None,
            records,
            by_file,
        }
    }

    /// Attach the settings of the run that committed this snapshot
    pub fn with_config(mut self, config: Option<RestoreConfig>) -> Self {
        self.config = config;
        self
    }

    /// Metadata of the scan that produced this snapshot
    pub fn metadata(&self) -> &IndexMetadata {
        &self.metadata
    }

    /// Settings recorded by the committing run, if it recorded any
    pub fn config(&self) -> Option<&RestoreConfig> {
        self.config.as_ref()
    }

    /// All records in index order
    pub fn records(&self) -> &[VersionRecord] {
        &self.records
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the snapshot holds no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of distinct logical files
    pub fn file_count(&self) -> usize {
        self.by_file.len()
    }

    /// Logical files with their versions, in logical file order
    pub fn files(&self) -> impl Iterator<Item = (&LogicalFile, &[VersionRecord])> + '_ {
        self.by_file
            .iter()
            .map(move |(file, range)| (file, &self.records[range.clone()]))
    }

    /// Versions of one logical file, oldest first; empty if unknown
    pub fn versions_of(&self, file: &LogicalFile) -> &[VersionRecord] {
        self.by_file
            .get(file)
            .map(|range| &self.records[range.clone()])
            .unwrap_or(&[])
    }

    /// Versions of one logical file with timestamps in `[from, to]`
    pub fn versions_between(&self, file: &LogicalFile, from: i64, to: i64) -> &[VersionRecord] {
        let versions = self.versions_of(file);
        let lo = versions.partition_point(|r| r.timestamp_epoch < from);
        let hi = versions.partition_point(|r| r.timestamp_epoch <= to);
        if lo >= hi {
            &[]
        } else {
            &versions[lo..hi]
        }
    }
}

/// On-disk index store
#[derive(Debug, Clone)]
pub struct IndexStore {
    path: PathBuf,
    config: Option<RestoreConfig>,
}

impl IndexStore {
    /// Store backed by the snapshot file at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            config: None,
        }
    }

    /// Record `config` with every committed snapshot
    pub fn with_config(mut self, config: RestoreConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Snapshot file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take the store's exclusive lock
    pub fn lock(&self, timeout: Duration) -> Result<IndexLock> {
        IndexLock::acquire(&self.path, timeout)
    }

    /// Load the committed snapshot, `None` for a fresh store
    ///
    /// # Errors
    ///
    /// - [`RestoreError::IndexCorrupt`] if the file cannot be decoded or was
    ///   written in another format version
    pub fn load(&self) -> Result<Option<IndexSnapshot>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No index at {:?}", self.path);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let (file, _): (SnapshotFile, _) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::standard()).map_err(|e| {
                RestoreError::IndexCorrupt(format!("{:?} cannot be decoded: {}", self.path, e))
            })?;

        if file.metadata.format_version != INDEX_FORMAT_VERSION {
            return Err(RestoreError::IndexCorrupt(format!(
                "{:?} has format version {}, expected {}",
                self.path, file.metadata.format_version, INDEX_FORMAT_VERSION
            )));
        }

        debug!(
            "Loaded index {:?}: {} records",
            self.path,
            file.records.len()
        );
        Ok(Some(IndexSnapshot::new(file.metadata, file.records).with_config(file.config)))
    }

    /// Replace the committed snapshot with a completed scan
    ///
    /// `last_full_scan_epoch` becomes the later of `now` and the previously
    /// committed value.
    pub fn commit(
        &self,
        _lock: &IndexLock,
        records: Vec<VersionRecord>,
        skipped_count: usize,
        versioning_dir: &Path,
        time_policy: TimePolicy,
        now: i64,
        previous: Option<&IndexMetadata>,
    ) -> Result<IndexSnapshot> {
        let last_full_scan_epoch = previous
            .map(|m| m.last_full_scan_epoch.max(now))
            .unwrap_or(now);

        let metadata = IndexMetadata {
            format_version: INDEX_FORMAT_VERSION,
            tool_version: crate::VERSION.to_string(),
            versioning_dir: versioning_dir.to_path_buf(),
            time_policy,
            last_full_scan_epoch,
            record_count: records.len(),
            skipped_count,
        };

        let snapshot = IndexSnapshot::new(metadata, records).with_config(self.config.clone());
        let file = SnapshotFile {
            metadata: snapshot.metadata.clone(),
            config: snapshot.config.clone(),
            records: snapshot.records.clone(),
        };
        let bytes = bincode::serde::encode_to_vec(&file, bincode::config::standard())?;
        utils::atomic_write(&self.path, &bytes)?;

        info!(
            "Committed index {:?}: {} records ({})",
            self.path,
            snapshot.len(),
            utils::format_bytes(bytes.len() as u64)
        );
        Ok(snapshot)
    }

    /// Scan `source` and commit the result
    ///
    /// The scan runs to completion before anything is written; a scan error
    /// leaves the committed snapshot untouched. The returned report has its
    /// records moved into the snapshot.
    pub fn rebuild(
        &self,
        lock: &IndexLock,
        source: &dyn VersionSource,
        time_policy: TimePolicy,
        now: i64,
        previous: Option<&IndexMetadata>,
    ) -> Result<(IndexSnapshot, ScanReport)> {
        let mut report = source.scan()?;
        let records = std::mem::take(&mut report.records);
        let snapshot = self.commit(
            lock,
            records,
            report.skipped.len(),
            source.versioning_dir(),
            time_policy,
            now,
            previous,
        )?;
        Ok((snapshot, report))
    }
}
