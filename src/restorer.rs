//! Main restorething implementation
//!
//! The [`Restorer`] ties the pieces of a restore run together:
//!
//! 1. **Refresh**: take the index lock, ask the freeze policy whether the
//!    committed index can be reused, and rescan the archive if not.
//! 2. **Select**: run a [`SelectionQuery`] against the committed snapshot.
//! 3. **Plan**: map the selection onto destinations under the restore root.
//! 4. **Execute**: hand the plan to a [`CopyExecutor`].
//!
//! Selection and planning only read the in-memory snapshot; the index lock is
//! held only while a refresh runs.
//!
//! ## Example
//!
//! ```rust,no_run
//! use restorething::{CopyExecutor, RestorerBuilder, SelectionOptions};
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let restorer = RestorerBuilder::new()
//!     .index_path(PathBuf::from("restorething.idx"))
//!     .build(PathBuf::from("sync/.stversions"))?;
//!
//! let options = SelectionOptions {
//!     target_epoch: 1_471_269_600,
//!     before: true,
//!     ..Default::default()
//! };
//! let run = restorer.run(&options, PathBuf::from("restore").as_path(), &CopyExecutor::new(), false)?;
//! println!("{} files would be restored", run.execution.simulated);
//! # Ok(())
//! # }
//! ```

use crate::error::{Result, RestoreError};
use crate::executor::{CopyExecutor, ExecutionReport};
use crate::freeze::{FreezeDecision, FreezePolicy, RescanReason, DEFAULT_FREEZE_WINDOW};
use crate::index::{IndexSnapshot, IndexStore, DEFAULT_LOCK_TIMEOUT};
use crate::planner::{RestorePlan, RestorePlanner};
use crate::scanner::{ArchiveScanner, SkippedEntry, VersionSource, DEFAULT_IGNORE_PATTERNS};
use crate::selector::{self, SelectionOptions, SelectionQuery, SelectionResult, SelectionSummary};
use crate::timestamp::{self, TimePolicy};
use crate::types::{ProgressCallback, RestoreConfig};
use crate::utils::normalize_path;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Default index file name
pub const DEFAULT_INDEX_FILE: &str = "restorething.idx";

/// What a refresh did
#[derive(Debug, Clone)]
pub enum RefreshOutcome {
    /// The committed index was reused without scanning
    Reused {
        /// Seconds since the last full scan
        age_secs: u64,
        /// Records in the index
        records: usize,
    },
    /// The archive was scanned and the index replaced
    Rescanned {
        /// Why the scan happened
        reason: RescanReason,
        /// Records committed
        records: usize,
        /// Archive entries that were not versions
        skipped: Vec<SkippedEntry>,
        /// Scan time
        duration: Duration,
    },
}

impl RefreshOutcome {
    /// Whether the archive was scanned
    pub fn rescanned(&self) -> bool {
        matches!(self, RefreshOutcome::Rescanned { .. })
    }

    /// Records available for selection
    pub fn records(&self) -> usize {
        match self {
            RefreshOutcome::Reused { records, .. } | RefreshOutcome::Rescanned { records, .. } => *records,
        }
    }
}

/// Everything a full restore run produced
#[derive(Debug, Clone)]
pub struct RestoreRun {
    /// Validated query
    pub query: SelectionQuery,
    /// Index refresh outcome
    pub refresh: RefreshOutcome,
    /// Per-file selection results
    pub results: Vec<SelectionResult>,
    /// Selection counts
    pub summary: SelectionSummary,
    /// Planned operations
    pub plan: RestorePlan,
    /// Execution report
    pub execution: ExecutionReport,
}

/// Restore engine for one versioning directory
///
/// Created through [`RestorerBuilder`].
pub struct Restorer {
    versioning_dir: PathBuf,
    store: IndexStore,
    freeze: FreezePolicy,
    config: RestoreConfig,
    source: Box<dyn VersionSource>,
    snapshot: RwLock<Option<Arc<IndexSnapshot>>>,
}

impl std::fmt::Debug for Restorer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Restorer")
            .field("versioning_dir", &self.versioning_dir)
            .field("store", &self.store)
            .field("freeze", &self.freeze)
            .field("config", &self.config)
            .field("loaded", &self.snapshot.read().is_some())
            .finish()
    }
}

impl Restorer {
    /// Versioning directory this restorer reads
    pub fn versioning_dir(&self) -> &Path {
        &self.versioning_dir
    }

    /// The synced folder the archive belongs to (parent of the versioning directory)
    pub fn live_root(&self) -> &Path {
        self.versioning_dir.parent().unwrap_or(&self.versioning_dir)
    }

    /// Settings this restorer was built with
    pub fn config(&self) -> &RestoreConfig {
        &self.config
    }

    /// Index file path
    pub fn index_path(&self) -> &Path {
        self.store.path()
    }

    /// Bring the index up to date under the freeze policy
    ///
    /// # Errors
    ///
    /// - [`RestoreError::IndexLocked`] if another run is rebuilding the index
    /// - [`RestoreError::Scan`] if the archive cannot be walked; the committed
    ///   index is left as it was
    /// - [`RestoreError::IndexCorrupt`] if the committed index is unreadable
    ///   and `no_freeze` is not set
    pub fn refresh(&self, no_freeze: bool) -> Result<RefreshOutcome> {
        self.refresh_at(no_freeze, timestamp::now_epoch())
    }

    /// [`Restorer::refresh`] with an explicit clock
    #[instrument(skip(self), fields(versioning_dir = ?self.versioning_dir))]
    pub fn refresh_at(&self, no_freeze: bool, now: i64) -> Result<RefreshOutcome> {
        let lock = self
            .store
            .lock(Duration::from_millis(self.config.lock_timeout_ms))?;

        let previous = match self.store.load() {
            Ok(previous) => previous,
            Err(RestoreError::IndexCorrupt(msg)) if no_freeze => {
                warn!("Discarding unreadable index: {}", msg);
                None
            }
            Err(e) => return Err(e),
        };

        let decision = self.freeze.decide(
            previous.as_ref().map(IndexSnapshot::metadata),
            now,
            no_freeze,
            &self.versioning_dir,
            self.config.time_policy,
        );
        debug!("Freeze decision: {:?}", decision);

        let outcome = match decision {
            FreezeDecision::Reuse { age_secs } => {
                let snapshot = previous.ok_or_else(|| RestoreError::internal("reuse decided without an index"))?;
                info!(
                    "Reusing index from {} ago ({} records)",
                    humantime::format_duration(Duration::from_secs(age_secs)),
                    snapshot.len()
                );
                let records = snapshot.len();
                *self.snapshot.write() = Some(Arc::new(snapshot));
                RefreshOutcome::Reused { age_secs, records }
            }
            FreezeDecision::Rescan(reason) => {
                info!("Rescanning {:?}: {}", self.versioning_dir, reason);
                let (snapshot, report) = self.store.rebuild(
                    &lock,
                    self.source.as_ref(),
                    self.config.time_policy,
                    now,
                    previous.as_ref().map(IndexSnapshot::metadata),
                )?;
                let records = snapshot.len();
                *self.snapshot.write() = Some(Arc::new(snapshot));
                RefreshOutcome::Rescanned {
                    reason,
                    records,
                    skipped: report.skipped,
                    duration: report.duration,
                }
            }
        };
        Ok(outcome)
    }

    /// Committed snapshot, loading it from disk if no refresh ran yet
    ///
    /// # Errors
    ///
    /// - [`RestoreError::InvalidConfiguration`] if no index has been built
    pub fn snapshot(&self) -> Result<Arc<IndexSnapshot>> {
        if let Some(ref snapshot) = *self.snapshot.read() {
            return Ok(Arc::clone(snapshot));
        }
        let loaded = self.store.load()?.ok_or_else(|| {
            RestoreError::InvalidConfiguration(format!(
                "no index at {:?}; refresh it first",
                self.store.path()
            ))
        })?;
        let loaded = Arc::new(loaded);
        *self.snapshot.write() = Some(Arc::clone(&loaded));
        Ok(loaded)
    }

    /// Run a query against the committed snapshot
    pub fn select(&self, query: &SelectionQuery) -> Result<Vec<SelectionResult>> {
        let snapshot = self.snapshot()?;
        Ok(selector::select(&snapshot, query))
    }

    /// Plan the matched results under `restore_root`
    ///
    /// All-instances queries keep archived file names at the destination.
    pub fn plan(&self, query: &SelectionQuery, results: &[SelectionResult], restore_root: &Path) -> RestorePlan {
        RestorePlanner::for_query(restore_root, query).plan(results)
    }

    /// Validate, refresh, select, plan and execute in one go
    ///
    /// Options are validated before the index is touched.
    #[instrument(skip(self, options, executor))]
    pub fn run(
        &self,
        options: &SelectionOptions,
        restore_root: &Path,
        executor: &CopyExecutor,
        no_freeze: bool,
    ) -> Result<RestoreRun> {
        let query = options.resolve(self.live_root())?;
        let refresh = self.refresh(no_freeze)?;
        let results = self.select(&query)?;
        let summary = SelectionSummary::from_results(&results);
        let plan = self.plan(&query, &results, restore_root);
        let execution = executor.execute(&plan);
        Ok(RestoreRun {
            query,
            refresh,
            results,
            summary,
            plan,
            execution,
        })
    }
}

/// Builder for [`Restorer`]
pub struct RestorerBuilder {
    index_path: PathBuf,
    freeze_window: Duration,
    time_policy: TimePolicy,
    parallel_workers: usize,
    ignore_patterns: Vec<String>,
    lock_timeout: Duration,
    progress_callback: Option<ProgressCallback>,
    source: Option<Box<dyn VersionSource>>,
}

impl Default for RestorerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RestorerBuilder {
    /// Create a new builder with default settings
    ///
    /// # Examples
    ///
    /// ```rust
    /// use restorething::RestorerBuilder;
    ///
    /// let builder = RestorerBuilder::new();
    /// ```
    pub fn new() -> Self {
        Self {
            index_path: PathBuf::from(DEFAULT_INDEX_FILE),
            freeze_window: DEFAULT_FREEZE_WINDOW,
            time_policy: TimePolicy::default(),
            parallel_workers: num_cpus::get(),
            ignore_patterns: DEFAULT_IGNORE_PATTERNS.iter().map(|s| s.to_string()).collect(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            progress_callback: None,
            source: None,
        }
    }

    /// Set the index file path (default `restorething.idx` in the current directory)
    pub fn index_path(mut self, path: PathBuf) -> Self {
        self.index_path = path;
        self
    }

    /// Set how long a committed index is reused (default 24 hours)
    pub fn freeze_window(mut self, window: Duration) -> Self {
        self.freeze_window = window;
        self
    }

    /// Set the calendar for timestamps (default local time)
    pub fn time_policy(mut self, policy: TimePolicy) -> Self {
        self.time_policy = policy;
        self
    }

    /// Set number of parallel workers
    ///
    /// Defaults to the number of CPU cores; values less than 1 become 1.
    pub fn parallel_workers(mut self, count: usize) -> Self {
        self.parallel_workers = count.max(1);
        self
    }

    /// Set glob patterns of archive entries to ignore
    ///
    /// Replaces the defaults (`.syncthing.*.tmp`, `~syncthing~*.tmp`,
    /// `.stfolder`).
    pub fn ignore_patterns(mut self, patterns: Vec<String>) -> Self {
        self.ignore_patterns = patterns;
        self
    }

    /// Set how long to wait for another run's index lock (default 2 seconds)
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Report scan progress
    pub fn progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    /// Scan through a custom source instead of the archive scanner
    pub fn version_source(mut self, source: Box<dyn VersionSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Build a restorer for `versioning_dir`
    ///
    /// Relative paths are made absolute against the current directory and
    /// `.`/`..` components are resolved lexically, so the live folder is the
    /// real parent of the archive. The directory itself is only checked when
    /// the archive is scanned.
    ///
    /// # Errors
    ///
    /// - [`RestoreError::InvalidConfiguration`] if a path is empty
    /// - [`RestoreError::InvalidPattern`] if an ignore pattern is invalid
    pub fn build(self, versioning_dir: PathBuf) -> Result<Restorer> {
        if versioning_dir.as_os_str().is_empty() {
            return Err(RestoreError::InvalidConfiguration(
                "versioning directory must not be empty".to_string(),
            ));
        }
        if self.index_path.as_os_str().is_empty() {
            return Err(RestoreError::InvalidConfiguration(
                "index path must not be empty".to_string(),
            ));
        }
        let versioning_dir = normalize_path(&std::path::absolute(&versioning_dir)?);
        let index_path = normalize_path(&std::path::absolute(&self.index_path)?);

        let source: Box<dyn VersionSource> = match self.source {
            Some(source) => source,
            None => {
                let mut scanner = ArchiveScanner::new(versioning_dir.clone(), self.time_policy)
                    .with_ignore_patterns(self.ignore_patterns.clone())?
                    .with_parallel_workers(self.parallel_workers);
                if let Some(callback) = self.progress_callback {
                    scanner = scanner.with_progress_callback(callback);
                }
                Box::new(scanner)
            }
        };

        let config = RestoreConfig {
            versioning_dir: versioning_dir.clone(),
            index_path: index_path.clone(),
            freeze_window_secs: self.freeze_window.as_secs(),
            time_policy: self.time_policy,
            parallel_workers: self.parallel_workers,
            ignore_patterns: self.ignore_patterns,
            lock_timeout_ms: self.lock_timeout.as_millis() as u64,
            version: crate::VERSION.to_string(),
        };
        debug!("Built restorer: {:?}", config);

        Ok(Restorer {
            versioning_dir,
            store: IndexStore::new(index_path).with_config(config.clone()),
            freeze: FreezePolicy::new(self.freeze_window),
            config,
            source,
            snapshot: RwLock::new(None),
        })
    }
}
