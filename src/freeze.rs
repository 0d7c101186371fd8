//! Index freeze policy
//!
//! Walking a large versioning tree is the slowest part of a run, and users
//! typically run several queries in a row. The freeze policy lets a recent
//! index be reused without touching the archive.

use crate::timestamp::TimePolicy;
use crate::types::IndexMetadata;
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Default freeze window: one day
pub const DEFAULT_FREEZE_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// Why a fresh scan is needed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RescanReason {
    /// No committed index exists yet
    NoIndex,
    /// Caller asked to ignore the freeze window
    Override,
    /// Index was built from a different versioning directory
    ArchiveChanged,
    /// Index was built with a different calendar
    TimePolicyChanged,
    /// Index is older than the freeze window
    Stale,
}

impl fmt::Display for RescanReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RescanReason::NoIndex => "no index yet",
            RescanReason::Override => "freeze overridden",
            RescanReason::ArchiveChanged => "versioning directory changed",
            RescanReason::TimePolicyChanged => "time policy changed",
            RescanReason::Stale => "index older than freeze window",
        };
        f.write_str(text)
    }
}

/// What to do with the committed index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreezeDecision {
    /// Use the committed index without scanning
    Reuse {
        /// Seconds since the last full scan
        age_secs: u64,
    },
    /// Scan the archive and replace the index
    Rescan(RescanReason),
}

impl FreezeDecision {
    /// Whether a scan is required
    pub fn needs_scan(&self) -> bool {
        matches!(self, FreezeDecision::Rescan(_))
    }
}

/// Decides between reusing and rebuilding the index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreezePolicy {
    window: Duration,
}

impl Default for FreezePolicy {
    fn default() -> Self {
        Self::new(DEFAULT_FREEZE_WINDOW)
    }
}

impl FreezePolicy {
    /// Create a policy with the given freeze window
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    /// Length of the freeze window
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Decide whether the committed index can be reused at `now`
    ///
    /// A clock that moved backwards since the last scan counts as age zero.
    pub fn decide(
        &self,
        metadata: Option<&IndexMetadata>,
        now: i64,
        no_freeze: bool,
        versioning_dir: &Path,
        time_policy: TimePolicy,
    ) -> FreezeDecision {
        let Some(metadata) = metadata else {
            return FreezeDecision::Rescan(RescanReason::NoIndex);
        };
        if no_freeze {
            return FreezeDecision::Rescan(RescanReason::Override);
        }
        if metadata.versioning_dir != versioning_dir {
            return FreezeDecision::Rescan(RescanReason::ArchiveChanged);
        }
        if metadata.time_policy != time_policy {
            return FreezeDecision::Rescan(RescanReason::TimePolicyChanged);
        }

        let age_secs = u64::try_from(now - metadata.last_full_scan_epoch).unwrap_or(0);
        if age_secs >= self.window.as_secs() {
            FreezeDecision::Rescan(RescanReason::Stale)
        } else {
            FreezeDecision::Reuse { age_secs }
        }
    }
}
