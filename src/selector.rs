//! Temporal version selection
//!
//! Given a target time, the selector picks for every logical file in the index
//! the archived version that best matches it. The matching rule is one
//! [`SelectionMode`] and the set of files considered is narrowed by one
//! [`Filter`]; both are single enums so that conflicting choices cannot be
//! expressed once a query exists. Raw option groups, as a command line
//! delivers them, are validated by [`SelectionOptions::resolve`].
//!
//! A file without an acceptable version is never an error: its result carries
//! [`SelectionOutcome::NoMatch`] with the reason.
//!
//! ## Example
//!
//! ```rust
//! use restorething::selector::{choose_version, SelectionMode, SelectionOutcome, SelectionQuery};
//! use restorething::types::{LogicalFile, VersionRecord};
//! use std::path::PathBuf;
//!
//! let versions: Vec<VersionRecord> = [100, 200, 500]
//!     .iter()
//!     .map(|&ts| VersionRecord {
//!         logical_file: LogicalFile::new("", "a.txt"),
//!         timestamp_epoch: ts,
//!         source_path: PathBuf::from(format!("/v/a~{}.txt", ts)),
//!         is_conflict: false,
//!         is_deleted_or_renamed: false,
//!         size_bytes: 0,
//!         source_mtime: ts,
//!     })
//!     .collect();
//!
//! let query = SelectionQuery::new(180).with_mode(SelectionMode::Nearest);
//! match choose_version(&versions, &query) {
//!     SelectionOutcome::Matched(record) => assert_eq!(record.timestamp_epoch, 200),
//!     SelectionOutcome::NoMatch(reason) => panic!("{}", reason),
//! }
//! ```

use crate::error::{Result, RestoreError};
use crate::index::IndexSnapshot;
use crate::types::{LogicalFile, VersionRecord};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Matching rule between versions and the target time
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub enum SelectionMode {
    /// Closest version in either direction
    #[default]
    Nearest,
    /// Latest version at or before the target
    BeforeOnly,
    /// Earliest version at or after the target
    AfterOnly,
    /// Closest version within `hours` of the target
    Window {
        /// Half-width of the window in hours
        hours: u32,
    },
    /// Every version of one file
    AllInstancesOf(LogicalFile),
}

/// Restriction on which logical files are considered
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub enum Filter {
    /// Every file
    #[default]
    None,
    /// Files whose name contains the substring
    FileName(String),
    /// Files whose directory contains the substring
    DirName(String),
    /// Exactly one file
    DirAndFile(LogicalFile),
}

impl Filter {
    /// Whether `file` passes this filter
    pub fn matches(&self, file: &LogicalFile) -> bool {
        match self {
            Filter::None => true,
            Filter::FileName(needle) => file.base_name.contains(needle.as_str()),
            Filter::DirName(needle) => file.dir_string().contains(needle.as_str()),
            Filter::DirAndFile(exact) => exact == file,
        }
    }
}

/// A validated selection request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectionQuery {
    /// Target time in epoch seconds
    pub target_epoch: i64,
    /// Matching rule
    pub mode: SelectionMode,
    /// File restriction
    pub filter: Filter,
    /// Consider sync-conflict copies
    pub include_conflicts: bool,
    /// Consider delete/rename markers
    pub include_deleted_or_renamed: bool,
}

impl SelectionQuery {
    /// Nearest-match query over every file, conflicts excluded, markers included
    pub fn new(target_epoch: i64) -> Self {
        Self {
            target_epoch,
            mode: SelectionMode::default(),
            filter: Filter::default(),
            include_conflicts: false,
            include_deleted_or_renamed: true,
        }
    }

    /// Set the matching rule
    pub fn with_mode(mut self, mode: SelectionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the file restriction
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    /// Consider sync-conflict copies
    pub fn include_conflicts(mut self, include: bool) -> Self {
        self.include_conflicts = include;
        self
    }

    /// Consider delete/rename markers
    pub fn include_deleted_or_renamed(mut self, include: bool) -> Self {
        self.include_deleted_or_renamed = include;
        self
    }

    fn admits(&self, record: &VersionRecord) -> bool {
        (self.include_conflicts || !record.is_conflict)
            && (self.include_deleted_or_renamed || !record.is_deleted_or_renamed)
    }
}

/// Unvalidated selection options, one field per command line option
#[derive(Debug, Clone, Default)]
pub struct SelectionOptions {
    /// Target time in epoch seconds
    pub target_epoch: i64,
    /// Before-only mode requested
    pub before: bool,
    /// After-only mode requested
    pub after: bool,
    /// Window mode requested with this half-width in hours
    pub plus_minus: Option<u32>,
    /// All-instances mode requested for this absolute live path
    pub all_instances: Option<PathBuf>,
    /// File name substring filter
    pub filter_file: Option<String>,
    /// Directory substring filter
    pub filter_dir: Option<String>,
    /// Exact file filter as an absolute live path
    pub filter_dir_and_file: Option<PathBuf>,
    /// Consider sync-conflict copies
    pub include_conflicts: bool,
    /// Leave out delete/rename markers
    pub exclude_deleted_or_renamed: bool,
}

impl SelectionOptions {
    /// Validate the options into a query
    ///
    /// Paths are resolved against `live_root`, the synced folder the archive
    /// belongs to.
    ///
    /// # Errors
    ///
    /// - [`RestoreError::SelectionInput`] if more than one mode or more than
    ///   one filter is given, a value is empty, or a path is not absolute or
    ///   lies outside `live_root`
    pub fn resolve(&self, live_root: &Path) -> Result<SelectionQuery> {
        let modes = [
            self.before,
            self.after,
            self.plus_minus.is_some(),
            self.all_instances.is_some(),
        ];
        if modes.iter().filter(|&&given| given).count() > 1 {
            return Err(RestoreError::selection(
                "only one of before, after, plus-minus and all-instances may be given",
            ));
        }

        let filters = [
            self.filter_file.is_some(),
            self.filter_dir.is_some(),
            self.filter_dir_and_file.is_some(),
        ];
        if filters.iter().filter(|&&given| given).count() > 1 {
            return Err(RestoreError::selection(
                "only one of filter-file, filter-dir and filter-dir-and-file may be given",
            ));
        }

        let mode = if self.before {
            SelectionMode::BeforeOnly
        } else if self.after {
            SelectionMode::AfterOnly
        } else if let Some(hours) = self.plus_minus {
            SelectionMode::Window { hours }
        } else if let Some(ref path) = self.all_instances {
            SelectionMode::AllInstancesOf(resolve_live_path(live_root, path, "all-instances")?)
        } else {
            SelectionMode::Nearest
        };

        let filter = if let Some(ref needle) = self.filter_file {
            Filter::FileName(non_empty(needle, "filter-file")?)
        } else if let Some(ref needle) = self.filter_dir {
            Filter::DirName(non_empty(needle, "filter-dir")?)
        } else if let Some(ref path) = self.filter_dir_and_file {
            Filter::DirAndFile(resolve_live_path(live_root, path, "filter-dir-and-file")?)
        } else {
            Filter::None
        };

        Ok(SelectionQuery {
            target_epoch: self.target_epoch,
            mode,
            filter,
            include_conflicts: self.include_conflicts,
            include_deleted_or_renamed: !self.exclude_deleted_or_renamed,
        })
    }
}

/// Blank values are rejected; anything else is matched verbatim
fn non_empty(value: &str, option: &str) -> Result<String> {
    if value.trim().is_empty() {
        return Err(RestoreError::selection(format!("{} requires a non-empty value", option)));
    }
    Ok(value.to_string())
}

fn resolve_live_path(live_root: &Path, path: &Path, option: &str) -> Result<LogicalFile> {
    if path.as_os_str().is_empty() {
        return Err(RestoreError::selection(format!("{} requires a non-empty value", option)));
    }
    if !path.is_absolute() {
        return Err(RestoreError::selection(format!(
            "{} path {:?} is not absolute",
            option, path
        )));
    }
    LogicalFile::from_live_path(live_root, path)
}

/// Why a file has no selected version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum NoMatchReason {
    /// Every version is later than the target
    NothingBefore,
    /// Every version is earlier than the target
    NothingAfter,
    /// No version falls inside the window
    OutsideWindow,
    /// All versions are conflicts or markers that the query leaves out
    Excluded,
    /// The requested file has no versions in the index
    UnknownFile,
}

impl fmt::Display for NoMatchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            NoMatchReason::NothingBefore => "no version before target",
            NoMatchReason::NothingAfter => "no version after target",
            NoMatchReason::OutsideWindow => "no version inside the window",
            NoMatchReason::Excluded => "only conflict or deleted versions, filtered out",
            NoMatchReason::UnknownFile => "file not found in the versioning directory",
        };
        f.write_str(text)
    }
}

/// Result for one logical file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SelectionOutcome {
    /// The chosen version
    Matched(VersionRecord),
    /// No acceptable version
    NoMatch(NoMatchReason),
}

impl SelectionOutcome {
    /// The chosen version, if any
    pub fn matched(&self) -> Option<&VersionRecord> {
        match self {
            SelectionOutcome::Matched(record) => Some(record),
            SelectionOutcome::NoMatch(_) => None,
        }
    }
}

/// Selection outcome for one logical file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectionResult {
    /// File considered
    pub logical_file: LogicalFile,
    /// What was chosen
    pub outcome: SelectionOutcome,
}

/// Counts of a selection run, for reporting
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SelectionSummary {
    /// Results with a chosen version
    pub matched: usize,
    /// Results without one, by reason
    pub unmatched: BTreeMap<NoMatchReason, usize>,
}

impl SelectionSummary {
    /// Summarise a result list
    pub fn from_results(results: &[SelectionResult]) -> Self {
        let mut summary = Self::default();
        for result in results {
            match result.outcome {
                SelectionOutcome::Matched(_) => summary.matched += 1,
                SelectionOutcome::NoMatch(reason) => {
                    *summary.unmatched.entry(reason).or_insert(0) += 1;
                }
            }
        }
        summary
    }

    /// Total results without a version
    pub fn unmatched_total(&self) -> usize {
        self.unmatched.values().sum()
    }
}

/// Pick the version of one file that best matches `query`
///
/// `versions` are all versions of a single file. In all-instances mode this
/// returns the nearest version; use [`select`] to get every instance.
pub fn choose_version(versions: &[VersionRecord], query: &SelectionQuery) -> SelectionOutcome {
    let candidates: Vec<&VersionRecord> = versions.iter().filter(|r| query.admits(r)).collect();
    if candidates.is_empty() {
        return SelectionOutcome::NoMatch(if versions.is_empty() {
            NoMatchReason::UnknownFile
        } else {
            NoMatchReason::Excluded
        });
    }

    let target = query.target_epoch;
    let chosen = match query.mode {
        SelectionMode::Nearest | SelectionMode::AllInstancesOf(_) => nearest(candidates.iter().copied(), target),
        SelectionMode::BeforeOnly => candidates
            .iter()
            .copied()
            .filter(|r| r.timestamp_epoch <= target)
            .max_by(|a, b| {
                a.timestamp_epoch
                    .cmp(&b.timestamp_epoch)
                    .then_with(|| b.source_path.cmp(&a.source_path))
            })
            .ok_or(NoMatchReason::NothingBefore),
        SelectionMode::AfterOnly => candidates
            .iter()
            .copied()
            .filter(|r| r.timestamp_epoch >= target)
            .min_by(|a, b| a.version_order(b))
            .ok_or(NoMatchReason::NothingAfter),
        SelectionMode::Window { hours } => {
            let half_width = i64::from(hours) * 3600;
            let lo = target.saturating_sub(half_width);
            let hi = target.saturating_add(half_width);
            nearest(
                candidates
                    .iter()
                    .copied()
                    .filter(|r| (lo..=hi).contains(&r.timestamp_epoch)),
                target,
            )
            .map_err(|_| NoMatchReason::OutsideWindow)
        }
    };

    match chosen {
        Ok(record) => SelectionOutcome::Matched(record.clone()),
        Err(reason) => SelectionOutcome::NoMatch(reason),
    }
}

fn nearest<'a>(
    candidates: impl Iterator<Item = &'a VersionRecord>,
    target: i64,
) -> std::result::Result<&'a VersionRecord, NoMatchReason> {
    candidates
        .min_by(|a, b| {
            a.distance_to(target)
                .cmp(&b.distance_to(target))
                .then_with(|| a.version_order(b))
        })
        .ok_or(NoMatchReason::OutsideWindow)
}

/// Run a query against a committed index
///
/// Results are in logical file order; all-instances results are in
/// ascending timestamp order.
pub fn select(index: &IndexSnapshot, query: &SelectionQuery) -> Vec<SelectionResult> {
    let results = match query.mode {
        SelectionMode::AllInstancesOf(ref file) => all_instances(index, file, query),
        _ => index
            .files()
            .filter(|(file, _)| query.filter.matches(file))
            .map(|(file, versions)| SelectionResult {
                logical_file: file.clone(),
                outcome: choose_version(versions, query),
            })
            .collect(),
    };
    debug!(
        "Selection over {} files returned {} results",
        index.file_count(),
        results.len()
    );
    results
}

fn all_instances(index: &IndexSnapshot, file: &LogicalFile, query: &SelectionQuery) -> Vec<SelectionResult> {
    if !query.filter.matches(file) {
        return Vec::new();
    }
    let versions = index.versions_of(file);
    let no_match = |reason| {
        vec![SelectionResult {
            logical_file: file.clone(),
            outcome: SelectionOutcome::NoMatch(reason),
        }]
    };
    if versions.is_empty() {
        return no_match(NoMatchReason::UnknownFile);
    }

    let results: Vec<SelectionResult> = versions
        .iter()
        .filter(|r| query.admits(r))
        .map(|r| SelectionResult {
            logical_file: file.clone(),
            outcome: SelectionOutcome::Matched(r.clone()),
        })
        .collect();
    if results.is_empty() {
        return no_match(NoMatchReason::Excluded);
    }
    results
}
