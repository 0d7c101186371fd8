//! Restore planning
//!
//! Turns selection results into an ordered list of copy operations. Planning
//! is pure: no filesystem access happens here, and the same results always
//! produce the same plan.

use crate::selector::{SelectionMode, SelectionOutcome, SelectionQuery, SelectionResult};
use crate::types::LogicalFile;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// What executing an entry does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlanKind {
    /// Copy the archived content
    Content,
    /// The chosen version records a deletion or rename; there is nothing to copy
    Tombstone,
}

/// One planned restore operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanEntry {
    /// File being restored
    pub logical_file: LogicalFile,
    /// Archived version to copy from
    pub source_path: PathBuf,
    /// Where the version is restored to
    pub destination_path: PathBuf,
    /// Copy or tombstone
    pub kind: PlanKind,
    /// Timestamp of the chosen version
    pub origin_timestamp: i64,
    /// Size of the archived file
    pub size_bytes: u64,
    /// Modification time to give the restored file
    pub source_mtime: i64,
}

/// Several entries restoring to the same destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanConflict {
    /// Shared destination
    pub destination: PathBuf,
    /// Sources competing for it, in plan order
    pub sources: Vec<PathBuf>,
}

/// Ordered restore plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestorePlan {
    /// Root every destination lives under
    pub restore_root: PathBuf,
    /// Operations in logical file order
    pub entries: Vec<PlanEntry>,
    /// Destination collisions; the colliding entries stay in `entries`
    pub conflicts: Vec<PlanConflict>,
}

impl RestorePlan {
    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there is nothing to restore
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bytes that content entries would copy
    pub fn total_bytes(&self) -> u64 {
        self.entries
            .iter()
            .filter(|e| e.kind == PlanKind::Content)
            .map(|e| e.size_bytes)
            .sum()
    }
}

/// Builds restore plans under one restore root
#[derive(Debug, Clone)]
pub struct RestorePlanner {
    restore_root: PathBuf,
    versioned_names: bool,
}

impl RestorePlanner {
    /// Planner restoring under `restore_root` with live file names
    pub fn new(restore_root: impl Into<PathBuf>) -> Self {
        Self {
            restore_root: restore_root.into(),
            versioned_names: false,
        }
    }

    /// Planner suited to `query`: all-instances queries keep archived names
    pub fn for_query(restore_root: impl Into<PathBuf>, query: &SelectionQuery) -> Self {
        let versioned = matches!(query.mode, SelectionMode::AllInstancesOf(_));
        Self::new(restore_root).with_versioned_names(versioned)
    }

    /// Keep the archived file name (with its version tag) at the destination
    pub fn with_versioned_names(mut self, versioned: bool) -> Self {
        self.versioned_names = versioned;
        self
    }

    /// Restore root
    pub fn restore_root(&self) -> &Path {
        &self.restore_root
    }

    /// Plan the matched results; unmatched results produce no entries
    pub fn plan(&self, results: &[SelectionResult]) -> RestorePlan {
        let entries: Vec<PlanEntry> = results
            .iter()
            .filter_map(|result| match result.outcome {
                SelectionOutcome::Matched(ref record) => Some(record),
                SelectionOutcome::NoMatch(_) => None,
            })
            .map(|record| {
                let name = if self.versioned_names {
                    record.archived_name()
                } else {
                    record.logical_file.base_name.clone()
                };
                PlanEntry {
                    logical_file: record.logical_file.clone(),
                    source_path: record.source_path.clone(),
                    destination_path: self
                        .restore_root
                        .join(&record.logical_file.relative_dir)
                        .join(name),
                    kind: if record.is_deleted_or_renamed {
                        PlanKind::Tombstone
                    } else {
                        PlanKind::Content
                    },
                    origin_timestamp: record.timestamp_epoch,
                    size_bytes: record.size_bytes,
                    source_mtime: record.source_mtime,
                }
            })
            .collect();

        let mut by_destination: BTreeMap<&Path, Vec<PathBuf>> = BTreeMap::new();
        for entry in &entries {
            by_destination
                .entry(entry.destination_path.as_path())
                .or_default()
                .push(entry.source_path.clone());
        }
        let conflicts = by_destination
            .into_iter()
            .filter(|(_, sources)| sources.len() > 1)
            .map(|(destination, sources)| PlanConflict {
                destination: destination.to_path_buf(),
                sources,
            })
            .collect();

        RestorePlan {
            restore_root: self.restore_root.clone(),
            entries,
            conflicts,
        }
    }
}
