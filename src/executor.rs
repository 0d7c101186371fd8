//! Plan execution
//!
//! The executor copies planned versions into the restore directory. It
//! simulates by default: nothing is written until dry-run is switched off.
//! Existing destinations are only replaced under [`OverwritePolicy::Force`] or
//! when an [`OverwritePrompt`] agrees.

use crate::planner::{PlanEntry, PlanKind, RestorePlan};
use crate::types::{ProgressCallback, ProgressInfo};
use filetime::FileTime;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// What to do when a destination already exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverwritePolicy {
    /// Ask the configured prompt; without one, keep the existing file
    #[default]
    Prompt,
    /// Replace without asking
    Force,
    /// Always keep the existing file
    Skip,
}

/// Asks whether an existing destination may be replaced
pub trait OverwritePrompt: Send + Sync {
    /// Return `true` to replace `destination`
    fn confirm_overwrite(&self, destination: &Path) -> bool;
}

/// Per-entry execution status
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum EntryStatus {
    /// Content copied
    Copied,
    /// Dry run: content would have been copied
    Simulated,
    /// Destination existed and was kept
    SkippedExisting,
    /// Version is a delete/rename marker; nothing written
    Tombstoned,
    /// Copy failed
    Failed(String),
}

/// Status of one plan entry after execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryReport {
    /// Archived source
    pub source_path: PathBuf,
    /// Restore destination
    pub destination_path: PathBuf,
    /// What happened
    pub status: EntryStatus,
}

/// Outcome of executing a plan
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionReport {
    /// Whether this was a dry run
    pub dry_run: bool,
    /// Files copied
    pub copied: usize,
    /// Destinations left in place
    pub skipped_existing: usize,
    /// Tombstone entries
    pub tombstoned: usize,
    /// Files a dry run would have copied
    pub simulated: usize,
    /// Bytes written
    pub bytes_written: u64,
    /// Failed destinations with the error
    pub failures: Vec<(PathBuf, String)>,
    /// Per-entry status in plan order
    pub entries: Vec<EntryReport>,
    /// Wall time of the execution
    #[serde(skip)]
    pub duration: Duration,
}

impl ExecutionReport {
    /// Whether every entry succeeded
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Copies a restore plan to disk
pub struct CopyExecutor {
    dry_run: bool,
    overwrite: OverwritePolicy,
    prompt: Option<Box<dyn OverwritePrompt>>,
    progress_callback: Option<ProgressCallback>,
}

impl std::fmt::Debug for CopyExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CopyExecutor")
            .field("dry_run", &self.dry_run)
            .field("overwrite", &self.overwrite)
            .field("prompt", &self.prompt.is_some())
            .finish()
    }
}

impl Default for CopyExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl CopyExecutor {
    /// Dry-run executor that prompts before overwriting
    pub fn new() -> Self {
        Self {
            dry_run: true,
            overwrite: OverwritePolicy::default(),
            prompt: None,
            progress_callback: None,
        }
    }

    /// Enable or disable dry run
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Set the overwrite policy
    pub fn with_overwrite(mut self, policy: OverwritePolicy) -> Self {
        self.overwrite = policy;
        self
    }

    /// Set the prompt used under [`OverwritePolicy::Prompt`]
    pub fn with_prompt(mut self, prompt: Box<dyn OverwritePrompt>) -> Self {
        self.prompt = Some(prompt);
        self
    }

    /// Report progress for every entry
    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    /// Whether this executor only simulates
    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Execute `plan`
    ///
    /// Per-entry failures are recorded in the report and do not stop the
    /// remaining entries.
    pub fn execute(&self, plan: &RestorePlan) -> ExecutionReport {
        let start = Instant::now();
        let mut report = ExecutionReport {
            dry_run: self.dry_run,
            ..Default::default()
        };

        for (i, entry) in plan.entries.iter().enumerate() {
            let status = self.execute_entry(entry, &mut report.bytes_written);
            match status {
                EntryStatus::Copied => report.copied += 1,
                EntryStatus::Simulated => report.simulated += 1,
                EntryStatus::SkippedExisting => report.skipped_existing += 1,
                EntryStatus::Tombstoned => report.tombstoned += 1,
                EntryStatus::Failed(ref reason) => {
                    warn!("Failed to restore {:?}: {}", entry.destination_path, reason);
                    report
                        .failures
                        .push((entry.destination_path.clone(), reason.clone()));
                }
            }
            report.entries.push(EntryReport {
                source_path: entry.source_path.clone(),
                destination_path: entry.destination_path.clone(),
                status,
            });

            if let Some(ref callback) = self.progress_callback {
                callback(ProgressInfo {
                    operation: "Restoring".to_string(),
                    current_item: Some(entry.logical_file.to_string()),
                    processed: i + 1,
                    total: Some(plan.len()),
                });
            }
        }

        report.duration = start.elapsed();
        info!(
            "Executed plan ({}): {} copied, {} simulated, {} skipped, {} tombstoned, {} failed",
            if self.dry_run { "dry run" } else { "live" },
            report.copied,
            report.simulated,
            report.skipped_existing,
            report.tombstoned,
            report.failures.len()
        );
        report
    }

    fn execute_entry(&self, entry: &PlanEntry, bytes_written: &mut u64) -> EntryStatus {
        if entry.kind == PlanKind::Tombstone {
            trace!("Tombstone for {}", entry.logical_file);
            return EntryStatus::Tombstoned;
        }
        if self.dry_run {
            return EntryStatus::Simulated;
        }

        let destination = &entry.destination_path;
        if destination.exists() && !self.may_overwrite(destination) {
            debug!("Keeping existing {:?}", destination);
            return EntryStatus::SkippedExisting;
        }

        match copy_version(entry) {
            Ok(bytes) => {
                *bytes_written += bytes;
                EntryStatus::Copied
            }
            Err(e) => EntryStatus::Failed(e.to_string()),
        }
    }

    fn may_overwrite(&self, destination: &Path) -> bool {
        match self.overwrite {
            OverwritePolicy::Force => true,
            OverwritePolicy::Skip => false,
            OverwritePolicy::Prompt => self
                .prompt
                .as_ref()
                .map(|prompt| prompt.confirm_overwrite(destination))
                .unwrap_or(false),
        }
    }
}

fn copy_version(entry: &PlanEntry) -> std::io::Result<u64> {
    if let Some(parent) = entry.destination_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let bytes = fs::copy(&entry.source_path, &entry.destination_path)?;
    filetime::set_file_mtime(
        &entry.destination_path,
        FileTime::from_unix_time(entry.source_mtime, 0),
    )?;
    trace!(
        "Copied {:?} -> {:?} ({} bytes)",
        entry.source_path,
        entry.destination_path,
        bytes
    );
    Ok(bytes)
}
