//! # restorething - Point-in-time restore from Syncthing version archives
//!
//! Syncthing's file versioning keeps old revisions of synced files in a
//! `.stversions` folder, each tagged with the time it was archived. This crate
//! answers "what did this folder look like around time T" from that archive and
//! copies the answer into a restore directory.
//!
//! ## Overview
//!
//! - **Decoding**: archived names such as `report~20160815-143000.txt` are
//!   decoded into the live file they belong to, a timestamp, and conflict or
//!   delete/rename flags
//! - **Indexing**: a full scan of the archive is persisted as one snapshot file
//!   and reused for 24 hours (the freeze window)
//! - **Selection**: for every file, the version nearest to, before, after or
//!   within a window around the target time is chosen
//! - **Planning and execution**: chosen versions are mapped onto the restore
//!   directory and copied, simulated by default
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use restorething::{CopyExecutor, RestorerBuilder, SelectionQuery, SelectionMode};
//! use restorething::TimePolicy;
//! use chrono::NaiveDate;
//! use std::path::{Path, PathBuf};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let restorer = RestorerBuilder::new().build(PathBuf::from("sync/.stversions"))?;
//! restorer.refresh(false)?;
//!
//! let date = NaiveDate::from_ymd_opt(2016, 8, 15).unwrap();
//! let target = TimePolicy::Local.target_epoch(date, 14)?;
//! let query = SelectionQuery::new(target).with_mode(SelectionMode::BeforeOnly);
//!
//! let results = restorer.select(&query)?;
//! let plan = restorer.plan(&query, &results, Path::new("restore"));
//! let report = CopyExecutor::new().with_dry_run(false).execute(&plan);
//! println!("Restored {} files", report.copied);
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency
//!
//! The scanner decodes archive entries on a rayon pool. Rebuilding the index
//! takes an exclusive advisory lock (`<index>.lock`); a second run waits for a
//! short timeout and then fails with [`RestoreError::IndexLocked`]. Selection
//! and planning read the committed snapshot without locking.
//!
//! ## Error Handling
//!
//! All operations return `Result<T, RestoreError>`. Files without an acceptable
//! version are not errors; they are reported through
//! [`selector::SelectionOutcome::NoMatch`].
//!
//! ## Module Organization
//!
//! - [`timestamp`]: calendar policy shared by decoding and target conversion
//! - [`decoder`]: versioned file name grammar
//! - [`scanner`]: archive walk
//! - [`index`]: persisted snapshot and lock
//! - [`freeze`]: reuse-or-rescan policy
//! - [`selector`]: temporal matching
//! - [`planner`]: destination mapping
//! - [`executor`]: copying
//! - [`restorer`]: the orchestrating [`Restorer`]

// Public API modules
pub mod decoder;
pub mod error;
pub mod executor;
pub mod freeze;
pub mod index;
pub mod planner;
pub mod restorer;
pub mod scanner;
pub mod selector;
pub mod timestamp;
pub mod types;
pub mod utils;

/// Crate version recorded in index snapshots
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Re-export main types for convenience
pub use error::{Result, RestoreError};
pub use executor::{CopyExecutor, ExecutionReport, OverwritePolicy, OverwritePrompt};
pub use freeze::{FreezeDecision, FreezePolicy, RescanReason};
pub use planner::{PlanEntry, PlanKind, RestorePlan, RestorePlanner};
pub use restorer::{RefreshOutcome, RestoreRun, Restorer, RestorerBuilder};
pub use scanner::{ArchiveScanner, ScanReport, VersionSource};
pub use selector::{
    Filter, NoMatchReason, SelectionMode, SelectionOptions, SelectionOutcome, SelectionQuery,
    SelectionResult, SelectionSummary,
};
pub use timestamp::TimePolicy;
pub use types::*;
