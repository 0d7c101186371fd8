//! Error types for the restorething library
//!
//! This module defines the error taxonomy of a restore run. Errors fall in two
//! groups:
//!
//! - **Fatal to the run**: scan, lock, selection-input and storage errors abort
//!   the whole run before anything is written.
//! - **Local**: per-entry decode failures are collected into the scan report
//!   and never abort a scan.
//!
//! A file without an acceptable version is not an error at all; it is reported
//! through [`crate::selector::SelectionOutcome::NoMatch`]. Destination
//! collisions are reported through [`crate::planner::PlanConflict`].

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the restorething library
pub type Result<T> = std::result::Result<T, RestoreError>;

/// Main error type for all restorething operations
#[derive(Debug, Error)]
pub enum RestoreError {
    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Errors during bincode serialization/deserialization
    #[error("Bincode error: {0}")]
    Bincode(String),

    /// Archive entry name does not follow the versioned-filename grammar
    #[error("Cannot decode version name {name:?}: {reason}")]
    Decode {
        /// Offending file name
        name: String,
        /// What the decoder expected
        reason: String,
    },

    /// Versioning directory missing or unreadable
    #[error("Scan failed: {0}")]
    Scan(String),

    /// Another run holds the index store lock
    #[error("Index busy: {0:?} is locked by another run")]
    IndexLocked(PathBuf),

    /// Index snapshot could not be decoded
    #[error("Index corrupt: {0}")]
    IndexCorrupt(String),

    /// Conflicting or incomplete selection options
    #[error("Invalid selection: {0}")]
    SelectionInput(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Pattern parsing error
    #[error("Invalid ignore pattern: {0}")]
    InvalidPattern(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<bincode::error::DecodeError> for RestoreError {
    fn from(err: bincode::error::DecodeError) -> Self {
        RestoreError::Bincode(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for RestoreError {
    fn from(err: bincode::error::EncodeError) -> Self {
        RestoreError::Bincode(err.to_string())
    }
}

impl From<globset::Error> for RestoreError {
    fn from(err: globset::Error) -> Self {
        RestoreError::InvalidPattern(err.to_string())
    }
}

impl RestoreError {
    /// Create a decode error for a file name
    pub fn decode(name: impl Into<String>, reason: impl Into<String>) -> Self {
        RestoreError::Decode {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a scan error with a custom message
    pub fn scan(msg: impl Into<String>) -> Self {
        RestoreError::Scan(msg.into())
    }

    /// Create a selection input error with a custom message
    pub fn selection(msg: impl Into<String>) -> Self {
        RestoreError::SelectionInput(msg.into())
    }

    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        RestoreError::Internal(msg.into())
    }

    /// Whether this error aborts the whole run
    ///
    /// Decode errors are the only kind the scanner recovers from.
    pub fn is_fatal_to_run(&self) -> bool {
        !matches!(self, RestoreError::Decode { .. })
    }

    /// Check if retrying later may succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(self, RestoreError::IndexLocked(_))
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            RestoreError::IndexLocked(path) => {
                format!(
                    "The index at {:?} is being rebuilt by another restorething run. Wait for it to finish and try again.",
                    path
                )
            }
            RestoreError::Scan(msg) => {
                format!("{}. Check --versions-dir points at the Syncthing .stversions folder.", msg)
            }
            RestoreError::IndexCorrupt(msg) => {
                format!("{}. Delete the index file or run with --no-freeze to rebuild it.", msg)
            }
            _ => self.to_string(),
        }
    }
}
