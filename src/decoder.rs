//! Version filename decoding
//!
//! Syncthing never stores metadata next to archived versions; everything the
//! index knows about a version is encoded in its file name. This module turns
//! such a name back into the identity of the live file plus the version
//! timestamp.
//!
//! ## Grammar
//!
//! ```text
//! timestamp   = YYYYMMDD "-" HHMMSS
//! version-tag = "~" timestamp [ "~deleted" | "~renamed" ]
//! conflict    = ".sync-conflict-" timestamp [ "-" DEVICE ]
//!
//! report~20160815-143000.txt                        plain version
//! report.txt~20160815-143000                        plain version, old layout
//! report~20160815-143000~deleted.txt                deletion marker
//! report.sync-conflict-20160815-143000-7ZXUNF2.txt  conflict copy
//! ```
//!
//! The version tag sits in front of the extension (or at the very end in old
//! archives). When a name carries both a version tag and a conflict segment,
//! the version tag supplies the timestamp.

use crate::error::{Result, RestoreError};
use crate::timestamp::TimePolicy;
use crate::types::LogicalFile;
use chrono::NaiveDateTime;
use std::path::{Path, PathBuf};

/// Length of a `YYYYMMDD-HHMMSS` token
pub const TIMESTAMP_LEN: usize = 15;

const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";
const VERSION_SEPARATOR: char = '~';
const CONFLICT_SEGMENT: &str = ".sync-conflict-";
const DELETED_MARKER: &str = "~deleted";
const RENAMED_MARKER: &str = "~renamed";
const ENCODED_DEVICE: &str = "RESTORE";

/// Result of decoding one archive entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedVersion {
    /// Identity of the live file
    pub logical_file: LogicalFile,
    /// Version timestamp in epoch seconds
    pub timestamp_epoch: i64,
    /// Whether a conflict segment was present
    pub is_conflict: bool,
    /// Whether a delete/rename marker was present
    pub is_deleted_or_renamed: bool,
}

/// Name-level decoding result, before the calendar is applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedName {
    /// Live file name
    pub base_name: String,
    /// Version timestamp as written in the name
    pub timestamp: NaiveDateTime,
    /// Whether a conflict segment was present
    pub is_conflict: bool,
    /// Whether a delete/rename marker was present
    pub is_deleted_or_renamed: bool,
}

/// Decoder for archived version names
#[derive(Debug, Clone, Copy, Default)]
pub struct VersionDecoder {
    policy: TimePolicy,
}

impl VersionDecoder {
    /// Create a decoder using `policy` for timestamp conversion
    pub fn new(policy: TimePolicy) -> Self {
        Self { policy }
    }

    /// Calendar this decoder converts timestamps with
    pub fn policy(&self) -> TimePolicy {
        self.policy
    }

    /// Decode an archive-relative path
    ///
    /// # Errors
    ///
    /// - [`RestoreError::Decode`] if the file name carries no valid timestamp
    ///   token, is not UTF-8, or reduces to an empty base name
    pub fn decode(&self, relative: &Path) -> Result<DecodedVersion> {
        let name = relative
            .file_name()
            .ok_or_else(|| RestoreError::decode(relative.to_string_lossy(), "path has no file name"))?;
        let name = name
            .to_str()
            .ok_or_else(|| RestoreError::decode(name.to_string_lossy(), "file name is not valid UTF-8"))?;

        let decoded = decode_name(name)?;
        let timestamp_epoch = self.policy.to_epoch(decoded.timestamp)?;
        let relative_dir = relative.parent().map(Path::to_path_buf).unwrap_or_else(PathBuf::new);

        Ok(DecodedVersion {
            logical_file: LogicalFile::new(relative_dir, decoded.base_name),
            timestamp_epoch,
            is_conflict: decoded.is_conflict,
            is_deleted_or_renamed: decoded.is_deleted_or_renamed,
        })
    }
}

/// Decode a bare archived file name
///
/// # Errors
///
/// - [`RestoreError::Decode`] if neither a version tag nor a conflict segment
///   with a valid timestamp is found
pub fn decode_name(name: &str) -> Result<DecodedName> {
    let (candidate, tag) = match find_version_tag(name) {
        Some(tag) => (format!("{}{}", &name[..tag.start], &name[tag.rest..]), Some(tag)),
        None => (name.to_string(), None),
    };

    let conflict = find_conflict_segment(&candidate);
    let timestamp = match (&tag, &conflict) {
        (Some(tag), _) => tag.timestamp,
        (None, Some(conflict)) => conflict.timestamp,
        (None, None) => {
            return Err(RestoreError::decode(name, "no YYYYMMDD-HHMMSS version token"));
        }
    };

    let base_name = match &conflict {
        Some(conflict) => format!("{}{}", &candidate[..conflict.start], &candidate[conflict.end..]),
        None => candidate,
    };
    if base_name.is_empty() {
        return Err(RestoreError::decode(name, "empty file name once the version token is removed"));
    }

    Ok(DecodedName {
        base_name,
        timestamp,
        is_conflict: conflict.is_some(),
        is_deleted_or_renamed: tag.map(|t| t.marked).unwrap_or(false),
    })
}

/// Produce an archived name in the same grammar [`decode_name`] reads
///
/// Conflict copies are written the way Syncthing writes them; a conflict copy
/// that also carries a deletion marker additionally gets a version tag.
pub fn encode_name(
    base_name: &str,
    timestamp: NaiveDateTime,
    is_conflict: bool,
    is_deleted_or_renamed: bool,
) -> String {
    let token = timestamp.format(TIMESTAMP_FORMAT).to_string();
    let (stem, ext) = split_extension(base_name);

    let mut out = String::with_capacity(base_name.len() + 48);
    out.push_str(stem);
    if is_conflict {
        out.push_str(CONFLICT_SEGMENT);
        out.push_str(&token);
        out.push('-');
        out.push_str(ENCODED_DEVICE);
    }
    if !is_conflict || is_deleted_or_renamed {
        out.push(VERSION_SEPARATOR);
        out.push_str(&token);
        if is_deleted_or_renamed {
            out.push_str(DELETED_MARKER);
        }
    }
    out.push_str(ext);
    out
}

/// Location of a `~timestamp` tag inside a name
#[derive(Debug, Clone, Copy)]
struct VersionTag {
    /// Byte index of the `~`
    start: usize,
    /// Byte index where the remainder (extension) begins
    rest: usize,
    timestamp: NaiveDateTime,
    marked: bool,
}

/// Location of a conflict segment inside a name
#[derive(Debug, Clone, Copy)]
struct ConflictSegment {
    start: usize,
    end: usize,
    timestamp: NaiveDateTime,
}

fn parse_token(token: &str) -> Option<NaiveDateTime> {
    let bytes = token.as_bytes();
    if bytes.len() != TIMESTAMP_LEN || bytes[8] != b'-' {
        return None;
    }
    let digits_ok = bytes[..8].iter().chain(&bytes[9..]).all(u8::is_ascii_digit);
    if !digits_ok {
        return None;
    }
    NaiveDateTime::parse_from_str(token, TIMESTAMP_FORMAT).ok()
}

/// `rest` may only be empty or an extension
fn ends_token(rest: &str) -> bool {
    rest.is_empty() || rest.starts_with('.')
}

fn find_version_tag(name: &str) -> Option<VersionTag> {
    for (idx, _) in name.rmatch_indices(VERSION_SEPARATOR) {
        let token_start = idx + 1;
        let token_end = token_start + TIMESTAMP_LEN;
        let Some(timestamp) = name.get(token_start..token_end).and_then(parse_token) else {
            continue;
        };

        let after = &name[token_end..];
        let (marked, rest) = [DELETED_MARKER, RENAMED_MARKER]
            .iter()
            .find_map(|marker| after.strip_prefix(*marker).map(|r| (true, r)))
            .unwrap_or((false, after));

        if ends_token(rest) {
            return Some(VersionTag {
                start: idx,
                rest: name.len() - rest.len(),
                timestamp,
                marked,
            });
        }
    }
    None
}

fn find_conflict_segment(name: &str) -> Option<ConflictSegment> {
    for (idx, _) in name.rmatch_indices(CONFLICT_SEGMENT) {
        let token_start = idx + CONFLICT_SEGMENT.len();
        let token_end = token_start + TIMESTAMP_LEN;
        let Some(timestamp) = name.get(token_start..token_end).and_then(parse_token) else {
            continue;
        };

        let mut end = token_end;
        let after = &name[token_end..];
        if let Some(device) = after.strip_prefix('-') {
            let len = device.find('.').unwrap_or(device.len());
            let id = &device[..len];
            if id.is_empty() || !id.bytes().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit()) {
                continue;
            }
            end += 1 + len;
        }

        if ends_token(&name[end..]) {
            return Some(ConflictSegment {
                start: idx,
                end,
                timestamp,
            });
        }
    }
    None
}

/// Split `name` into stem and extension the way Syncthing places version tags
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => name.split_at(idx),
        _ => (name, ""),
    }
}
