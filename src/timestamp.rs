//! Calendar policy shared by archive decoding and target conversion
//!
//! Syncthing writes version timestamps in the local calendar of the machine
//! that archived the file, and users ask for "the 15th at 2pm" in their own
//! local calendar. Both sides must go through the same [`TimePolicy`] or every
//! comparison in the selector is shifted by the UTC offset.
//!
//! ## Local time edge cases
//!
//! - A local time that occurs twice (DST fall-back) resolves to the earliest
//!   instant.
//! - A local time that never occurs (DST spring-forward gap) resolves to the
//!   instant one hour after the preceding valid local time.

use crate::error::{Result, RestoreError};
use chrono::{Local, LocalResult, NaiveDate, NaiveDateTime, TimeDelta, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Calendar used to interpret naive timestamps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TimePolicy {
    /// System-local calendar (what Syncthing and users both use)
    #[default]
    Local,
    /// UTC calendar, for deterministic callers
    Utc,
}

impl fmt::Display for TimePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimePolicy::Local => write!(f, "local"),
            TimePolicy::Utc => write!(f, "utc"),
        }
    }
}

impl TimePolicy {
    /// Convert a naive calendar timestamp to epoch seconds
    ///
    /// # Errors
    ///
    /// - [`RestoreError::Internal`] if the local calendar cannot place the
    ///   timestamp even after gap adjustment
    pub fn to_epoch(&self, naive: NaiveDateTime) -> Result<i64> {
        match self {
            TimePolicy::Utc => Ok(naive.and_utc().timestamp()),
            TimePolicy::Local => resolve_in_zone(&Local, naive).ok_or_else(|| {
                RestoreError::internal(format!("Local time {} cannot be resolved", naive))
            }),
        }
    }

    /// Combine a calendar date and an hour into the target epoch
    ///
    /// # Errors
    ///
    /// - [`RestoreError::SelectionInput`] if `hour` is not in `0..=23`
    pub fn target_epoch(&self, date: NaiveDate, hour: u32) -> Result<i64> {
        let naive = date
            .and_hms_opt(hour, 0, 0)
            .ok_or_else(|| RestoreError::selection(format!("hour {} is not in 0..=23", hour)))?;
        self.to_epoch(naive)
    }

    /// Render epoch seconds in this calendar
    pub fn format_epoch(&self, epoch: i64) -> String {
        const FMT: &str = "%Y-%m-%d %H:%M:%S";
        let rendered = match self {
            TimePolicy::Local => Local.timestamp_opt(epoch, 0).single().map(|dt| dt.format(FMT).to_string()),
            TimePolicy::Utc => Utc.timestamp_opt(epoch, 0).single().map(|dt| dt.format(FMT).to_string()),
        };
        rendered.unwrap_or_else(|| format!("@{}", epoch))
    }
}

/// Place a wall-clock time in `tz`, applying the fold and gap rules
fn resolve_in_zone<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> Option<i64> {
    earliest_instant(tz, naive).or_else(|| {
        // Inside a DST gap: anchor on the hour before and step over it.
        earliest_instant(tz, naive - TimeDelta::hours(1)).map(|epoch| epoch + 3600)
    })
}

fn earliest_instant<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> Option<i64> {
    let instant = match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt.timestamp(),
        LocalResult::Ambiguous(a, b) => a.timestamp().min(b.timestamp()),
        LocalResult::None => return None,
    };
    // A fold reported as one instant still shows the same wall time an hour earlier.
    let earlier = instant - 3600;
    match tz.timestamp_opt(earlier, 0) {
        LocalResult::Single(dt) if dt.naive_local() == naive => Some(earlier),
        _ => Some(instant),
    }
}

/// Parse a `YYYYMMDD` date as given on the command line
///
/// # Errors
///
/// - [`RestoreError::SelectionInput`] if the value is not eight digits or not a
///   real calendar date
pub fn parse_cli_date(value: &str) -> Result<NaiveDate> {
    if value.len() != 8 || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(RestoreError::selection(format!(
            "date {:?} must be in format YYYYMMDD",
            value
        )));
    }
    NaiveDate::parse_from_str(value, "%Y%m%d")
        .map_err(|e| RestoreError::selection(format!("date {:?} is not a valid date: {}", value, e)))
}

/// Current time in epoch seconds
pub fn now_epoch() -> i64 {
    Utc::now().timestamp()
}
