//! Property-based testing for restorething
//!
//! Uses proptest to check the decoder grammar and the selection rules over
//! randomly generated names and version sets.

use ::restorething::decoder::{decode_name, encode_name};
use ::restorething::index::{IndexSnapshot, INDEX_FORMAT_VERSION};
use ::restorething::*;
use chrono::{NaiveDate, NaiveDateTime};
use proptest::prelude::*;
use std::path::PathBuf;

/// Base names the way people name files: stem, optional extension
fn base_name_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-z][a-z0-9_ ]{0,10}",
        "[a-z][a-z0-9_]{0,8}\\.(txt|md|rs|tar\\.gz)",
        "[A-Z][a-z]{1,6}-[0-9]{1,3}\\.pdf",
    ]
}

fn timestamp_strategy() -> impl Strategy<Value = NaiveDateTime> {
    (1990i32..2100, 1u32..=12, 1u32..=28, 0u32..24, 0u32..60, 0u32..60).prop_map(|(y, mo, d, h, mi, s)| {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    })
}

fn record(ts: i64, flags: (bool, bool)) -> VersionRecord {
    VersionRecord {
        logical_file: LogicalFile::new("docs", "a.txt"),
        timestamp_epoch: ts,
        source_path: PathBuf::from(format!("/sync/.stversions/docs/a~{}.txt", ts)),
        is_conflict: flags.0,
        is_deleted_or_renamed: flags.1,
        size_bytes: 1,
        source_mtime: ts,
    }
}

fn versions_strategy() -> impl Strategy<Value = Vec<VersionRecord>> {
    prop::collection::vec((0i64..1_000_000, any::<bool>(), any::<bool>()), 1..20).prop_map(|items| {
        items
            .into_iter()
            .map(|(ts, conflict, deleted)| record(ts, (conflict, deleted)))
            .collect()
    })
}

fn snapshot(records: Vec<VersionRecord>) -> IndexSnapshot {
    let metadata = IndexMetadata {
        format_version: INDEX_FORMAT_VERSION,
        tool_version: "test".to_string(),
        versioning_dir: PathBuf::from("/sync/.stversions"),
        time_policy: TimePolicy::Utc,
        last_full_scan_epoch: 0,
        record_count: records.len(),
        skipped_count: 0,
    };
    IndexSnapshot::new(metadata, records)
}

fn admitted<'a>(versions: &'a [VersionRecord], query: &SelectionQuery) -> Vec<&'a VersionRecord> {
    versions
        .iter()
        .filter(|r| query.include_conflicts || !r.is_conflict)
        .filter(|r| query.include_deleted_or_renamed || !r.is_deleted_or_renamed)
        .collect()
}

proptest! {
    #[test]
    fn prop_decode_inverts_encode(
        base in base_name_strategy(),
        ts in timestamp_strategy(),
        conflict in any::<bool>(),
        deleted in any::<bool>(),
    ) {
        let name = encode_name(&base, ts, conflict, deleted);
        let decoded = decode_name(&name).unwrap();
        prop_assert_eq!(decoded.base_name, base);
        prop_assert_eq!(decoded.timestamp, ts);
        prop_assert_eq!(decoded.is_conflict, conflict);
        prop_assert_eq!(decoded.is_deleted_or_renamed, deleted);
    }

    #[test]
    fn prop_names_without_token_are_rejected(base in base_name_strategy()) {
        prop_assert!(decode_name(&base).is_err());
    }

    #[test]
    fn prop_nearest_minimises_distance(
        versions in versions_strategy(),
        target in 0i64..1_000_000,
        conflicts in any::<bool>(),
    ) {
        let query = SelectionQuery::new(target).include_conflicts(conflicts);
        let candidates = admitted(&versions, &query);
        match selector::choose_version(&versions, &query) {
            SelectionOutcome::Matched(chosen) => {
                let best = candidates.iter().map(|r| r.distance_to(target)).min().unwrap();
                prop_assert_eq!(chosen.distance_to(target), best);
                // Ties go to the earlier version
                prop_assert!(candidates
                    .iter()
                    .filter(|r| r.distance_to(target) == best)
                    .all(|r| r.timestamp_epoch >= chosen.timestamp_epoch));
            }
            SelectionOutcome::NoMatch(reason) => {
                prop_assert!(candidates.is_empty());
                prop_assert_eq!(reason, NoMatchReason::Excluded);
            }
        }
    }

    #[test]
    fn prop_before_and_after_respect_target(versions in versions_strategy(), target in 0i64..1_000_000) {
        let before = SelectionQuery::new(target).with_mode(SelectionMode::BeforeOnly);
        if let SelectionOutcome::Matched(chosen) = selector::choose_version(&versions, &before) {
            prop_assert!(chosen.timestamp_epoch <= target);
            prop_assert!(admitted(&versions, &before)
                .iter()
                .filter(|r| r.timestamp_epoch <= target)
                .all(|r| r.timestamp_epoch <= chosen.timestamp_epoch));
        }

        let after = SelectionQuery::new(target).with_mode(SelectionMode::AfterOnly);
        if let SelectionOutcome::Matched(chosen) = selector::choose_version(&versions, &after) {
            prop_assert!(chosen.timestamp_epoch >= target);
            prop_assert!(admitted(&versions, &after)
                .iter()
                .filter(|r| r.timestamp_epoch >= target)
                .all(|r| r.timestamp_epoch >= chosen.timestamp_epoch));
        }
    }

    #[test]
    fn prop_window_result_inside_window(
        versions in versions_strategy(),
        target in 0i64..1_000_000,
        hours in 0u32..48,
    ) {
        let query = SelectionQuery::new(target).with_mode(SelectionMode::Window { hours });
        let half_width = i64::from(hours) * 3600;
        match selector::choose_version(&versions, &query) {
            SelectionOutcome::Matched(chosen) => {
                prop_assert!((chosen.timestamp_epoch - target).abs() <= half_width);
            }
            SelectionOutcome::NoMatch(NoMatchReason::OutsideWindow) => {
                prop_assert!(admitted(&versions, &query)
                    .iter()
                    .all(|r| (r.timestamp_epoch - target).abs() > half_width));
            }
            SelectionOutcome::NoMatch(reason) => prop_assert_eq!(reason, NoMatchReason::Excluded),
        }
    }

    #[test]
    fn prop_selection_ignores_record_order(versions in versions_strategy(), target in 0i64..1_000_000) {
        let query = SelectionQuery::new(target);
        let mut reversed = versions.clone();
        reversed.reverse();
        prop_assert_eq!(
            selector::select(&snapshot(versions), &query),
            selector::select(&snapshot(reversed), &query)
        );
    }

    #[test]
    fn prop_plan_is_idempotent(versions in versions_strategy(), target in 0i64..1_000_000) {
        let index = snapshot(versions);
        let query = SelectionQuery::new(target).with_mode(SelectionMode::AllInstancesOf(LogicalFile::new("docs", "a.txt")));
        let results = selector::select(&index, &query);
        let planner = RestorePlanner::for_query("/restore", &query);
        let first = planner.plan(&results);
        prop_assert_eq!(&first, &planner.plan(&results));
        prop_assert!(first.entries.iter().all(|e| e.destination_path.starts_with("/restore/docs")));
    }
}
