//! Integration tests for restorething
//!
//! Runs the whole pipeline over generated archives: scan, freeze, selection,
//! planning and copying.

use ::restorething::decoder::encode_name;
use ::restorething::*;
use chrono::{NaiveDate, NaiveDateTime};
use filetime::FileTime;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A synced folder with a `.stversions` archive under a temp directory
pub struct ArchiveFixture {
    pub temp_dir: TempDir,
    pub live_root: PathBuf,
    pub versions_dir: PathBuf,
    pub restore_dir: PathBuf,
    pub index_path: PathBuf,
}

impl ArchiveFixture {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let live_root = temp_dir.path().join("sync");
        let versions_dir = live_root.join(".stversions");
        fs::create_dir_all(&versions_dir).unwrap();
        Self {
            restore_dir: temp_dir.path().join("restore"),
            index_path: temp_dir.path().join("restorething.idx"),
            temp_dir,
            live_root,
            versions_dir,
        }
    }

    /// Write one archived version and give it the version time as mtime
    pub fn add_version(
        &self,
        dir: &str,
        base_name: &str,
        at: NaiveDateTime,
        conflict: bool,
        deleted: bool,
        content: &str,
    ) -> PathBuf {
        let name = encode_name(base_name, at, conflict, deleted);
        self.add_raw(dir, &name, content, at.and_utc().timestamp())
    }

    /// Write an archive entry with an arbitrary name
    pub fn add_raw(&self, dir: &str, name: &str, content: &str, mtime: i64) -> PathBuf {
        let path = self.versions_dir.join(dir).join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        filetime::set_file_mtime(&path, FileTime::from_unix_time(mtime, 0)).unwrap();
        path
    }

    pub fn restorer(&self) -> Restorer {
        RestorerBuilder::new()
            .index_path(self.index_path.clone())
            .time_policy(TimePolicy::Utc)
            .parallel_workers(2)
            .build(self.versions_dir.clone())
            .unwrap()
    }

    pub fn read_restored(&self, relative: &str) -> String {
        fs::read_to_string(self.restore_dir.join(relative)).unwrap()
    }
}

impl Default for ArchiveFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// 2016-08-`day` `hour`:00:00
pub fn at(day: u32, hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2016, 8, day)
        .unwrap()
        .and_hms_opt(hour, 0, 0)
        .unwrap()
}

pub fn epoch(day: u32, hour: u32) -> i64 {
    at(day, hour).and_utc().timestamp()
}

fn restore(fixture: &ArchiveFixture, restorer: &Restorer, query: &SelectionQuery) -> ExecutionReport {
    let results = restorer.select(query).unwrap();
    let plan = restorer.plan(query, &results, &fixture.restore_dir);
    CopyExecutor::new().with_dry_run(false).execute(&plan)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_days() -> ArchiveFixture {
        let fixture = ArchiveFixture::new();
        for day in 14..=16 {
            fixture.add_version("docs", "plan.md", at(day, 9), false, false, &format!("plan {}", day));
        }
        fixture.add_version("", "todo.txt", at(15, 18), false, false, "todo 15");
        fixture
    }

    #[test]
    fn test_modes_through_full_stack() {
        let fixture = three_days();
        let restorer = fixture.restorer();
        restorer.refresh(false).unwrap();

        let before = SelectionQuery::new(epoch(15, 12)).with_mode(SelectionMode::BeforeOnly);
        let results = restorer.select(&before).unwrap();
        let summary = SelectionSummary::from_results(&results);
        assert_eq!(summary.matched, 1);
        assert_eq!(summary.unmatched.get(&NoMatchReason::NothingBefore), Some(&1));

        let after = SelectionQuery::new(epoch(15, 12)).with_mode(SelectionMode::AfterOnly);
        let results = restorer.select(&after).unwrap();
        assert_eq!(SelectionSummary::from_results(&results).matched, 2);

        let window = SelectionQuery::new(epoch(15, 12)).with_mode(SelectionMode::Window { hours: 2 });
        let results = restorer.select(&window).unwrap();
        assert_eq!(SelectionSummary::from_results(&results).matched, 0);
    }

    #[test]
    fn test_restored_content_and_mtime() {
        let fixture = three_days();
        let restorer = fixture.restorer();
        restorer.refresh(false).unwrap();

        let report = restore(&fixture, &restorer, &SelectionQuery::new(epoch(15, 10)));
        assert_eq!(report.copied, 2);
        assert_eq!(fixture.read_restored("docs/plan.md"), "plan 15");
        assert_eq!(fixture.read_restored("todo.txt"), "todo 15");

        let meta = fs::metadata(fixture.restore_dir.join("docs/plan.md")).unwrap();
        assert_eq!(FileTime::from_last_modification_time(&meta).unix_seconds(), epoch(15, 9));
    }

    #[test]
    fn test_rescan_prunes_removed_versions() {
        let fixture = three_days();
        let restorer = fixture.restorer();
        assert_eq!(restorer.refresh(false).unwrap().records(), 4);

        fs::remove_file(fixture.versions_dir.join("todo~20160815-180000.txt")).unwrap();
        let outcome = restorer.refresh(true).unwrap();
        assert_eq!(outcome.records(), 3);

        let snapshot = restorer.snapshot().unwrap();
        assert!(snapshot.versions_of(&LogicalFile::new("", "todo.txt")).is_empty());
        assert_eq!(snapshot.file_count(), 1);
    }

    #[test]
    fn test_failed_rescan_keeps_committed_index() {
        let fixture = three_days();
        let restorer = fixture.restorer();
        restorer.refresh(false).unwrap();
        let committed = fs::read(&fixture.index_path).unwrap();

        fs::rename(&fixture.versions_dir, fixture.temp_dir.path().join("moved")).unwrap();
        let result = restorer.refresh(true);
        assert!(matches!(result, Err(RestoreError::Scan(_))));
        assert_eq!(fs::read(&fixture.index_path).unwrap(), committed);

        // A fresh restorer still sees the old index
        let reopened = fixture.restorer();
        assert_eq!(reopened.snapshot().unwrap().len(), 4);
    }

    #[test]
    fn test_freeze_across_restorers() {
        let fixture = three_days();
        assert!(fixture.restorer().refresh(false).unwrap().rescanned());

        // New versions arrive, but the index is frozen
        fixture.add_version("", "late.txt", at(16, 20), false, false, "late");
        let outcome = fixture.restorer().refresh(false).unwrap();
        assert!(!outcome.rescanned());
        assert_eq!(outcome.records(), 4);

        let forced = fixture.restorer().refresh(true).unwrap();
        assert_eq!(forced.records(), 5);
    }

    #[test]
    fn test_all_instances_restore() {
        let fixture = three_days();
        let restorer = fixture.restorer();
        restorer.refresh(false).unwrap();

        let options = SelectionOptions {
            target_epoch: epoch(15, 12),
            all_instances: Some(fixture.live_root.join("docs/plan.md")),
            ..Default::default()
        };
        let run = restorer
            .run(&options, &fixture.restore_dir, &CopyExecutor::new().with_dry_run(false), false)
            .unwrap();
        assert_eq!(run.execution.copied, 3);
        assert_eq!(fixture.read_restored("docs/plan~20160814-090000.md"), "plan 14");
        assert_eq!(fixture.read_restored("docs/plan~20160816-090000.md"), "plan 16");
    }

    #[test]
    fn test_filter_dir_and_file() {
        let fixture = three_days();
        let restorer = fixture.restorer();
        let options = SelectionOptions {
            target_epoch: epoch(15, 12),
            filter_dir_and_file: Some(fixture.live_root.join("todo.txt")),
            ..Default::default()
        };
        let run = restorer.run(&options, &fixture.restore_dir, &CopyExecutor::new(), false).unwrap();
        assert_eq!(run.results.len(), 1);
        assert_eq!(run.results[0].logical_file, LogicalFile::new("", "todo.txt"));
        assert_eq!(run.execution.simulated, 1);
        assert!(!fixture.restore_dir.exists());
    }

    #[test]
    fn test_outside_path_rejected() {
        let fixture = three_days();
        let restorer = fixture.restorer();
        let options = SelectionOptions {
            target_epoch: epoch(15, 12),
            all_instances: Some(PathBuf::from("/somewhere/else/plan.md")),
            ..Default::default()
        };
        let result = restorer.run(&options, &fixture.restore_dir, &CopyExecutor::new(), false);
        assert!(matches!(result, Err(RestoreError::SelectionInput(_))));
    }

    #[test]
    fn test_dotted_versions_dir_and_missing_live_file() {
        let fixture = ArchiveFixture::new();
        fixture.add_version("docs", "gone.md", at(15, 9), false, false, "gone");
        fs::create_dir_all(fixture.temp_dir.path().join("other")).unwrap();
        let dotted = fixture.temp_dir.path().join("other/../sync/./.stversions");

        let restorer = RestorerBuilder::new()
            .index_path(fixture.index_path.clone())
            .time_policy(TimePolicy::Utc)
            .build(dotted)
            .unwrap();
        assert_eq!(restorer.live_root(), fixture.live_root);

        // The live file was deleted; only its archived versions remain
        assert!(!fixture.live_root.join("docs/gone.md").exists());
        let options = SelectionOptions {
            target_epoch: epoch(15, 12),
            all_instances: Some(fixture.live_root.join("docs/gone.md")),
            ..Default::default()
        };
        let run = restorer
            .run(&options, &fixture.restore_dir, &CopyExecutor::new().with_dry_run(false), false)
            .unwrap();
        assert_eq!(run.execution.copied, 1);
        assert_eq!(fixture.read_restored("docs/gone~20160815-090000.md"), "gone");
    }

    #[test]
    fn test_conflicts_and_markers() {
        let fixture = ArchiveFixture::new();
        fixture.add_version("", "a.txt", at(15, 9), false, false, "plain");
        fixture.add_version("", "a.txt", at(15, 12), true, false, "conflict");
        fixture.add_version("", "b.txt", at(15, 12), false, true, "");
        let restorer = fixture.restorer();
        restorer.refresh(false).unwrap();

        let defaults = restorer.select(&SelectionQuery::new(epoch(15, 12))).unwrap();
        let a = defaults[0].outcome.matched().unwrap();
        assert!(!a.is_conflict);
        assert!(defaults[1].outcome.matched().unwrap().is_deleted_or_renamed);

        let with_conflicts = restorer
            .select(&SelectionQuery::new(epoch(15, 12)).include_conflicts(true))
            .unwrap();
        assert!(with_conflicts[0].outcome.matched().unwrap().is_conflict);

        let no_markers = restorer
            .select(&SelectionQuery::new(epoch(15, 12)).include_deleted_or_renamed(false))
            .unwrap();
        assert_eq!(
            no_markers[1].outcome,
            SelectionOutcome::NoMatch(NoMatchReason::Excluded)
        );
    }

    #[test]
    fn test_plan_json() {
        let fixture = three_days();
        let restorer = fixture.restorer();
        restorer.refresh(false).unwrap();
        let query = SelectionQuery::new(epoch(15, 10));
        let results = restorer.select(&query).unwrap();
        let plan = restorer.plan(&query, &results, Path::new("/restore"));

        let json: serde_json::Value = serde_json::to_value(&plan).unwrap();
        assert_eq!(json["entries"].as_array().unwrap().len(), 2);
        assert_eq!(json["entries"][0]["kind"], "Content");
    }
}
