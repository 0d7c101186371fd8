//! Main test module for restorething
//!
//! This module includes all test suites:
//! - Integration tests for the full scan/select/restore pipeline
//! - Chaos tests for resilience
//! - Property-based tests for invariants
//! - Edge cases around archive naming and restore targets

pub mod integration;
pub mod property;

pub use integration::{at, epoch, ArchiveFixture};

#[cfg(test)]
mod edge_cases {
    use super::integration::{at, epoch, ArchiveFixture};
    use ::restorething::*;
    use std::fs;

    #[test]
    fn test_empty_archive() {
        let fixture = ArchiveFixture::new();
        let restorer = fixture.restorer();

        let outcome = restorer.refresh(false).unwrap();
        assert!(outcome.rescanned());
        assert_eq!(outcome.records(), 0);

        let results = restorer.select(&SelectionQuery::new(epoch(15, 12))).unwrap();
        assert!(results.is_empty());
        let plan = restorer.plan(&SelectionQuery::new(epoch(15, 12)), &results, &fixture.restore_dir);
        assert!(plan.is_empty());
    }

    #[test]
    fn test_special_filenames() {
        let fixture = ArchiveFixture::new();
        let names = [
            "file with spaces.txt",
            "file-with-dashes.txt",
            "file_with_underscores.txt",
            "file.multiple.dots.txt",
            "no_extension",
            ".hidden",
        ];
        for name in &names {
            fixture.add_version("odd", name, at(15, 9), false, false, name);
        }

        let restorer = fixture.restorer();
        assert_eq!(restorer.refresh(false).unwrap().records(), names.len());

        let run = restorer
            .run(
                &SelectionOptions {
                    target_epoch: epoch(15, 12),
                    ..Default::default()
                },
                &fixture.restore_dir,
                &CopyExecutor::new().with_dry_run(false),
                false,
            )
            .unwrap();
        assert_eq!(run.execution.copied, names.len());
        for name in &names {
            assert_eq!(fixture.read_restored(&format!("odd/{}", name)), *name);
        }
    }

    #[test]
    fn test_unicode_filenames() {
        let fixture = ArchiveFixture::new();
        fixture.add_version("文档", "计划.md", at(15, 9), false, false, "中文");
        fixture.add_version("Ünterlagen", "café ☕.txt", at(15, 9), false, false, "latte");

        let restorer = fixture.restorer();
        restorer.refresh(false).unwrap();
        let snapshot = restorer.snapshot().unwrap();
        assert_eq!(snapshot.versions_of(&LogicalFile::new("文档", "计划.md")).len(), 1);

        let report = CopyExecutor::new().with_dry_run(false).execute(&restorer.plan(
            &SelectionQuery::new(epoch(15, 12)),
            &restorer.select(&SelectionQuery::new(epoch(15, 12))).unwrap(),
            &fixture.restore_dir,
        ));
        assert_eq!(report.copied, 2);
        assert_eq!(fixture.read_restored("Ünterlagen/café ☕.txt"), "latte");
    }

    #[test]
    fn test_old_layout_names_merge_with_new() {
        let fixture = ArchiveFixture::new();
        fixture.add_raw("", "report.pdf~20160814-090000", "old", epoch(14, 9));
        fixture.add_version("", "report.pdf", at(15, 9), false, false, "new");

        let restorer = fixture.restorer();
        restorer.refresh(false).unwrap();
        let snapshot = restorer.snapshot().unwrap();
        assert_eq!(snapshot.file_count(), 1);
        assert_eq!(snapshot.versions_of(&LogicalFile::new("", "report.pdf")).len(), 2);
    }

    #[test]
    fn test_deeply_nested_versions() {
        let fixture = ArchiveFixture::new();
        let deep = (0..12).map(|i| format!("level{}", i)).collect::<Vec<_>>().join("/");
        fixture.add_version(&deep, "leaf.txt", at(15, 9), false, false, "leaf");

        let restorer = fixture.restorer();
        restorer.refresh(false).unwrap();
        let results = restorer.select(&SelectionQuery::new(epoch(15, 9))).unwrap();
        assert_eq!(results[0].logical_file.relative_dir, std::path::PathBuf::from(&deep));

        let plan = restorer.plan(&SelectionQuery::new(epoch(15, 9)), &results, &fixture.restore_dir);
        assert_eq!(
            plan.entries[0].destination_path,
            fixture.restore_dir.join(&deep).join("leaf.txt")
        );
    }

    #[test]
    fn test_existing_destination_kept_with_skip() {
        let fixture = ArchiveFixture::new();
        fixture.add_version("", "a.txt", at(15, 9), false, false, "archived");
        fs::create_dir_all(&fixture.restore_dir).unwrap();
        fs::write(fixture.restore_dir.join("a.txt"), "mine").unwrap();

        let restorer = fixture.restorer();
        restorer.refresh(false).unwrap();
        let query = SelectionQuery::new(epoch(15, 9));
        let plan = restorer.plan(&query, &restorer.select(&query).unwrap(), &fixture.restore_dir);

        let report = CopyExecutor::new()
            .with_dry_run(false)
            .with_overwrite(OverwritePolicy::Skip)
            .execute(&plan);
        assert_eq!(report.skipped_existing, 1);
        assert_eq!(fixture.read_restored("a.txt"), "mine");

        let forced = CopyExecutor::new()
            .with_dry_run(false)
            .with_overwrite(OverwritePolicy::Force)
            .execute(&plan);
        assert_eq!(forced.copied, 1);
        assert_eq!(fixture.read_restored("a.txt"), "archived");
    }

    #[test]
    fn test_syncthing_temp_files_ignored() {
        let fixture = ArchiveFixture::new();
        fixture.add_version("", "a.txt", at(15, 9), false, false, "a");
        fixture.add_raw("", ".syncthing.a~20160815-100000.txt.tmp", "partial", epoch(15, 10));
        fixture.add_raw("", "~syncthing~b.txt.tmp", "partial", epoch(15, 10));

        let restorer = fixture.restorer();
        match restorer.refresh(false).unwrap() {
            RefreshOutcome::Rescanned { records, skipped, .. } => {
                assert_eq!(records, 1);
                assert!(skipped.is_empty());
            }
            other => panic!("expected a rescan, got {:?}", other),
        }
    }
}

#[cfg(test)]
mod stress_tests {
    use super::integration::{at, epoch, ArchiveFixture};
    use ::restorething::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_multithreaded_selection() {
        let fixture = ArchiveFixture::new();
        for file in 0..20 {
            for day in 1..=10 {
                fixture.add_version(
                    &format!("dir{}", file % 4),
                    &format!("file{}.txt", file),
                    at(day, 12),
                    false,
                    false,
                    "x",
                );
            }
        }

        let restorer = Arc::new(fixture.restorer());
        assert_eq!(restorer.refresh(false).unwrap().records(), 200);

        let handles: Vec<_> = (1..=8u32)
            .map(|day| {
                let restorer = Arc::clone(&restorer);
                thread::spawn(move || {
                    let query = SelectionQuery::new(epoch(day, 12)).with_mode(SelectionMode::BeforeOnly);
                    let results = restorer.select(&query).unwrap();
                    assert_eq!(results.len(), 20);
                    for result in &results {
                        let chosen = result.outcome.matched().unwrap();
                        assert_eq!(chosen.timestamp_epoch, epoch(day, 12));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }
}
