//! Snapshot, retention and restore on the local filesystem

use rollguard::backup::local::LocalBackups;
use rollguard::backup::{BackupManager, Snapshot};
use rollguard::errors::DeployError;
use rollguard::storage::layout::DeployLayout;

fn seeded(contents: &str) -> (tempfile::TempDir, DeployLayout) {
    let dir = tempfile::tempdir().unwrap();
    let layout = DeployLayout::new(dir.path(), "app.db");
    std::fs::create_dir_all(layout.data_dir().path()).unwrap();
    std::fs::write(layout.data_file().path(), contents).unwrap();
    (dir, layout)
}

/// Old backups with fixed stamps, oldest first
fn seed_old_backups(layout: &DeployLayout, count: u32) -> Vec<String> {
    (1..=count)
        .map(|day| {
            let name = format!("app.db.backup.202601{:02}_120000_000", day);
            std::fs::write(layout.data_dir().path().join(&name), format!("day {}", day)).unwrap();
            name
        })
        .collect()
}

#[tokio::test]
async fn test_fresh_environment_skips_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let backups = LocalBackups::new(DeployLayout::new(dir.path(), "app.db"));

    assert_eq!(backups.snapshot().await.unwrap(), Snapshot::Skipped);
    assert!(backups.list().await.unwrap().is_empty());
    assert!(matches!(
        backups.latest().await,
        Err(DeployError::NoBackupAvailable(_))
    ));
}

#[tokio::test]
async fn test_snapshot_copies_data_file() {
    let (_dir, layout) = seeded("todo rows");
    let backups = LocalBackups::new(layout.clone());

    let snapshot = backups.snapshot().await.unwrap();
    let handle = snapshot.handle().unwrap();
    assert!(handle.name.starts_with("app.db.backup."));
    assert_eq!(std::fs::read_to_string(&handle.path).unwrap(), "todo rows");
    assert_eq!(backups.latest().await.unwrap(), *handle);

    // No temp files left behind
    let names: Vec<String> = std::fs::read_dir(layout.data_dir().path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert!(names.iter().all(|n| !n.ends_with(".tmp")), "{:?}", names);
}

#[tokio::test]
async fn test_retention_keeps_newest_and_never_exceeds_cap() {
    let (_dir, layout) = seeded("current");
    let old = seed_old_backups(&layout, 12);
    let backups = LocalBackups::new(layout.clone());

    let snapshot = backups.snapshot().await.unwrap();
    let report = backups.prune(10).await.unwrap();

    assert_eq!(report.kept, 10);
    assert_eq!(report.removed.len(), 3);
    assert!(report.failed.is_empty());

    let remaining: Vec<String> = backups.list().await.unwrap().into_iter().map(|h| h.name).collect();
    assert_eq!(remaining.len(), 10);
    // The fresh snapshot is newest; the three oldest seeded ones are gone
    assert_eq!(remaining[0], snapshot.handle().unwrap().name);
    for expired in &old[..3] {
        assert!(!remaining.contains(expired), "{} survived", expired);
    }
    for kept in &old[3..] {
        assert!(remaining.contains(kept), "{} was pruned", kept);
    }

    // The live data file is not a backup and is never pruned
    assert!(layout.data_file().path().exists());
}

#[tokio::test]
async fn test_prune_under_cap_removes_nothing() {
    let (_dir, layout) = seeded("current");
    seed_old_backups(&layout, 3);
    let backups = LocalBackups::new(layout);

    let report = backups.prune(10).await.unwrap();
    assert_eq!(report.kept, 3);
    assert!(report.removed.is_empty());
}

#[tokio::test]
async fn test_zero_retention_is_rejected() {
    let (_dir, layout) = seeded("current");
    let backups = LocalBackups::new(layout);
    assert!(matches!(
        backups.prune(0).await,
        Err(DeployError::ValidationError(_))
    ));
}

#[tokio::test]
async fn test_restore_overwrites_live_data() {
    let (_dir, layout) = seeded("before migration");
    let backups = LocalBackups::new(layout.clone());
    backups.snapshot().await.unwrap();

    std::fs::write(layout.data_file().path(), "after a bad migration").unwrap();
    let latest = backups.latest().await.unwrap();
    backups.restore(&latest).await.unwrap();

    assert_eq!(
        std::fs::read_to_string(layout.data_file().path()).unwrap(),
        "before migration"
    );
}

#[tokio::test]
async fn test_latest_ignores_unrelated_files() {
    let (_dir, layout) = seeded("current");
    let seeded = seed_old_backups(&layout, 2);
    for stray in ["app.db.backup.20990101_000000_000.tmp", "notes.txt", "app.db-wal"] {
        std::fs::write(layout.data_dir().path().join(stray), "x").unwrap();
    }

    let backups = LocalBackups::new(layout);
    assert_eq!(backups.list().await.unwrap().len(), 2);
    assert_eq!(backups.latest().await.unwrap().name, seeded[1]);
}
