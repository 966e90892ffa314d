/*!
 * Integration tests for health aggregation across the volumes and mirror groups
 */

mod common;

use chrono::TimeDelta;
use common::{at, mirror_config, RecordingRunner};
use snapkeeper::backend::MemoryBackend;
use snapkeeper::clock::ManualClock;
use snapkeeper::config::KeeperConfig;
use snapkeeper::daemon::{Keeper, PassKind};
use std::sync::Arc;
use tempfile::TempDir;

fn keeper(config: KeeperConfig, backend: Arc<MemoryBackend>, clock: Arc<ManualClock>) -> Keeper {
    let runner = Arc::new(RecordingRunner::new("rsync", 0));
    Keeper::with_parts(config, backend, runner, clock).unwrap()
}

#[tokio::test]
async fn test_fresh_snapshots_report_ok() {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(MemoryBackend::new());
    backend.add_volume("pvc-1");
    backend.add_volume("pvc-2");
    backend.add_volume("cephfs-backup");
    let clock = Arc::new(ManualClock::new(at(5, 12, 0)));
    let keeper = keeper(mirror_config(dir.path()), backend.clone(), clock.clone());

    keeper.run_pass(PassKind::Protect).await.unwrap();
    keeper.run_pass(PassKind::Mirror).await.unwrap();

    clock.advance(TimeDelta::hours(5));
    let stats = keeper.run_pass(PassKind::Health).await.unwrap();

    assert_eq!(stats.health, vec![("volumes".to_string(), true), ("mirror".to_string(), true)]);
    assert!(keeper.board().is_healthy());
    assert_eq!(keeper.board().status(), "OK");
    assert_eq!(keeper.reporter().metrics().health("volumes"), 0);
    assert_eq!(keeper.reporter().metrics().health("mirror"), 0);
}

#[tokio::test]
async fn test_stale_volume_snapshot_flags_volumes_group() {
    let backend = Arc::new(MemoryBackend::new());
    backend.add_snapshot("pvc-1", "2024-01-05_00:00", false);
    backend.add_snapshot("pvc-2", "2024-01-04_00:00", false);
    let clock = Arc::new(ManualClock::new(at(5, 6, 0)));
    let keeper = keeper(KeeperConfig::default(), backend, clock);

    let stats = keeper.run_pass(PassKind::Health).await.unwrap();
    assert_eq!(stats.health, vec![("volumes".to_string(), false)]);

    let record = keeper.board().get("volumes").unwrap();
    assert_eq!(record.uncovered, vec!["pvc-2"]);
    assert_eq!(
        keeper.board().status(),
        "Snapshots within 6h not found for 1 volumes in volumes: pvc-2"
    );
    assert_eq!(keeper.reporter().metrics().health("volumes"), 1);
}

#[tokio::test]
async fn test_mirror_lag_flags_mirror_group() {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(MemoryBackend::new());
    backend.add_volume("cephfs-backup");
    let clock = Arc::new(ManualClock::new(at(5, 12, 0)));
    let keeper = keeper(mirror_config(dir.path()), backend.clone(), clock.clone());

    // Never mirrored
    keeper.run_pass(PassKind::Health).await.unwrap();
    let record = keeper.board().get("mirror").unwrap();
    assert!(!record.healthy);
    let reason = record.reason.unwrap();
    assert!(reason.contains("Snapshots within 6h not found for 1 volumes in mirror: cephfs-backup"));
    assert!(reason.contains("Mirror has never completed successfully"));

    keeper.run_pass(PassKind::Mirror).await.unwrap();
    keeper.run_pass(PassKind::Health).await.unwrap();
    assert!(keeper.board().is_healthy());

    // A fresh backing snapshot does not hide a lagging watermark
    clock.advance(TimeDelta::hours(30));
    backend.add_snapshot("cephfs-backup", "cephfs_2024-01-06_17:00", false);
    keeper.run_pass(PassKind::Health).await.unwrap();

    let record = keeper.board().get("mirror").unwrap();
    assert!(!record.healthy);
    assert!(record.uncovered.is_empty());
    assert!(record
        .reason
        .unwrap()
        .starts_with("Last mirror success 2024-01-05 12:00 is older than"));
    assert!(keeper.board().get("volumes").unwrap().healthy);
}

#[tokio::test]
async fn test_discovery_failure_is_unhealthy() {
    let backend = Arc::new(MemoryBackend::new());
    backend.set_offline(true);
    let clock = Arc::new(ManualClock::new(at(5, 6, 0)));
    let keeper = keeper(KeeperConfig::default(), backend, clock);

    let stats = keeper.run_pass(PassKind::Health).await.unwrap();
    assert_eq!(stats.errors, 1);
    assert!(!keeper.board().is_healthy());
    assert!(keeper.board().status().starts_with("Volume discovery failed"));
}
