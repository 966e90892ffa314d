/*!
 * Integration tests for the protection pass
 *
 * Drive whole passes against the in-memory backend and check the resulting
 * snapshot sets.
 */

mod common;

use common::at;
use snapkeeper::backend::MemoryBackend;
use snapkeeper::clock::ManualClock;
use snapkeeper::config::KeeperConfig;
use snapkeeper::command::SystemCommandRunner;
use snapkeeper::daemon::{Keeper, PassKind};
use std::sync::Arc;

fn keeper(config: KeeperConfig, backend: Arc<MemoryBackend>, clock: Arc<ManualClock>) -> Keeper {
    Keeper::with_parts(config, backend, Arc::new(SystemCommandRunner::new()), clock).unwrap()
}

#[tokio::test]
async fn test_boundary_snapshot_survives_pass() {
    let backend = Arc::new(MemoryBackend::new());
    backend.add_snapshot("v1", "2024-01-01_00:00", false);
    backend.add_snapshot("v1", "2024-01-03_00:00", false);

    let mut config = KeeperConfig::default();
    config.volumes.retention.max_age_hours = 48;
    // Large min_age so the pass does not add a new snapshot
    config.volumes.retention.min_age_hours = 48;

    let clock = Arc::new(ManualClock::new(at(5, 0, 0)));
    let keeper = keeper(config, backend.clone(), clock);

    let stats = keeper.run_pass(PassKind::Protect).await.unwrap();
    assert_eq!(stats.created, 0);
    assert_eq!(stats.deleted, 1);
    assert_eq!(backend.snapshot_names("v1"), vec!["2024-01-03_00:00".to_string()]);
}

#[tokio::test]
async fn test_create_then_evict_in_one_pass() {
    let backend = Arc::new(MemoryBackend::new());
    backend.add_snapshot("v2", "2023-12-01_00:00", false);
    backend.add_snapshot("v2", "2023-12-02_00:00", false);
    backend.add_snapshot("v2", "2023-12-03_00:00", false);
    backend.add_snapshot("v2", "before-upgrade", false);

    let mut config = KeeperConfig::default();
    config.volumes.retention.min_count = 2;

    let clock = Arc::new(ManualClock::new(at(20, 12, 0)));
    let keeper = keeper(config, backend.clone(), clock);

    let stats = keeper.run_pass(PassKind::Protect).await.unwrap();
    assert_eq!(stats.created, 1);
    assert_eq!(stats.deleted, 2);
    assert_eq!(
        backend.snapshot_names("v2"),
        vec![
            "2023-12-03_00:00".to_string(),
            "before-upgrade".to_string(),
            "2024-01-20_12:00".to_string(),
        ]
    );
    assert_eq!(
        keeper.reporter().metrics().snapshots_deleted("volumes"),
        2
    );
}

#[tokio::test]
async fn test_repeated_passes_are_idempotent_within_min_age() {
    let backend = Arc::new(MemoryBackend::new());
    backend.add_volume("pvc-a");
    backend.add_volume("pvc-b");

    let clock = Arc::new(ManualClock::new(at(5, 0, 0)));
    let keeper = keeper(KeeperConfig::default(), backend.clone(), clock.clone());

    let first = keeper.run_pass(PassKind::Protect).await.unwrap();
    assert_eq!(first.created, 2);

    clock.advance(chrono::TimeDelta::hours(4));
    let second = keeper.run_pass(PassKind::Protect).await.unwrap();
    assert_eq!(second.created, 0);

    clock.advance(chrono::TimeDelta::hours(2));
    let third = keeper.run_pass(PassKind::Protect).await.unwrap();
    assert_eq!(third.created, 2);
    assert_eq!(backend.creations().len(), 4);
}

#[tokio::test]
async fn test_protected_snapshots_survive_pressure() {
    let backend = Arc::new(MemoryBackend::new());
    for day in 1..=5 {
        backend.add_snapshot("v1", &format!("2023-06-{:02}_00:00", day), day % 2 == 1);
    }

    let mut config = KeeperConfig::default();
    config.volumes.retention.min_count = 0;
    config.volumes.retention.min_age_hours = 1;
    config.volumes.retention.max_age_hours = 24;

    let clock = Arc::new(ManualClock::new(at(1, 0, 0)));
    let keeper = keeper(config, backend.clone(), clock);
    let stats = keeper.run_pass(PassKind::Protect).await.unwrap();

    assert_eq!(stats.protected_skipped, 3);
    let names = backend.snapshot_names("v1");
    for protected in ["2023-06-01_00:00", "2023-06-03_00:00", "2023-06-05_00:00"] {
        assert!(names.contains(&protected.to_string()));
    }
    assert!(!names.contains(&"2023-06-02_00:00".to_string()));
    assert_eq!(stats.deleted, 2);
}

#[tokio::test]
async fn test_purge_pass_clears_stale_volume() {
    let backend = Arc::new(MemoryBackend::new());
    backend.add_snapshot("released-pvc", "2024-01-01_00:00", false);
    backend.add_snapshot("released-pvc", "2024-01-02_00:00", false);
    backend.add_snapshot("released-pvc", "manual-keep", false);

    let mut config = KeeperConfig::default();
    config.discovery.static_volumes = vec!["bound-pvc".to_string()];
    config.discovery.stale_volumes = vec!["released-pvc".to_string()];

    let clock = Arc::new(ManualClock::new(at(5, 0, 0)));
    let keeper = keeper(config, backend.clone(), clock);
    let stats = keeper.run_pass(PassKind::Purge).await.unwrap();

    assert_eq!(stats.deleted, 2);
    assert_eq!(backend.snapshot_names("released-pvc"), vec!["manual-keep".to_string()]);
}
