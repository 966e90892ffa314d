/*!
 * Stale-volume purge
 *
 * Volumes that have left the protection set (e.g. released persistent
 * volumes) lose all their managed snapshots. Protected snapshots stay, and
 * foreign snapshots are never touched.
 */

use tracing::{error, info};

use super::managed_snapshots;
use super::retention::EvictionReport;
use crate::backend::{BackendResult, SnapshotBackend, SnapshotRef};
use crate::naming::SnapshotNaming;

/// Delete every managed, unprotected snapshot of `volume`
pub async fn purge(
    backend: &dyn SnapshotBackend,
    volume: &str,
    naming: &SnapshotNaming,
) -> BackendResult<EvictionReport> {
    let snapshots = backend.list_snapshots(volume).await?;
    let managed = managed_snapshots(naming, &snapshots);

    let mut report = EvictionReport {
        matching: managed.len(),
        ..Default::default()
    };

    if managed.is_empty() {
        return Ok(report);
    }

    info!("Purging {} managed snapshots of {}", managed.len(), volume);

    for snap in &managed {
        let snap_ref = SnapshotRef::new(volume, &snap.name);
        match backend.is_protected(volume, &snap.name).await {
            Ok(true) => {
                error!("Cannot delete protected snapshot {}", snap_ref);
                report.protected.push(snap.name.clone());
                continue;
            }
            Ok(false) => {}
            Err(e) => {
                error!("Error checking if snapshot {} is protected: {}", snap_ref, e);
                report.failed.push(snap.name.clone());
                continue;
            }
        }

        match backend.delete_snapshot(volume, &snap.name).await {
            Ok(()) => {
                info!("Deleted snapshot {}", snap_ref);
                report.deleted.push(snap.name.clone());
            }
            Err(e) => {
                error!("Error deleting snapshot {}: {}", snap_ref, e);
                report.failed.push(snap.name.clone());
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    #[tokio::test]
    async fn test_purge_keeps_protected_and_foreign() {
        let backend = MemoryBackend::new();
        backend.add_snapshot("old-pvc", "2024-01-01_00:00", false);
        backend.add_snapshot("old-pvc", "2024-01-02_00:00", true);
        backend.add_snapshot("old-pvc", "2024-01-03_00:00", false);
        backend.add_snapshot("old-pvc", "keep-me", false);

        let naming = SnapshotNaming::new("").unwrap();
        let report = purge(&backend, "old-pvc", &naming).await.unwrap();

        assert_eq!(report.matching, 3);
        assert_eq!(report.deleted_count(), 2);
        assert_eq!(report.protected, vec!["2024-01-02_00:00".to_string()]);
        assert_eq!(
            backend.snapshot_names("old-pvc"),
            vec!["2024-01-02_00:00".to_string(), "keep-me".to_string()]
        );
    }

    #[tokio::test]
    async fn test_purge_empty_volume() {
        let backend = MemoryBackend::new();
        backend.add_volume("old-pvc");

        let naming = SnapshotNaming::new("").unwrap();
        let report = purge(&backend, "old-pvc", &naming).await.unwrap();
        assert_eq!(report, EvictionReport::default());
    }
}
