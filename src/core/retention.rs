/*!
 * Retention evictor
 *
 * Deletes managed snapshots older than `max_age`, oldest first, without ever
 * dropping the managed count to or below `min_count`. Protected snapshots are
 * skipped and keep counting toward the floor, so protection can make the
 * floor unreachable; the walk then simply stops deleting.
 */

use chrono::{DateTime, Utc};
use tracing::{debug, error, info};

use super::{managed_snapshots, RetentionPolicy};
use crate::backend::{BackendResult, SnapshotBackend, SnapshotRef};
use crate::naming::SnapshotNaming;

/// What one eviction walk did to a volume
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionReport {
    /// Managed, decodable snapshots found on the volume
    pub matching: usize,

    /// Deleted snapshot names, in deletion order
    pub deleted: Vec<String>,

    /// Over-age snapshots left alone because they are protected
    pub protected: Vec<String>,

    /// Over-age snapshots whose protection query or delete failed
    pub failed: Vec<String>,
}

impl EvictionReport {
    pub fn deleted_count(&self) -> usize {
        self.deleted.len()
    }

    pub fn remaining(&self) -> usize {
        self.matching - self.deleted.len()
    }
}

/// Apply `policy` to the managed snapshots of `volume`
///
/// Only a listing failure is returned as an error. Per-snapshot failures are
/// logged, recorded in the report, and the walk continues.
pub async fn evict(
    backend: &dyn SnapshotBackend,
    volume: &str,
    naming: &SnapshotNaming,
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
) -> BackendResult<EvictionReport> {
    let snapshots = backend.list_snapshots(volume).await?;
    let managed = managed_snapshots(naming, &snapshots);

    let mut report = EvictionReport {
        matching: managed.len(),
        ..Default::default()
    };

    if report.matching <= policy.min_count {
        debug!(
            "Skipping snapshot delete for {} since matching snapshot count {} <= minimum to keep {}",
            volume, report.matching, policy.min_count
        );
        return Ok(report);
    }

    let mut remaining = report.matching;
    for snap in &managed {
        if remaining <= policy.min_count {
            debug!(
                "Stopping snapshot delete for {} since remaining count {} <= minimum to keep {}",
                volume, remaining, policy.min_count
            );
            break;
        }

        let snap_ref = SnapshotRef::new(volume, &snap.name);
        if snap.age(now) <= policy.max_age {
            debug!("Skipping {}: not older than {}", snap_ref, super::format_delta(policy.max_age));
            continue;
        }

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

        info!("Deleting snapshot {}", snap_ref);
        match backend.delete_snapshot(volume, &snap.name).await {
            Ok(()) => {
                remaining -= 1;
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
