/*!
 * Snapshot retention core
 *
 * Policy decisions shared by every pass: which snapshots are managed, how old
 * they are, whether a new one is due, which old ones may go, and whether a
 * group has recent coverage.
 */

pub mod creation;
pub mod health;
pub mod purge;
pub mod retention;

use chrono::{DateTime, TimeDelta, Utc};

use crate::backend::SnapshotInfo;
use crate::naming::SnapshotNaming;

/// Age/count retention policy for one snapshot group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// No new snapshot while one at most this old exists
    pub min_age: TimeDelta,

    /// Snapshots strictly older than this may be deleted
    pub max_age: TimeDelta,

    /// Never delete below this many managed snapshots
    pub min_count: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            min_age: TimeDelta::hours(5),
            max_age: TimeDelta::hours(168),
            min_count: 1,
        }
    }
}

/// A logical group of volumes sharing one naming scheme and policy
#[derive(Debug, Clone)]
pub struct SnapshotGroup {
    /// Group label used in logs, metrics and health records
    pub name: String,
    pub naming: SnapshotNaming,
    pub policy: RetentionPolicy,
}

impl SnapshotGroup {
    pub fn new<S: Into<String>>(name: S, naming: SnapshotNaming, policy: RetentionPolicy) -> Self {
        Self {
            name: name.into(),
            naming,
            policy,
        }
    }
}

/// A snapshot whose name decoded to a creation instant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedSnapshot {
    pub name: String,
    pub created: DateTime<Utc>,
    pub protected: bool,
}

impl ManagedSnapshot {
    pub fn age(&self, now: DateTime<Utc>) -> TimeDelta {
        now - self.created
    }
}

/// Managed, decodable snapshots sorted oldest first
///
/// Foreign names and names that match the shape but fail to decode are
/// dropped here and never take part in any decision.
pub fn managed_snapshots(naming: &SnapshotNaming, snapshots: &[SnapshotInfo]) -> Vec<ManagedSnapshot> {
    let mut managed: Vec<ManagedSnapshot> = snapshots
        .iter()
        .filter_map(|snap| {
            naming.decode(&snap.name).map(|created| ManagedSnapshot {
                name: snap.name.clone(),
                created,
                protected: snap.protected,
            })
        })
        .collect();

    managed.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.name.cmp(&b.name)));
    managed
}

/// Render a duration the way operators write it (`6h`, `1h30m`, `45m`)
pub fn format_delta(delta: TimeDelta) -> String {
    let total_minutes = delta.num_minutes();
    let hours = total_minutes / 60;
    let minutes = total_minutes % 60;

    match (hours, minutes) {
        (0, m) => format!("{}m", m),
        (h, 0) => format!("{}h", h),
        (h, m) => format!("{}h{}m", h, m),
    }
}
