/*!
 * Health aggregation
 *
 * A group is healthy when every one of its volumes has a managed snapshot no
 * older than the group's creation cadence plus a slack margin. Records are
 * recomputed from scratch on each pass and replace the previous record for
 * the group.
 */

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};
use tracing::{error, info};

use super::{format_delta, managed_snapshots, SnapshotGroup};
use crate::backend::SnapshotBackend;
use crate::naming::SnapshotNaming;

/// Default slack above the creation cadence before a volume counts as uncovered
pub const DEFAULT_SLACK_PERCENT: u32 = 20;

/// Point-in-time health of one group
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthRecord {
    pub group: String,
    pub healthy: bool,

    /// Human-readable explanation, `None` when healthy
    pub reason: Option<String>,

    /// Volumes lacking recent coverage
    pub uncovered: Vec<String>,

    pub checked_at: DateTime<Utc>,
}

impl HealthRecord {
    pub fn healthy<S: Into<String>>(group: S, checked_at: DateTime<Utc>) -> Self {
        Self {
            group: group.into(),
            healthy: true,
            reason: None,
            uncovered: Vec::new(),
            checked_at,
        }
    }

    /// Mark the record unhealthy, appending to any existing reason
    pub fn flag<S: Into<String>>(&mut self, reason: S) {
        let reason = reason.into();
        self.healthy = false;
        self.reason = Some(match self.reason.take() {
            Some(existing) => format!("{}; {}", existing, reason),
            None => reason,
        });
    }
}

/// Coverage threshold: `min_age` plus `slack_percent`
///
/// Saturates at `TimeDelta::MAX` instead of overflowing.
pub fn health_threshold(min_age: TimeDelta, slack_percent: u32) -> TimeDelta {
    let factor = i32::try_from(slack_percent)
        .unwrap_or(i32::MAX)
        .saturating_add(100);
    min_age
        .checked_mul(factor)
        .map(|scaled| scaled / 100)
        .unwrap_or(TimeDelta::MAX)
}

/// Whether `volume` has a managed snapshot at most `threshold` old
///
/// A listing failure counts as missing coverage.
pub async fn has_recent_snapshot(
    backend: &dyn SnapshotBackend,
    volume: &str,
    naming: &SnapshotNaming,
    threshold: TimeDelta,
    now: DateTime<Utc>,
) -> bool {
    match backend.list_snapshots(volume).await {
        Ok(snapshots) => managed_snapshots(naming, &snapshots)
            .iter()
            .any(|snap| snap.age(now) <= threshold),
        Err(e) => {
            error!("Error getting snapshots for {}: {}", volume, e);
            false
        }
    }
}

/// Check every volume of a group and build its record
pub async fn check_group(
    backend: &dyn SnapshotBackend,
    group: &SnapshotGroup,
    volumes: &[String],
    slack_percent: u32,
    now: DateTime<Utc>,
) -> HealthRecord {
    let threshold = health_threshold(group.policy.min_age, slack_percent);
    let mut record = HealthRecord::healthy(group.name.as_str(), now);

    for volume in volumes {
        if !has_recent_snapshot(backend, volume, &group.naming, threshold, now).await {
            record.uncovered.push(volume.clone());
        }
    }

    if !record.uncovered.is_empty() {
        let msg = format!(
            "Snapshots within {} not found for {} volumes in {}: {}",
            format_delta(threshold),
            record.uncovered.len(),
            group.name,
            record.uncovered.join(" ")
        );
        info!("{}", msg);
        record.flag(msg);
    }

    record
}

/// Reason string if the last mirror success is older than `max_lag`
pub fn watermark_lag(
    last_success: Option<DateTime<Utc>>,
    max_lag: TimeDelta,
    now: DateTime<Utc>,
) -> Option<String> {
    match last_success {
        None => Some("Mirror has never completed successfully".to_string()),
        Some(at) if now - at > max_lag => Some(format!(
            "Last mirror success {} is older than {}",
            at.format("%Y-%m-%d %H:%M"),
            format_delta(max_lag)
        )),
        Some(_) => None,
    }
}

/// Latest health record per group
///
/// Writers replace whole records; concurrent passes writing the same group
/// resolve as last-write-wins.
#[derive(Debug, Default)]
pub struct HealthBoard {
    records: RwLock<BTreeMap<String, HealthRecord>>,
}

impl HealthBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, record: HealthRecord) {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.group.clone(), record);
    }

    pub fn get(&self, group: &str) -> Option<HealthRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(group)
            .cloned()
    }

    pub fn records(&self) -> Vec<HealthRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn is_healthy(&self) -> bool {
        self.records().iter().all(|r| r.healthy)
    }

    /// `OK`, or every unhealthy group's reason joined by spaces
    pub fn status(&self) -> String {
        let reasons: Vec<String> = self
            .records()
            .into_iter()
            .filter_map(|r| r.reason)
            .collect();

        if reasons.is_empty() {
            "OK".to_string()
        } else {
            reasons.join(" ")
        }
    }
}
