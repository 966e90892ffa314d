/*!
 * Periodic passes
 *
 * A pass is one schedulable unit of work: protect the volume set, purge stale
 * volumes, run the mirror cycle, or recompute health. Each pass walks its
 * volumes sequentially and isolates failures per volume, so one bad volume
 * never stops the rest of the pass. Results come back as [`PassStats`].
 */

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use crate::backend::SnapshotBackend;
use crate::clock::Clock;
use crate::core::creation::{ensure_snapshot, FreezeBracket};
use crate::core::health::{check_group, health_threshold, watermark_lag, HealthBoard, HealthRecord};
use crate::core::purge::purge;
use crate::core::retention::{evict, EvictionReport};
use crate::core::SnapshotGroup;
use crate::discovery::{apply_exclusions, VolumeDiscovery};
use crate::error::Result;
use crate::mirror::{check_mounts, MirrorCoordinator};
use crate::stats::{PassStats, PassStatsBuilder};

#[async_trait]
pub trait Pass: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self) -> PassStats;
}

/// Volume set and exclusions shared by the protection and health passes
#[derive(Clone)]
pub struct ProtectionSet {
    pub discovery: Arc<dyn VolumeDiscovery>,
    pub exclude: Vec<String>,

    /// The mirror's backing volume, never part of its own protection set
    pub backing_volume: Option<String>,
}

impl ProtectionSet {
    pub async fn volumes(&self) -> Result<Vec<String>> {
        let discovered = self.discovery.discover().await?;
        Ok(apply_exclusions(
            discovered,
            &self.exclude,
            self.backing_volume.as_deref(),
        ))
    }
}

fn record_eviction(stats: &mut PassStatsBuilder, report: &EvictionReport) {
    stats.record_deleted(report.deleted_count() as u64);
    stats.record_protected(report.protected.len() as u64);
    stats.record_errors(report.failed.len() as u64);
}

/// Create-then-evict on one volume, errors isolated and counted
async fn protect_volume(
    backend: &dyn SnapshotBackend,
    volume: &str,
    group: &SnapshotGroup,
    clock: &dyn Clock,
    freeze: Option<&FreezeBracket>,
    stats: &mut PassStatsBuilder,
) {
    stats.record_checked();

    match ensure_snapshot(backend, volume, group, clock.now(), freeze).await {
        Ok(outcome) => stats.record_created(outcome.created_count()),
        Err(e) => {
            error!("Error creating snapshot for {}: {}", volume, e);
            stats.record_error();
        }
    }

    match evict(backend, volume, &group.naming, &group.policy, clock.now()).await {
        Ok(report) => record_eviction(stats, &report),
        Err(e) => {
            error!("Error deleting old snapshots for {}: {}", volume, e);
            stats.record_error();
        }
    }
}

/// Snapshot and prune every volume in the protection set
pub struct ProtectionPass {
    backend: Arc<dyn SnapshotBackend>,
    volumes: ProtectionSet,
    group: SnapshotGroup,
    clock: Arc<dyn Clock>,
}

impl ProtectionPass {
    pub fn new(
        backend: Arc<dyn SnapshotBackend>,
        volumes: ProtectionSet,
        group: SnapshotGroup,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            backend,
            volumes,
            group,
            clock,
        }
    }
}

#[async_trait]
impl Pass for ProtectionPass {
    fn name(&self) -> &'static str {
        "protect"
    }

    async fn run(&self) -> PassStats {
        let mut stats = PassStatsBuilder::new(self.name(), &self.group.name);

        let volumes = match self.volumes.volumes().await {
            Ok(volumes) => volumes,
            Err(e) => {
                error!("Volume discovery failed: {}", e);
                stats.record_error();
                return stats.finish();
            }
        };

        info!("Processing {} volumes", volumes.len());
        stats.set_discovered(volumes.len());

        for volume in &volumes {
            protect_volume(
                self.backend.as_ref(),
                volume,
                &self.group,
                self.clock.as_ref(),
                None,
                &mut stats,
            )
            .await;
        }

        stats.finish()
    }
}

/// Drop the managed snapshots of volumes that left the protection set
pub struct PurgePass {
    backend: Arc<dyn SnapshotBackend>,
    discovery: Arc<dyn VolumeDiscovery>,
    group: SnapshotGroup,
}

impl PurgePass {
    pub fn new(backend: Arc<dyn SnapshotBackend>, discovery: Arc<dyn VolumeDiscovery>, group: SnapshotGroup) -> Self {
        Self {
            backend,
            discovery,
            group,
        }
    }
}

#[async_trait]
impl Pass for PurgePass {
    fn name(&self) -> &'static str {
        "purge"
    }

    async fn run(&self) -> PassStats {
        let mut stats = PassStatsBuilder::new(self.name(), &self.group.name);

        let stale = match self.discovery.stale().await {
            Ok(stale) => stale,
            Err(e) => {
                error!("Stale volume discovery failed: {}", e);
                stats.record_error();
                return stats.finish();
            }
        };

        for volume in &stale {
            stats.record_checked();
            match purge(self.backend.as_ref(), volume, &self.group.naming).await {
                Ok(report) => record_eviction(&mut stats, &report),
                Err(e) => {
                    error!("Error purging snapshots of {}: {}", volume, e);
                    stats.record_error();
                }
            }
        }

        stats.finish()
    }
}

/// Mirror cycle plus upkeep of the mirror's backing volume
///
/// Order: mount pre-flight, coordinator cycle, backing-volume snapshot
/// (inside an optional freeze bracket), eviction, log pruning. The snapshot
/// and eviction steps run whatever the cycle's outcome.
pub struct MirrorPass {
    coordinator: Arc<MirrorCoordinator>,
    backend: Arc<dyn SnapshotBackend>,
    group: SnapshotGroup,
    backing_volume: String,
    freeze: Option<FreezeBracket>,
    require_mounts: Vec<PathBuf>,
    clock: Arc<dyn Clock>,
}

impl MirrorPass {
    pub fn new(
        coordinator: Arc<MirrorCoordinator>,
        backend: Arc<dyn SnapshotBackend>,
        group: SnapshotGroup,
        backing_volume: String,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            coordinator,
            backend,
            group,
            backing_volume,
            freeze: None,
            require_mounts: Vec::new(),
            clock,
        }
    }

    pub fn with_freeze(mut self, freeze: FreezeBracket) -> Self {
        self.freeze = Some(freeze);
        self
    }

    pub fn with_required_mounts(mut self, mounts: Vec<PathBuf>) -> Self {
        self.require_mounts = mounts;
        self
    }
}

#[async_trait]
impl Pass for MirrorPass {
    fn name(&self) -> &'static str {
        "mirror"
    }

    async fn run(&self) -> PassStats {
        let mut stats = PassStatsBuilder::new(self.name(), &self.group.name);

        if let Err(e) = check_mounts(&self.require_mounts) {
            error!("Mirror pass aborted: {}", e);
            stats.record_error();
            return stats.finish();
        }

        match self.coordinator.run_cycle().await {
            Ok(outcome) => {
                stats.set_mirror_outcome(outcome.label());
                if let Some(e) = outcome.failure(&self.coordinator.settings().command) {
                    error!("{}", e);
                    stats.record_error();
                }
            }
            Err(e) => {
                error!("Mirror cycle failed: {}", e);
                stats.set_mirror_outcome("error");
                stats.record_error();
            }
        }

        protect_volume(
            self.backend.as_ref(),
            &self.backing_volume,
            &self.group,
            self.clock.as_ref(),
            self.freeze.as_ref(),
            &mut stats,
        )
        .await;

        match self
            .coordinator
            .logs()
            .prune(self.group.policy.max_age, self.clock.now())
        {
            Ok(removed) => stats.record_logs_pruned(removed),
            Err(e) => {
                error!("Error pruning mirror logs: {}", e);
                stats.record_error();
            }
        }

        stats.finish()
    }
}

/// Mirror group inputs for the health pass
#[derive(Clone)]
pub struct MirrorHealth {
    pub group: SnapshotGroup,
    pub backing_volume: String,
    pub coordinator: Arc<MirrorCoordinator>,
}

/// Recompute health records and publish them to the board
pub struct HealthPass {
    backend: Arc<dyn SnapshotBackend>,
    volumes: ProtectionSet,
    group: SnapshotGroup,
    mirror: Option<MirrorHealth>,
    slack_percent: u32,
    board: Arc<HealthBoard>,
    clock: Arc<dyn Clock>,
}

impl HealthPass {
    pub fn new(
        backend: Arc<dyn SnapshotBackend>,
        volumes: ProtectionSet,
        group: SnapshotGroup,
        slack_percent: u32,
        board: Arc<HealthBoard>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            backend,
            volumes,
            group,
            mirror: None,
            slack_percent,
            board,
            clock,
        }
    }

    pub fn with_mirror(mut self, mirror: MirrorHealth) -> Self {
        self.mirror = Some(mirror);
        self
    }

    pub fn board(&self) -> &Arc<HealthBoard> {
        &self.board
    }

    async fn volumes_record(&self, stats: &mut PassStatsBuilder) -> HealthRecord {
        let now = self.clock.now();
        match self.volumes.volumes().await {
            Ok(volumes) => {
                stats.set_discovered(volumes.len());
                for _ in &volumes {
                    stats.record_checked();
                }
                check_group(self.backend.as_ref(), &self.group, &volumes, self.slack_percent, now).await
            }
            Err(e) => {
                error!("Volume discovery failed: {}", e);
                stats.record_error();
                let mut record = HealthRecord::healthy(self.group.name.as_str(), now);
                record.flag(format!("Volume discovery failed: {}", e));
                record
            }
        }
    }

    async fn mirror_record(&self, mirror: &MirrorHealth) -> HealthRecord {
        let now = self.clock.now();
        let volumes = [mirror.backing_volume.clone()];
        let mut record = check_group(self.backend.as_ref(), &mirror.group, &volumes, self.slack_percent, now).await;

        let max_lag = health_threshold(mirror.coordinator.settings().interval, self.slack_percent);
        if let Some(reason) = watermark_lag(mirror.coordinator.watermark().read(), max_lag, now) {
            info!("{}", reason);
            record.flag(reason);
        }
        record
    }
}

#[async_trait]
impl Pass for HealthPass {
    fn name(&self) -> &'static str {
        "health"
    }

    async fn run(&self) -> PassStats {
        let mut stats = PassStatsBuilder::new(self.name(), &self.group.name);

        let mut records = vec![self.volumes_record(&mut stats).await];
        if let Some(mirror) = &self.mirror {
            records.push(self.mirror_record(mirror).await);
        }

        for record in records {
            stats.record_health(&record.group, record.healthy);
            self.board.publish(record);
        }

        stats.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::clock::ManualClock;
    use crate::core::RetentionPolicy;
    use crate::discovery::StaticDiscovery;
    use crate::naming::SnapshotNaming;
    use chrono::{TimeDelta, TimeZone, Utc};

    fn volumes_group() -> SnapshotGroup {
        SnapshotGroup::new(
            "volumes",
            SnapshotNaming::new("").unwrap(),
            RetentionPolicy {
                min_age: TimeDelta::hours(5),
                max_age: TimeDelta::hours(48),
                min_count: 1,
            },
        )
    }

    fn set(volumes: &[&str], exclude: &[&str], backing: Option<&str>) -> ProtectionSet {
        ProtectionSet {
            discovery: Arc::new(StaticDiscovery::new(
                volumes.iter().map(|s| s.to_string()).collect(),
                Vec::new(),
            )),
            exclude: exclude.iter().map(|s| s.to_string()).collect(),
            backing_volume: backing.map(str::to_string),
        }
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap()))
    }

    #[tokio::test]
    async fn test_protection_pass_isolates_failing_volume() {
        crate::logging::init_test_logging();
        let backend = Arc::new(MemoryBackend::new());
        for v in ["a", "b", "c"] {
            backend.add_volume(v);
        }
        backend.fail_volume("b");

        let pass = ProtectionPass::new(backend.clone(), set(&["a", "b", "c"], &[], None), volumes_group(), clock());
        let stats = pass.run().await;

        assert_eq!(stats.volumes_checked, 3);
        assert_eq!(stats.created, 2);
        assert_eq!(stats.errors, 2);
        assert_eq!(backend.snapshot_names("a"), vec!["2024-01-05_00:00".to_string()]);
        assert_eq!(backend.snapshot_names("c"), vec!["2024-01-05_00:00".to_string()]);
    }

    #[tokio::test]
    async fn test_protection_pass_skips_excluded_and_backing() {
        let backend = Arc::new(MemoryBackend::new());
        for v in ["a", "skip", "backing"] {
            backend.add_volume(v);
        }

        let pass = ProtectionPass::new(
            backend.clone(),
            set(&["a", "skip", "backing"], &["skip"], Some("backing")),
            volumes_group(),
            clock(),
        );
        let stats = pass.run().await;

        assert_eq!(stats.volumes_discovered, Some(1));
        assert!(backend.snapshot_names("skip").is_empty());
        assert!(backend.snapshot_names("backing").is_empty());
    }

    #[tokio::test]
    async fn test_purge_pass_uses_stale_list() {
        let backend = Arc::new(MemoryBackend::new());
        backend.add_snapshot("gone", "2024-01-01_00:00", false);
        backend.add_snapshot("gone", "2024-01-02_00:00", true);
        backend.add_snapshot("live", "2024-01-01_00:00", false);

        let discovery = Arc::new(StaticDiscovery::new(vec!["live".to_string()], vec!["gone".to_string()]));
        let stats = PurgePass::new(backend.clone(), discovery, volumes_group()).run().await;

        assert_eq!(stats.deleted, 1);
        assert_eq!(stats.protected_skipped, 1);
        assert_eq!(backend.snapshot_names("live").len(), 1);
    }

    #[tokio::test]
    async fn test_health_pass_publishes_records() {
        let backend = Arc::new(MemoryBackend::new());
        backend.add_snapshot("a", "2024-01-04_22:00", false);
        backend.add_volume("b");

        let board = Arc::new(HealthBoard::new());
        let pass = HealthPass::new(backend, set(&["a", "b"], &[], None), volumes_group(), 20, board.clone(), clock());
        let stats = pass.run().await;

        assert_eq!(stats.health, vec![("volumes".to_string(), false)]);
        let record = board.get("volumes").unwrap();
        assert_eq!(record.uncovered, vec!["b".to_string()]);
        assert!(!board.is_healthy());
    }
}
