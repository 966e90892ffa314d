//! Daemon wiring
//!
//! Builds the backend handle, discovery, passes and scheduler from a
//! [`KeeperConfig`]. The backend is constructed once here and shared with
//! every pass by `Arc`.

use clap::ValueEnum;
use keeper_observability::KeeperMetrics;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::backend::{MemoryBackend, RbdCliBackend, SnapshotBackend};
use crate::clock::{Clock, SystemClock};
use crate::command::{CommandRunner, SystemCommandRunner};
use crate::config::{BackendKind, KeeperConfig};
use crate::core::creation::FreezeBracket;
use crate::core::health::HealthBoard;
use crate::discovery::{BackendDiscovery, StaticDiscovery, VolumeDiscovery};
use crate::error::{KeeperError, Result};
use crate::mirror::MirrorCoordinator;
use crate::passes::{HealthPass, MirrorHealth, MirrorPass, Pass, ProtectionPass, ProtectionSet, PurgePass};
use crate::scheduler::{run_once, Scheduler};
use crate::stats::{PassStats, StatsReporter};

/// The periodic passes the daemon can run
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PassKind {
    Protect,
    Purge,
    Mirror,
    Health,
}

impl fmt::Display for PassKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PassKind::Protect => "protect",
            PassKind::Purge => "purge",
            PassKind::Mirror => "mirror",
            PassKind::Health => "health",
        };
        f.write_str(name)
    }
}

fn minutes(value: u64) -> Duration {
    Duration::from_secs(value.saturating_mul(60))
}

pub struct Keeper {
    config: KeeperConfig,
    backend: Arc<dyn SnapshotBackend>,
    runner: Arc<dyn CommandRunner>,
    clock: Arc<dyn Clock>,
    reporter: StatsReporter,
    board: Arc<HealthBoard>,
    coordinator: Option<Arc<MirrorCoordinator>>,
}

impl Keeper {
    /// Build from configuration with the system clock and command runner
    pub fn from_config(config: KeeperConfig) -> Result<Self> {
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemCommandRunner::new());
        let backend: Arc<dyn SnapshotBackend> = match config.backend.kind {
            BackendKind::Rbd => Arc::new(RbdCliBackend::new(config.backend.rbd.clone(), runner.clone())),
            BackendKind::Memory => Arc::new(MemoryBackend::new()),
        };
        Self::with_parts(config, backend, runner, Arc::new(SystemClock))
    }

    /// Build around explicit collaborators
    pub fn with_parts(
        config: KeeperConfig,
        backend: Arc<dyn SnapshotBackend>,
        runner: Arc<dyn CommandRunner>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let metrics = KeeperMetrics::new()?;
        let reporter = StatsReporter::new(metrics, config.metrics_textfile.clone());

        let coordinator = config.mirror.enabled.then(|| {
            Arc::new(MirrorCoordinator::new(
                config.mirror.settings(),
                runner.clone(),
                clock.clone(),
            ))
        });

        Ok(Self {
            config,
            backend,
            runner,
            clock,
            reporter,
            board: Arc::new(HealthBoard::new()),
            coordinator,
        })
    }

    pub fn config(&self) -> &KeeperConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn SnapshotBackend> {
        &self.backend
    }

    pub fn reporter(&self) -> &StatsReporter {
        &self.reporter
    }

    pub fn board(&self) -> &Arc<HealthBoard> {
        &self.board
    }

    /// Startup connectivity check; failure is fatal
    pub async fn connect(&self) -> Result<()> {
        self.backend.ping().await.map_err(KeeperError::Startup)?;
        info!("Connected to {} backend", self.backend.name());
        Ok(())
    }

    fn discovery(&self) -> Result<Arc<dyn VolumeDiscovery>> {
        let discovery = &self.config.discovery;
        if !discovery.static_volumes.is_empty() {
            return Ok(Arc::new(StaticDiscovery::new(
                discovery.static_volumes.clone(),
                discovery.stale_volumes.clone(),
            )));
        }

        let mut backend_discovery =
            BackendDiscovery::new(self.backend.clone()).with_stale(discovery.stale_volumes.clone());
        if let Some(include) = self.config.include_regex()? {
            backend_discovery = backend_discovery.with_include(include);
        }
        Ok(Arc::new(backend_discovery))
    }

    fn protection_set(&self) -> Result<ProtectionSet> {
        Ok(ProtectionSet {
            discovery: self.discovery()?,
            exclude: self.config.discovery.exclude.clone(),
            backing_volume: self.config.backing_volume().map(str::to_string),
        })
    }

    fn coordinator(&self) -> Result<&Arc<MirrorCoordinator>> {
        self.coordinator
            .as_ref()
            .ok_or_else(|| KeeperError::config("mirror is disabled"))
    }

    /// Build one pass
    pub fn pass(&self, kind: PassKind) -> Result<Arc<dyn Pass>> {
        let pass: Arc<dyn Pass> = match kind {
            PassKind::Protect => Arc::new(ProtectionPass::new(
                self.backend.clone(),
                self.protection_set()?,
                self.config.volumes_group()?,
                self.clock.clone(),
            )),
            PassKind::Purge => Arc::new(PurgePass::new(
                self.backend.clone(),
                self.discovery()?,
                self.config.volumes_group()?,
            )),
            PassKind::Mirror => {
                let mirror = &self.config.mirror;
                let mut pass = MirrorPass::new(
                    self.coordinator()?.clone(),
                    self.backend.clone(),
                    self.config.mirror_group()?,
                    mirror.backing_volume.clone(),
                    self.clock.clone(),
                )
                .with_required_mounts(mirror.require_mounts.clone());
                if let Some(mount) = &mirror.freeze_mount {
                    pass = pass.with_freeze(FreezeBracket::new(mount.clone(), self.runner.clone()));
                }
                Arc::new(pass)
            }
            PassKind::Health => {
                let mut pass = HealthPass::new(
                    self.backend.clone(),
                    self.protection_set()?,
                    self.config.volumes_group()?,
                    self.config.health.slack_percent,
                    self.board.clone(),
                    self.clock.clone(),
                );
                if let Some(coordinator) = &self.coordinator {
                    pass = pass.with_mirror(MirrorHealth {
                        group: self.config.mirror_group()?,
                        backing_volume: self.config.mirror.backing_volume.clone(),
                        coordinator: coordinator.clone(),
                    });
                }
                Arc::new(pass)
            }
        };
        Ok(pass)
    }

    /// Enabled passes with their cadences
    pub fn schedule(&self) -> Vec<(PassKind, Duration)> {
        let config = &self.config;
        let mut schedule = vec![(PassKind::Protect, minutes(config.volumes.interval_minutes))];
        if config.purge.enabled {
            schedule.push((PassKind::Purge, minutes(config.purge.interval_minutes)));
        }
        if config.mirror.enabled {
            schedule.push((PassKind::Mirror, minutes(config.mirror.check_interval_minutes)));
        }
        schedule.push((PassKind::Health, minutes(config.health.interval_minutes)));
        schedule
    }

    pub fn scheduler(&self) -> Result<Scheduler> {
        let mut scheduler = Scheduler::new(self.reporter.clone());
        for (kind, interval) in self.schedule() {
            scheduler.add(self.pass(kind)?, interval);
        }
        Ok(scheduler)
    }

    /// Run a single pass and report it
    pub async fn run_pass(&self, kind: PassKind) -> Result<PassStats> {
        let pass = self.pass(kind)?;
        Ok(run_once(pass.as_ref(), &self.reporter).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{TimeZone, Utc};

    fn build(config: KeeperConfig) -> (Keeper, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap()));
        let keeper = Keeper::with_parts(config, backend.clone(), Arc::new(SystemCommandRunner::new()), clock).unwrap();
        (keeper, backend)
    }

    #[tokio::test]
    async fn test_connect_failure_is_fatal() {
        let (keeper, backend) = build(KeeperConfig::default());
        backend.set_offline(true);

        let err = keeper.connect().await.unwrap_err();
        assert!(matches!(err, KeeperError::Startup(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_schedule_follows_config() {
        let (keeper, _) = build(KeeperConfig::default());
        let kinds: Vec<PassKind> = keeper.schedule().into_iter().map(|(k, _)| k).collect();
        assert_eq!(kinds, vec![PassKind::Protect, PassKind::Purge, PassKind::Health]);
        assert!(keeper.pass(PassKind::Mirror).is_err());

        let mut config = KeeperConfig::default();
        config.purge.enabled = false;
        config.mirror.enabled = true;
        let (keeper, _) = build(config);
        let schedule = keeper.schedule();
        assert_eq!(schedule.len(), 3);
        assert_eq!(schedule[1], (PassKind::Mirror, Duration::from_secs(300)));
        assert_eq!(keeper.scheduler().unwrap().len(), 3);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = KeeperConfig::default();
        config.volumes.interval_minutes = 0;
        let backend = Arc::new(MemoryBackend::new());
        let result = Keeper::with_parts(config, backend, Arc::new(SystemCommandRunner::new()), Arc::new(SystemClock));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_run_pass_reports_metrics() {
        let mut config = KeeperConfig::default();
        config.discovery.exclude = vec!["scratch".to_string()];
        let (keeper, backend) = build(config);
        backend.add_volume("pvc-1");
        backend.add_volume("scratch");

        let stats = keeper.run_pass(PassKind::Protect).await.unwrap();
        assert_eq!(stats.created, 1);
        assert_eq!(keeper.reporter().metrics().snapshots_created("volumes"), 1);
        assert_eq!(keeper.reporter().metrics().volumes_discovered(), 1);
    }

    #[test]
    fn test_minutes_saturates() {
        assert_eq!(minutes(5), Duration::from_secs(300));
        assert_eq!(minutes(u64::MAX), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn test_pass_kind_display() {
        assert_eq!(PassKind::Protect.to_string(), "protect");
        assert_eq!(PassKind::from_str("health", true).unwrap(), PassKind::Health);
    }
}
