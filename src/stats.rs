/*!
 * Pass statistics
 *
 * Every pass returns a [`PassStats`] value instead of bumping global
 * counters. The [`StatsReporter`] folds those values into the metrics sink
 * and optionally refreshes the textfile export.
 */

use keeper_observability::{write_textfile, KeeperMetrics};
use serde::Serialize;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// What one pass invocation did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassStats {
    /// Pass name (`protect`, `purge`, `mirror`, `health`)
    pub pass: String,

    /// Snapshot group the counters below belong to
    pub group: String,

    /// Size of the protection set, when the pass discovered one
    pub volumes_discovered: Option<usize>,

    pub volumes_checked: u64,
    pub created: u64,
    pub deleted: u64,

    /// Over-age snapshots skipped because they are protected
    pub protected_skipped: u64,

    /// Per-volume or per-cycle failures
    pub errors: u64,

    /// Mirror coordinator outcome label, mirror pass only
    pub mirror_outcome: Option<String>,

    /// `(group, healthy)` pairs, health pass only
    pub health: Vec<(String, bool)>,

    pub logs_pruned: usize,

    #[serde(skip)]
    pub duration: Option<Duration>,
}

impl PassStats {
    pub fn is_clean(&self) -> bool {
        self.errors == 0
    }

    /// Format a human-readable summary
    pub fn summary(&self) -> String {
        let mut line = format!(
            "{}[{}]: {} checked | {} created | {} deleted | {} protected | {} errors",
            self.pass,
            self.group,
            self.volumes_checked,
            self.created,
            self.deleted,
            self.protected_skipped,
            self.errors
        );

        if let Some(discovered) = self.volumes_discovered {
            line.push_str(&format!(" | {} discovered", discovered));
        }
        if let Some(outcome) = &self.mirror_outcome {
            line.push_str(&format!(" | mirror {}", outcome));
        }
        if self.logs_pruned > 0 {
            line.push_str(&format!(" | {} logs pruned", self.logs_pruned));
        }
        for (group, healthy) in &self.health {
            line.push_str(&format!(
                " | {} {}",
                group,
                if *healthy { "healthy" } else { "unhealthy" }
            ));
        }
        if let Some(duration) = self.duration {
            line.push_str(&format!(" in {:.1}s", duration.as_secs_f64()));
        }
        line
    }
}

/// Accumulates stats while a pass runs
#[derive(Debug, Clone)]
pub struct PassStatsBuilder {
    stats: PassStats,
    start_time: Instant,
}

impl PassStatsBuilder {
    pub fn new(pass: &str, group: &str) -> Self {
        Self {
            stats: PassStats {
                pass: pass.to_string(),
                group: group.to_string(),
                ..Default::default()
            },
            start_time: Instant::now(),
        }
    }

    pub fn set_discovered(&mut self, count: usize) {
        self.stats.volumes_discovered = Some(count);
    }

    pub fn record_checked(&mut self) {
        self.stats.volumes_checked += 1;
    }

    pub fn record_created(&mut self, count: u64) {
        self.stats.created += count;
    }

    pub fn record_deleted(&mut self, count: u64) {
        self.stats.deleted += count;
    }

    pub fn record_protected(&mut self, count: u64) {
        self.stats.protected_skipped += count;
    }

    pub fn record_error(&mut self) {
        self.stats.errors += 1;
    }

    pub fn record_errors(&mut self, count: u64) {
        self.stats.errors += count;
    }

    pub fn set_mirror_outcome(&mut self, label: &str) {
        self.stats.mirror_outcome = Some(label.to_string());
    }

    pub fn record_health(&mut self, group: &str, healthy: bool) {
        self.stats.health.push((group.to_string(), healthy));
    }

    pub fn record_logs_pruned(&mut self, count: usize) {
        self.stats.logs_pruned += count;
    }

    /// Current stats without finishing
    pub fn stats(&self) -> &PassStats {
        &self.stats
    }

    pub fn finish(mut self) -> PassStats {
        self.stats.duration = Some(self.start_time.elapsed());
        self.stats
    }
}

/// Folds pass results into the metrics sink
#[derive(Clone)]
pub struct StatsReporter {
    metrics: KeeperMetrics,
    textfile: Option<PathBuf>,
}

impl StatsReporter {
    pub fn new(metrics: KeeperMetrics, textfile: Option<PathBuf>) -> Self {
        Self { metrics, textfile }
    }

    pub fn metrics(&self) -> &KeeperMetrics {
        &self.metrics
    }

    pub fn report(&self, stats: &PassStats) {
        if stats.is_clean() {
            info!("{}", stats.summary());
        } else {
            warn!("{}", stats.summary());
        }

        self.metrics.add_snapshots_created(&stats.group, stats.created);
        self.metrics.add_snapshots_deleted(&stats.group, stats.deleted);
        self.metrics
            .add_volumes_checked(&stats.group, stats.volumes_checked);
        self.metrics.add_pass_errors(&stats.pass, stats.errors);

        if let Some(count) = stats.volumes_discovered {
            self.metrics.set_volumes_discovered(count);
        }
        if let Some(outcome) = &stats.mirror_outcome {
            self.metrics.inc_mirror_run(outcome);
        }
        for (group, healthy) in &stats.health {
            self.metrics.set_health(group, *healthy);
        }

        if let Some(path) = &self.textfile {
            if let Err(e) = write_textfile(&self.metrics, path) {
                error!("Failed to write metrics textfile {}: {}", path.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_builder_accumulates() {
        let mut builder = PassStatsBuilder::new("protect", "volumes");
        builder.set_discovered(3);
        for _ in 0..3 {
            builder.record_checked();
        }
        builder.record_created(2);
        builder.record_deleted(4);
        builder.record_protected(1);
        builder.record_error();

        let stats = builder.finish();
        assert_eq!(stats.volumes_checked, 3);
        assert_eq!(stats.created, 2);
        assert!(!stats.is_clean());
        assert!(stats.duration.is_some());

        let summary = stats.summary();
        assert!(summary.starts_with("protect[volumes]: 3 checked | 2 created | 4 deleted"));
        assert!(summary.contains("3 discovered"));
    }

    #[test]
    fn test_reporter_folds_into_metrics() {
        let dir = TempDir::new().unwrap();
        let textfile = dir.path().join("snapkeeper.prom");
        let metrics = KeeperMetrics::new().unwrap();
        let reporter = StatsReporter::new(metrics.clone(), Some(textfile.clone()));

        let mut builder = PassStatsBuilder::new("mirror", "mirror");
        builder.record_checked();
        builder.record_created(1);
        builder.set_mirror_outcome("completed");
        reporter.report(&builder.finish());

        let mut builder = PassStatsBuilder::new("health", "volumes");
        builder.record_health("volumes", false);
        builder.record_error();
        reporter.report(&builder.finish());

        assert_eq!(metrics.snapshots_created("mirror"), 1);
        assert_eq!(metrics.mirror_runs("completed"), 1);
        assert_eq!(metrics.health("volumes"), 1);
        assert_eq!(metrics.pass_errors("health"), 1);

        let text = std::fs::read_to_string(textfile).unwrap();
        assert!(text.contains("snapkeeper_mirror_runs_total"));
    }
}
