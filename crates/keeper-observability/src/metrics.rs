//! Prometheus metrics derived from pass results
//!
//! Every metric is registered on a registry owned by [`KeeperMetrics`].
//! Counter names follow the `snapkeeper_*_total` convention; gauges carry the
//! latest observed value.

use prometheus::{
    Encoder, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder,
};
use thiserror::Error;

/// Errors raised while building or rendering metrics
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Metric creation or registration failed
    #[error("Metric registration failed: {0}")]
    Registration(#[from] prometheus::Error),

    /// Encoded output was not valid UTF-8
    #[error("Metric output is not valid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),

    /// Writing a textfile failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Observability sink for snapkeeper
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
#[derive(Clone)]
pub struct KeeperMetrics {
    registry: Registry,

    /// Labels: group
    snapshots_created: IntCounterVec,

    /// Labels: group
    snapshots_deleted: IntCounterVec,

    /// Labels: group
    volumes_checked: IntCounterVec,

    /// Labels: pass
    pass_errors: IntCounterVec,

    /// Labels: outcome (completed, failed, not_due, lock_timeout)
    mirror_runs: IntCounterVec,

    volumes_discovered: IntGauge,

    /// 0 if the group is healthy, 1 otherwise. Labels: group
    health: IntGaugeVec,
}

impl KeeperMetrics {
    /// Create a sink with a fresh registry and all metrics registered
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let snapshots_created = IntCounterVec::new(
            Opts::new(
                "snapkeeper_snapshots_created_total",
                "Number of snapshots created",
            ),
            &["group"],
        )?;
        registry.register(Box::new(snapshots_created.clone()))?;

        let snapshots_deleted = IntCounterVec::new(
            Opts::new(
                "snapkeeper_snapshots_deleted_total",
                "Number of snapshots deleted by retention or purge",
            ),
            &["group"],
        )?;
        registry.register(Box::new(snapshots_deleted.clone()))?;

        let volumes_checked = IntCounterVec::new(
            Opts::new(
                "snapkeeper_volumes_checked_total",
                "Number of volume evaluations performed",
            ),
            &["group"],
        )?;
        registry.register(Box::new(volumes_checked.clone()))?;

        let pass_errors = IntCounterVec::new(
            Opts::new(
                "snapkeeper_pass_errors_total",
                "Number of per-volume or per-cycle failures",
            ),
            &["pass"],
        )?;
        registry.register(Box::new(pass_errors.clone()))?;

        let mirror_runs = IntCounterVec::new(
            Opts::new(
                "snapkeeper_mirror_runs_total",
                "Mirror coordinator cycles by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(mirror_runs.clone()))?;

        let volumes_discovered = IntGauge::with_opts(Opts::new(
            "snapkeeper_volumes_discovered",
            "Number of volumes in the protection set at the last pass",
        ))?;
        registry.register(Box::new(volumes_discovered.clone()))?;

        let health = IntGaugeVec::new(
            Opts::new("snapkeeper_health", "0 if the group has recent coverage"),
            &["group"],
        )?;
        registry.register(Box::new(health.clone()))?;

        Ok(Self {
            registry,
            snapshots_created,
            snapshots_deleted,
            volumes_checked,
            pass_errors,
            mirror_runs,
            volumes_discovered,
            health,
        })
    }

    pub fn add_snapshots_created(&self, group: &str, count: u64) {
        self.snapshots_created
            .with_label_values(&[group])
            .inc_by(count);
    }

    pub fn add_snapshots_deleted(&self, group: &str, count: u64) {
        self.snapshots_deleted
            .with_label_values(&[group])
            .inc_by(count);
    }

    pub fn add_volumes_checked(&self, group: &str, count: u64) {
        self.volumes_checked.with_label_values(&[group]).inc_by(count);
    }

    pub fn add_pass_errors(&self, pass: &str, count: u64) {
        self.pass_errors.with_label_values(&[pass]).inc_by(count);
    }

    /// Count one mirror coordinator cycle under the given outcome label
    pub fn inc_mirror_run(&self, outcome: &str) {
        self.mirror_runs.with_label_values(&[outcome]).inc();
    }

    pub fn set_volumes_discovered(&self, count: usize) {
        self.volumes_discovered.set(count as i64);
    }

    /// Publish a group's health (gauge is 0 when healthy, 1 otherwise)
    pub fn set_health(&self, group: &str, healthy: bool) {
        self.health
            .with_label_values(&[group])
            .set(if healthy { 0 } else { 1 });
    }

    /// Current value of the created counter for a group
    pub fn snapshots_created(&self, group: &str) -> u64 {
        self.snapshots_created.with_label_values(&[group]).get()
    }

    /// Current value of the deleted counter for a group
    pub fn snapshots_deleted(&self, group: &str) -> u64 {
        self.snapshots_deleted.with_label_values(&[group]).get()
    }

    /// Current value of the volumes-checked counter for a group
    pub fn volumes_checked(&self, group: &str) -> u64 {
        self.volumes_checked.with_label_values(&[group]).get()
    }

    /// Current value of the error counter for a pass
    pub fn pass_errors(&self, pass: &str) -> u64 {
        self.pass_errors.with_label_values(&[pass]).get()
    }

    /// Current number of discovered volumes
    pub fn volumes_discovered(&self) -> i64 {
        self.volumes_discovered.get()
    }

    /// Current value of the mirror-run counter for an outcome
    pub fn mirror_runs(&self, outcome: &str) -> u64 {
        self.mirror_runs.with_label_values(&[outcome]).get()
    }

    /// Current health gauge for a group
    pub fn health(&self, group: &str) -> i64 {
        self.health.with_label_values(&[group]).get()
    }

    /// Render all metrics in Prometheus text format
    pub fn render(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_initialization() {
        let metrics = KeeperMetrics::new().unwrap();
        metrics.set_volumes_discovered(4);

        let text = metrics.render().unwrap();
        assert!(text.contains("snapkeeper_volumes_discovered 4"));
    }

    #[test]
    fn test_independent_registries() {
        let a = KeeperMetrics::new().unwrap();
        let b = KeeperMetrics::new().unwrap();

        a.add_snapshots_created("volumes", 2);

        assert_eq!(a.snapshots_created("volumes"), 2);
        assert_eq!(b.snapshots_created("volumes"), 0);
    }

    #[test]
    fn test_counters_accumulate() {
        let metrics = KeeperMetrics::new().unwrap();
        metrics.add_snapshots_deleted("mirror", 1);
        metrics.add_snapshots_deleted("mirror", 3);
        metrics.inc_mirror_run("completed");
        metrics.inc_mirror_run("not_due");
        metrics.inc_mirror_run("not_due");

        assert_eq!(metrics.snapshots_deleted("mirror"), 4);
        assert_eq!(metrics.mirror_runs("completed"), 1);
        assert_eq!(metrics.mirror_runs("not_due"), 2);
    }

    #[test]
    fn test_health_gauge() {
        let metrics = KeeperMetrics::new().unwrap();

        metrics.set_health("volumes", false);
        assert_eq!(metrics.health("volumes"), 1);

        metrics.set_health("volumes", true);
        assert_eq!(metrics.health("volumes"), 0);

        let text = metrics.render().unwrap();
        assert!(text.contains("snapkeeper_health{group=\"volumes\"} 0"));
    }
}
