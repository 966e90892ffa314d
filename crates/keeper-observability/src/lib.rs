//! Snapkeeper observability sink
//!
//! Passes in the daemon never touch counters directly. Each pass returns its
//! own tallies (snapshots created, deleted, volumes checked, errors) and the
//! caller folds them into a [`KeeperMetrics`] instance.
//!
//! The sink owns its own Prometheus [`prometheus::Registry`], so several
//! instances can coexist (one per daemon, one per test) without clashing on
//! metric names.
//!
//! ## Quick Start
//!
//! ```
//! use keeper_observability::KeeperMetrics;
//!
//! let metrics = KeeperMetrics::new().unwrap();
//! metrics.add_snapshots_created("volumes", 3);
//! metrics.set_health("volumes", true);
//!
//! let text = metrics.render().unwrap();
//! assert!(text.contains("snapkeeper_snapshots_created_total"));
//! ```

pub mod metrics;
pub mod textfile;

pub use metrics::{KeeperMetrics, MetricsError};
pub use textfile::write_textfile;
