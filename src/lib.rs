/*!
 * snapkeeper - snapshot retention and mirror coordination
 *
 * A background service that keeps block storage volumes protected:
 * - Periodic clock-named snapshots per volume
 * - Age/count retention that never drops below a minimum floor
 * - Protected snapshots are never deleted
 * - An exclusive, watermark-gated filesystem mirror onto a backing volume
 * - Per-group health records and Prometheus metrics
 *
 * Author: snapkeeper contributors
 */

pub mod backend;
pub mod clock;
pub mod command;
pub mod config;
pub mod core;
pub mod daemon;
pub mod discovery;
pub mod error;
pub mod logging;
pub mod mirror;
pub mod naming;
pub mod passes;
pub mod scheduler;
pub mod stats;

// Re-export commonly used types
pub use backend::{BackendError, MemoryBackend, SnapshotBackend, SnapshotInfo};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::KeeperConfig;
pub use core::{RetentionPolicy, SnapshotGroup};
pub use daemon::{Keeper, PassKind};
pub use error::{KeeperError, Result};
pub use naming::SnapshotNaming;
pub use stats::PassStats;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, env!("CARGO_PKG_VERSION"));
    }
}
