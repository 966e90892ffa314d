//! Exclusive mirror coordination
//!
//! The mirror copies a filesystem tree onto a dedicated backing volume with an
//! external tool. Runs are serialized by a local lock file and gated by a
//! durable watermark of the last success.

pub mod coordinator;
pub mod lock;
pub mod logs;
pub mod mount;
pub mod watermark;

pub use coordinator::{MirrorCoordinator, MirrorOutcome, MirrorSettings, MirrorState, LOG_FILE_PLACEHOLDER};
pub use lock::ExclusionLock;
pub use logs::MirrorLogs;
pub use mount::{check_mounts, is_mount_point};
pub use watermark::MirrorWatermark;
