//! Snapshot backend abstraction
//!
//! The retention engine never talks to storage directly. Every list, create,
//! delete and protection query goes through a [`SnapshotBackend`] handle that
//! is constructed once at startup and shared by reference (`Arc`) with every
//! pass that needs it.
//!
//! # Implementations
//!
//! - [`MemoryBackend`]: in-process map with fault injection, used by tests and
//!   the `memory` backend kind
//! - [`RbdCliBackend`]: drives the `rbd` command-line tool
//!
//! # Example
//!
//! ```
//! use snapkeeper::backend::{MemoryBackend, SnapshotBackend};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = MemoryBackend::new();
//! backend.add_volume("pvc-1");
//! backend.create_snapshot("pvc-1", "2024-01-01_00:00").await?;
//!
//! let snaps = backend.list_snapshots("pvc-1").await?;
//! assert_eq!(snaps.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod types;

mod memory;
mod rbd;

pub use error::{BackendError, BackendResult};
pub use memory::MemoryBackend;
pub use rbd::{RbdCliBackend, RbdSettings};
pub use types::{SnapshotInfo, SnapshotRef};

use async_trait::async_trait;

/// Snapshot operations on named volumes
///
/// Calls are treated as synchronous, potentially slow, remote operations.
/// Implementors must be `Send + Sync` so one handle can serve every pass.
#[async_trait]
pub trait SnapshotBackend: Send + Sync {
    /// Short backend name for log lines
    fn name(&self) -> &str;

    /// Verify the backend is reachable
    ///
    /// Called once at startup; failure there is fatal to the daemon.
    async fn ping(&self) -> BackendResult<()>;

    /// List every volume the backend knows about
    async fn list_volumes(&self) -> BackendResult<Vec<String>>;

    /// List snapshots of a volume, managed and foreign alike
    async fn list_snapshots(&self, volume: &str) -> BackendResult<Vec<SnapshotInfo>>;

    /// Create a snapshot
    ///
    /// # Errors
    ///
    /// Returns `BackendError::AlreadyExists` if the name is taken.
    async fn create_snapshot(&self, volume: &str, name: &str) -> BackendResult<()>;

    /// Delete a snapshot
    ///
    /// # Errors
    ///
    /// Returns `BackendError::Protected` if the snapshot is protected. Callers
    /// are expected to check [`SnapshotBackend::is_protected`] first.
    async fn delete_snapshot(&self, volume: &str, name: &str) -> BackendResult<()>;

    /// Query the protection flag of a single snapshot, uncached
    async fn is_protected(&self, volume: &str, name: &str) -> BackendResult<bool>;
}
