//! In-memory snapshot backend
//!
//! Keeps volumes and snapshots in a map guarded by a mutex. Faults can be
//! injected per volume or per snapshot, and every successful delete is
//! journaled so callers can assert on deletion order.

use super::error::{BackendError, BackendResult};
use super::types::{SnapshotInfo, SnapshotRef};
use super::SnapshotBackend;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

const BACKEND_NAME: &str = "memory";

#[derive(Debug, Default)]
struct MemoryState {
    volumes: BTreeMap<String, Vec<SnapshotInfo>>,
    offline: bool,
    failing_volumes: HashSet<String>,
    failing_deletes: HashSet<(String, String)>,
    failing_protection_queries: HashSet<(String, String)>,
    deletions: Vec<(String, String)>,
    creations: Vec<(String, String)>,
}

impl MemoryState {
    fn check_volume(&self, volume: &str) -> BackendResult<()> {
        if self.offline {
            return Err(BackendError::unavailable(BACKEND_NAME, "backend offline"));
        }
        if self.failing_volumes.contains(volume) {
            return Err(BackendError::unavailable(
                BACKEND_NAME,
                format!("injected failure for volume {}", volume),
            ));
        }
        Ok(())
    }

    fn snapshots_mut(&mut self, volume: &str) -> BackendResult<&mut Vec<SnapshotInfo>> {
        self.volumes
            .get_mut(volume)
            .ok_or_else(|| BackendError::not_found(volume))
    }
}

/// Snapshot backend held entirely in process memory
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register an empty volume (no-op if it exists)
    pub fn add_volume(&self, volume: &str) {
        self.state().volumes.entry(volume.to_string()).or_default();
    }

    /// Add a snapshot directly, bypassing collision checks and the journal
    pub fn add_snapshot(&self, volume: &str, name: &str, protected: bool) {
        self.state()
            .volumes
            .entry(volume.to_string())
            .or_default()
            .push(SnapshotInfo {
                name: name.to_string(),
                protected,
            });
    }

    /// Flip the protection flag on an existing snapshot
    pub fn set_protected(&self, volume: &str, name: &str, protected: bool) {
        if let Some(snaps) = self.state().volumes.get_mut(volume) {
            for snap in snaps.iter_mut().filter(|s| s.name == name) {
                snap.protected = protected;
            }
        }
    }

    /// Make every operation fail as if the cluster were unreachable
    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    /// Make every operation on `volume` fail with `Unavailable`
    pub fn fail_volume(&self, volume: &str) {
        self.state().failing_volumes.insert(volume.to_string());
    }

    /// Make deleting one snapshot fail
    pub fn fail_delete(&self, volume: &str, name: &str) {
        self.state()
            .failing_deletes
            .insert((volume.to_string(), name.to_string()));
    }

    /// Make the protection query for one snapshot fail
    pub fn fail_protection_query(&self, volume: &str, name: &str) {
        self.state()
            .failing_protection_queries
            .insert((volume.to_string(), name.to_string()));
    }

    /// Names of all snapshots on a volume, in insertion order
    pub fn snapshot_names(&self, volume: &str) -> Vec<String> {
        self.state()
            .volumes
            .get(volume)
            .map(|snaps| snaps.iter().map(|s| s.name.clone()).collect())
            .unwrap_or_default()
    }

    /// Successful deletes as `(volume, snapshot)`, in the order they happened
    pub fn deletions(&self) -> Vec<(String, String)> {
        self.state().deletions.clone()
    }

    /// Successful creates as `(volume, snapshot)`, in the order they happened
    pub fn creations(&self) -> Vec<(String, String)> {
        self.state().creations.clone()
    }
}

#[async_trait]
impl SnapshotBackend for MemoryBackend {
    fn name(&self) -> &str {
        BACKEND_NAME
    }

    async fn ping(&self) -> BackendResult<()> {
        if self.state().offline {
            return Err(BackendError::unavailable(BACKEND_NAME, "backend offline"));
        }
        Ok(())
    }

    async fn list_volumes(&self) -> BackendResult<Vec<String>> {
        let state = self.state();
        if state.offline {
            return Err(BackendError::unavailable(BACKEND_NAME, "backend offline"));
        }
        Ok(state.volumes.keys().cloned().collect())
    }

    async fn list_snapshots(&self, volume: &str) -> BackendResult<Vec<SnapshotInfo>> {
        let state = self.state();
        state.check_volume(volume)?;
        state
            .volumes
            .get(volume)
            .cloned()
            .ok_or_else(|| BackendError::not_found(volume))
    }

    async fn create_snapshot(&self, volume: &str, name: &str) -> BackendResult<()> {
        let mut state = self.state();
        state.check_volume(volume)?;

        let snaps = state.snapshots_mut(volume)?;
        if snaps.iter().any(|s| s.name == name) {
            return Err(BackendError::already_exists(volume, name));
        }
        snaps.push(SnapshotInfo::new(name));
        state.creations.push((volume.to_string(), name.to_string()));
        Ok(())
    }

    async fn delete_snapshot(&self, volume: &str, name: &str) -> BackendResult<()> {
        let mut state = self.state();
        state.check_volume(volume)?;

        if state
            .failing_deletes
            .contains(&(volume.to_string(), name.to_string()))
        {
            return Err(BackendError::Command {
                backend: BACKEND_NAME.to_string(),
                message: format!("injected delete failure for {}", SnapshotRef::new(volume, name)),
            });
        }

        let snaps = state.snapshots_mut(volume)?;
        let index = snaps
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| BackendError::not_found(SnapshotRef::new(volume, name).to_string()))?;

        if snaps[index].protected {
            return Err(BackendError::protected(volume, name));
        }

        snaps.remove(index);
        state.deletions.push((volume.to_string(), name.to_string()));
        Ok(())
    }

    async fn is_protected(&self, volume: &str, name: &str) -> BackendResult<bool> {
        let state = self.state();
        state.check_volume(volume)?;

        if state
            .failing_protection_queries
            .contains(&(volume.to_string(), name.to_string()))
        {
            return Err(BackendError::unavailable(
                BACKEND_NAME,
                format!("injected protection query failure for {}", SnapshotRef::new(volume, name)),
            ));
        }

        state
            .volumes
            .get(volume)
            .and_then(|snaps| snaps.iter().find(|s| s.name == name))
            .map(|s| s.protected)
            .ok_or_else(|| BackendError::not_found(SnapshotRef::new(volume, name).to_string()))
    }
}
