/*!
 * Volume discovery
 *
 * Decides which volumes the protection pass covers and which volumes have
 * left the set and should be purged. Exclusions are applied by the caller
 * through [`apply_exclusions`], so the mirror's own backing volume can never
 * end up in its own protection set.
 */

use async_trait::async_trait;
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use crate::backend::SnapshotBackend;
use crate::error::Result;

#[async_trait]
pub trait VolumeDiscovery: Send + Sync {
    /// Volumes currently eligible for protection
    async fn discover(&self) -> Result<Vec<String>>;

    /// Volumes no longer protected whose managed snapshots should go
    async fn stale(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Every backend volume whose name matches an optional include pattern
pub struct BackendDiscovery {
    backend: Arc<dyn SnapshotBackend>,
    include: Option<Regex>,
    stale: Vec<String>,
}

impl BackendDiscovery {
    pub fn new(backend: Arc<dyn SnapshotBackend>) -> Self {
        Self {
            backend,
            include: None,
            stale: Vec::new(),
        }
    }

    pub fn with_include(mut self, include: Regex) -> Self {
        self.include = Some(include);
        self
    }

    pub fn with_stale(mut self, stale: Vec<String>) -> Self {
        self.stale = stale;
        self
    }
}

#[async_trait]
impl VolumeDiscovery for BackendDiscovery {
    async fn discover(&self) -> Result<Vec<String>> {
        let mut volumes = self.backend.list_volumes().await?;
        if let Some(include) = &self.include {
            volumes.retain(|v| include.is_match(v));
        }
        debug!("Discovered {} volumes on {}", volumes.len(), self.backend.name());
        Ok(volumes)
    }

    async fn stale(&self) -> Result<Vec<String>> {
        Ok(self.stale.clone())
    }
}

/// A fixed, configured volume list
#[derive(Debug, Clone, Default)]
pub struct StaticDiscovery {
    volumes: Vec<String>,
    stale: Vec<String>,
}

impl StaticDiscovery {
    pub fn new(volumes: Vec<String>, stale: Vec<String>) -> Self {
        Self { volumes, stale }
    }
}

#[async_trait]
impl VolumeDiscovery for StaticDiscovery {
    async fn discover(&self) -> Result<Vec<String>> {
        Ok(self.volumes.clone())
    }

    async fn stale(&self) -> Result<Vec<String>> {
        Ok(self.stale.clone())
    }
}

/// Remove excluded volumes and the mirror backing volume, keeping order
pub fn apply_exclusions(volumes: Vec<String>, exclude: &[String], backing_volume: Option<&str>) -> Vec<String> {
    let mut excluded: HashSet<&str> = exclude.iter().map(String::as_str).collect();
    excluded.extend(backing_volume);

    volumes
        .into_iter()
        .filter(|v| {
            let keep = !excluded.contains(v.as_str());
            if !keep {
                debug!("Excluding volume {}", v);
            }
            keep
        })
        .collect()
}
