//! Common types for snapshot backends

use serde::{Deserialize, Serialize};
use std::fmt;

/// A snapshot as reported by a backend listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    /// Snapshot name, managed or foreign
    pub name: String,

    /// Backend refuses to delete this snapshot (e.g. it has clones)
    pub protected: bool,
}

impl SnapshotInfo {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            protected: false,
        }
    }

    pub fn protected<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            protected: true,
        }
    }
}

/// `volume@snapshot` reference used in log lines and backend arguments
#[derive(Debug, Clone, Copy)]
pub struct SnapshotRef<'a> {
    pub volume: &'a str,
    pub snapshot: &'a str,
}

impl<'a> SnapshotRef<'a> {
    pub fn new(volume: &'a str, snapshot: &'a str) -> Self {
        Self { volume, snapshot }
    }
}

impl fmt::Display for SnapshotRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.volume, self.snapshot)
    }
}
