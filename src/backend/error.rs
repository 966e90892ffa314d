//! Error types for snapshot backends
//!
//! Backends report failures through a single taxonomy so that the retention
//! engine can tell expected conditions (a protected snapshot, a same-minute
//! name collision) apart from an unreachable storage cluster.

use std::io;
use thiserror::Error;

/// Result type alias for backend operations
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Unified error type for backend operations
#[derive(Error, Debug)]
pub enum BackendError {
    /// Backend could not be reached or refused the listing
    #[error("Backend {backend} unavailable: {message}")]
    Unavailable { backend: String, message: String },

    /// Volume or snapshot does not exist
    #[error("Not found: {target}")]
    NotFound { target: String },

    /// Delete attempted on a snapshot the backend refuses to remove
    #[error("Snapshot {volume}@{snapshot} is protected")]
    Protected { volume: String, snapshot: String },

    /// Create attempted with a name that is already taken
    #[error("Snapshot {volume}@{snapshot} already exists")]
    AlreadyExists { volume: String, snapshot: String },

    /// Backend tool ran but reported a failure
    #[error("Backend {backend} command failed: {message}")]
    Command { backend: String, message: String },

    /// Backend output could not be understood
    #[error("Backend {backend} returned unparsable output: {message}")]
    Parse { backend: String, message: String },

    /// I/O error talking to the backend
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl BackendError {
    pub fn unavailable<B: Into<String>, M: Into<String>>(backend: B, message: M) -> Self {
        BackendError::Unavailable {
            backend: backend.into(),
            message: message.into(),
        }
    }

    pub fn not_found<T: Into<String>>(target: T) -> Self {
        BackendError::NotFound {
            target: target.into(),
        }
    }

    pub fn protected<V: Into<String>, S: Into<String>>(volume: V, snapshot: S) -> Self {
        BackendError::Protected {
            volume: volume.into(),
            snapshot: snapshot.into(),
        }
    }

    pub fn already_exists<V: Into<String>, S: Into<String>>(volume: V, snapshot: S) -> Self {
        BackendError::AlreadyExists {
            volume: volume.into(),
            snapshot: snapshot.into(),
        }
    }

    /// Check if this error is the expected "protected snapshot" refusal
    pub fn is_protected(&self) -> bool {
        matches!(self, BackendError::Protected { .. })
    }

    /// Check if this error is a same-name collision on create
    pub fn is_already_exists(&self) -> bool {
        matches!(self, BackendError::AlreadyExists { .. })
    }

    /// Check if this error means the backend itself is unreachable
    pub fn is_unavailable(&self) -> bool {
        match self {
            BackendError::Unavailable { .. } => true,
            BackendError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::NotConnected
            ),
            _ => false,
        }
    }
}
