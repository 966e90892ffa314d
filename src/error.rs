/*!
 * Error types for snapkeeper
 */

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::backend::BackendError;
use crate::command::CommandError;

pub type Result<T> = std::result::Result<T, KeeperError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_UNHEALTHY: i32 = 1;
pub const EXIT_FATAL: i32 = 2;

#[derive(Error, Debug)]
pub enum KeeperError {
    /// Storage backend failure
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// Backend unreachable at startup
    #[error("Backend unreachable at startup: {0}")]
    Startup(BackendError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// External command could not be run
    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    /// External command ran but its exit code is not whitelisted
    #[error("Command {command} failed with exit code {exit_code:?}")]
    CommandFailed {
        command: String,
        exit_code: Option<i32>,
    },

    /// Exclusion lock could not be acquired
    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    /// Required mount point missing
    #[error("Mount check failed: {0}")]
    Mount(String),

    /// Volume discovery failed
    #[error("Discovery failed: {0}")]
    Discovery(String),

    /// Metrics sink failure
    #[error("Metrics error: {0}")]
    Metrics(#[from] keeper_observability::MetricsError),
}

/// Advisory lock errors for the mirror exclusion lock
#[derive(Error, Debug)]
pub enum LockError {
    /// Bounded wait elapsed while another holder kept the lock
    #[error("lock timed out after {waited:?} at {}", .path.display())]
    Timeout { path: PathBuf, waited: Duration },

    /// Lock file could not be opened or locked
    #[error("lock I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl KeeperError {
    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        if self.is_fatal() {
            EXIT_FATAL
        } else {
            EXIT_UNHEALTHY
        }
    }

    /// Check if this error should stop the daemon
    ///
    /// Only bad configuration and a backend that is unreachable at startup
    /// are fatal. Everything else degrades a single pass.
    pub fn is_fatal(&self) -> bool {
        matches!(self, KeeperError::Config(_) | KeeperError::Startup(_))
    }

    pub fn config<S: Into<String>>(message: S) -> Self {
        KeeperError::Config(message.into())
    }
}
