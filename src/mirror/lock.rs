//! Filesystem advisory lock for the mirror run
//!
//! The lock is an `flock`-style exclusive lock on a lock file. It is local to
//! the host; two daemons on different hosts mirroring the same tree are not
//! serialized.

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::LockError;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// RAII guard for the mirror exclusion lock
///
/// The lock is released when the guard is dropped, on every exit path.
#[derive(Debug)]
pub struct ExclusionLock {
    file: File,
    path: PathBuf,
}

impl ExclusionLock {
    /// Acquire the lock at `path`, waiting at most `timeout`
    ///
    /// `None` waits indefinitely for the current holder to finish.
    pub async fn acquire(path: &Path, timeout: Option<Duration>) -> Result<Self, LockError> {
        let io_err = |source| LockError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(io_err)?;

        let start = Instant::now();
        let mut announced = false;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    debug!("Acquired lock {}", path.display());
                    return Ok(Self {
                        file,
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if e.kind() == fs2::lock_contended_error().kind() => {}
                Err(e) => return Err(io_err(e)),
            }

            if !announced {
                warn!("Waiting for lock {} held by another run", path.display());
                announced = true;
            }

            let waited = start.elapsed();
            if let Some(limit) = timeout {
                if waited >= limit {
                    return Err(LockError::Timeout {
                        path: path.to_path_buf(),
                        waited,
                    });
                }
            }

            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ExclusionLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            warn!("Failed to unlock {}: {}", self.path.display(), e);
        } else {
            debug!("Released lock {}", self.path.display());
        }
    }
}
