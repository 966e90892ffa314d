//! Per-run mirror log files
//!
//! Every mirror run writes its own log named `<prefix><timestamp>.log` using
//! the snapshot timestamp layout. Logs whose timestamp is older than the
//! retention age are pruned; other files in the directory are left alone.

use chrono::{DateTime, TimeDelta, Utc};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

use crate::naming::{decode_timestamp, encode_timestamp};

const LOG_SUFFIX: &str = ".log";

#[derive(Debug, Clone)]
pub struct MirrorLogs {
    dir: PathBuf,
    prefix: String,
}

impl MirrorLogs {
    pub fn new<P: Into<PathBuf>, S: Into<String>>(dir: P, prefix: S) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Log path for a run started at `now`
    pub fn path_for(&self, now: DateTime<Utc>) -> PathBuf {
        self.dir
            .join(format!("{}{}{}", self.prefix, encode_timestamp(now), LOG_SUFFIX))
    }

    /// Run timestamp encoded in a log file name, if it is one of ours
    pub fn run_time(&self, file_name: &str) -> Option<DateTime<Utc>> {
        let stamp = file_name
            .strip_prefix(self.prefix.as_str())?
            .strip_suffix(LOG_SUFFIX)?;
        decode_timestamp(stamp)
    }

    /// Delete logs older than `max_age`, returning the number removed
    ///
    /// A missing directory counts as nothing to prune. Individual delete
    /// failures are logged and skipped.
    pub fn prune(&self, max_age: TimeDelta, now: DateTime<Utc>) -> io::Result<usize> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let mut removed = 0;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Some(started) = self.run_time(name) else {
                continue;
            };
            if now - started <= max_age {
                continue;
            }

            match fs::remove_file(entry.path()) {
                Ok(()) => {
                    info!("Removed mirror log {}", entry.path().display());
                    removed += 1;
                }
                Err(e) => error!("Error removing {}: {}", entry.path().display(), e),
            }
        }

        debug!("Pruned {} mirror logs in {}", removed, self.dir.display());
        Ok(removed)
    }
}
