//! Durable "last successful mirror" marker
//!
//! The watermark is the modification time of a marker file. It is read at
//! the start of each cycle and written only after a successful run.

use chrono::{DateTime, TimeDelta, Utc};
use filetime::FileTime;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct MirrorWatermark {
    path: PathBuf,
}

impl MirrorWatermark {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Time of the last success, `None` if the marker does not exist
    ///
    /// An unreadable marker is treated as absent so the next cycle runs.
    pub fn read(&self) -> Option<DateTime<Utc>> {
        match fs::metadata(&self.path).and_then(|meta| meta.modified()) {
            Ok(modified) => Some(DateTime::<Utc>::from(modified)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!("Cannot read watermark {}: {}", self.path.display(), e);
                None
            }
        }
    }

    /// Record a success at `at`: create the marker if absent, else touch it
    pub fn mark(&self, at: DateTime<Utc>) -> io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let mtime = FileTime::from_unix_time(at.timestamp(), at.timestamp_subsec_nanos());
        filetime::set_file_mtime(&self.path, mtime)?;
        debug!("Watermark {} set to {}", self.path.display(), at);
        Ok(())
    }

    /// The last success, if it is at most `interval` old
    ///
    /// `None` means a run is due.
    pub fn recent_success(&self, interval: TimeDelta, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.read().filter(|last| now - *last <= interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 5, h, m, 0).unwrap()
    }

    #[test]
    fn test_absent_watermark_is_due() {
        let dir = TempDir::new().unwrap();
        let watermark = MirrorWatermark::new(dir.path().join("mirror.success"));

        assert!(watermark.read().is_none());
        assert!(watermark.recent_success(TimeDelta::hours(24), at(0, 0)).is_none());
    }

    #[test]
    fn test_mark_creates_then_touches() {
        let dir = TempDir::new().unwrap();
        let watermark = MirrorWatermark::new(dir.path().join("state").join("mirror.success"));

        watermark.mark(at(1, 0)).unwrap();
        assert_eq!(watermark.read(), Some(at(1, 0)));

        watermark.mark(at(3, 30)).unwrap();
        assert_eq!(watermark.read(), Some(at(3, 30)));
    }

    #[test]
    fn test_due_boundary() {
        let dir = TempDir::new().unwrap();
        let watermark = MirrorWatermark::new(dir.path().join("mirror.success"));
        watermark.mark(at(0, 0)).unwrap();

        let interval = TimeDelta::hours(5);
        assert_eq!(watermark.recent_success(interval, at(5, 0)), Some(at(0, 0)));
        assert!(watermark.recent_success(interval, at(5, 1)).is_none());
    }
}
