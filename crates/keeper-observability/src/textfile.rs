//! Textfile exposition for node-exporter style collectors
//!
//! The rendered metrics are written to a sibling temp file and renamed over
//! the target so a scraper never observes a half-written file.

use crate::metrics::{KeeperMetrics, MetricsError};
use std::fs;
use std::path::Path;
use tracing::debug;

/// Render `metrics` and atomically replace `path` with the result
pub fn write_textfile(metrics: &KeeperMetrics, path: &Path) -> Result<(), MetricsError> {
    let text = metrics.render()?;

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    fs::write(&tmp_path, text.as_bytes())?;
    fs::rename(&tmp_path, path)?;

    debug!("Wrote metrics textfile {}", path.display());
    Ok(())
}
