/*!
 * Configuration types for snapkeeper
 *
 * Loaded from a TOML file; every field has a default so a missing file or a
 * partial file is valid. CLI flags are applied on top by the binary.
 */

use chrono::TimeDelta;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::backend::RbdSettings;
use crate::core::health::DEFAULT_SLACK_PERCENT;
use crate::core::{RetentionPolicy, SnapshotGroup};
use crate::error::{KeeperError, Result};
use crate::mirror::{MirrorSettings, LOG_FILE_PLACEHOLDER};
use crate::naming::SnapshotNaming;

/// Default config file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/snapkeeper/snapkeeper.toml";

/// Upper bound for any age or interval in hours (100 years)
pub const MAX_HOURS: u64 = 24 * 365 * 100;

/// Upper bound for any cadence in minutes
pub const MAX_MINUTES: u64 = MAX_HOURS * 60;

/// Upper bound for the health slack
pub const MAX_SLACK_PERCENT: u32 = 1000;

/// Top-level daemon configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeeperConfig {
    /// Log level for diagnostic output
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log file path (None = stdout)
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Shorthand for log_level = debug
    #[serde(default)]
    pub debug: bool,

    /// Prometheus textfile written after every pass
    #[serde(default)]
    pub metrics_textfile: Option<PathBuf>,

    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub discovery: DiscoveryConfig,

    #[serde(default)]
    pub volumes: VolumesConfig,

    #[serde(default)]
    pub purge: PurgeConfig,

    #[serde(default)]
    pub health: HealthConfig,

    #[serde(default)]
    pub mirror: MirrorConfig,
}

impl Default for KeeperConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            log_file: None,
            debug: false,
            metrics_textfile: None,
            backend: BackendConfig::default(),
            discovery: DiscoveryConfig::default(),
            volumes: VolumesConfig::default(),
            purge: PurgeConfig::default(),
            health: HealthConfig::default(),
            mirror: MirrorConfig::default(),
        }
    }
}

/// Which snapshot backend to drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Ceph RBD through the `rbd` CLI
    #[default]
    Rbd,

    /// In-process map, for dry runs and tests
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,

    #[serde(flatten)]
    pub rbd: RbdSettings,
}

/// Which volumes are protected and which are stale
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DiscoveryConfig {
    /// Only volumes matching this regex are protected (None = all)
    #[serde(default)]
    pub include_pattern: Option<String>,

    /// Volumes never protected
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Fixed protection set; when non-empty the backend is not enumerated
    #[serde(default)]
    pub static_volumes: Vec<String>,

    /// Volumes whose managed snapshots the purge pass removes
    #[serde(default)]
    pub stale_volumes: Vec<String>,
}

/// Naming and age/count policy for one snapshot group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Snapshot name prefix in front of the timestamp
    #[serde(default)]
    pub prefix: String,

    /// No new snapshot while one at most this old exists
    #[serde(default = "default_min_age_hours")]
    pub min_age_hours: u64,

    /// Snapshots older than this may be deleted
    #[serde(default = "default_max_age_hours")]
    pub max_age_hours: u64,

    /// Never delete below this many managed snapshots
    #[serde(default = "default_min_count")]
    pub min_count: usize,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            min_age_hours: default_min_age_hours(),
            max_age_hours: default_max_age_hours(),
            min_count: default_min_count(),
        }
    }
}

impl RetentionConfig {
    pub fn policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            min_age: hours(self.min_age_hours),
            max_age: hours(self.max_age_hours),
            min_count: self.min_count,
        }
    }

    /// Build the snapshot group this policy describes
    pub fn group(&self, name: &str) -> Result<SnapshotGroup> {
        let naming = SnapshotNaming::new(&self.prefix)
            .map_err(|e| KeeperError::config(format!("Invalid prefix for {}: {}", name, e)))?;
        Ok(SnapshotGroup::new(name, naming, self.policy()))
    }

    fn validate(&self, section: &str) -> Result<()> {
        if self.min_age_hours == 0 {
            return Err(KeeperError::config(format!("{}: min_age_hours must be > 0", section)));
        }
        if self.max_age_hours > MAX_HOURS {
            return Err(KeeperError::config(format!(
                "{}: max_age_hours must be <= {}",
                section, MAX_HOURS
            )));
        }
        if self.max_age_hours < self.min_age_hours {
            return Err(KeeperError::config(format!(
                "{}: max_age_hours ({}) must not be less than min_age_hours ({})",
                section, self.max_age_hours, self.min_age_hours
            )));
        }
        Ok(())
    }
}

/// Block volume protection pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumesConfig {
    /// Interval between protection passes
    #[serde(default = "default_check_interval")]
    pub interval_minutes: u64,

    #[serde(default)]
    pub retention: RetentionConfig,
}

impl Default for VolumesConfig {
    fn default() -> Self {
        Self {
            interval_minutes: default_check_interval(),
            retention: RetentionConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_purge_interval")]
    pub interval_minutes: u64,
}

impl Default for PurgeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_minutes: default_purge_interval(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_check_interval")]
    pub interval_minutes: u64,

    /// Slack above the creation cadence before a volume is uncovered
    #[serde(default = "default_slack_percent")]
    pub slack_percent: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_minutes: default_check_interval(),
            slack_percent: default_slack_percent(),
        }
    }
}

/// Filesystem mirror onto a dedicated backing volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Volume holding the mirror copy; excluded from the protection set
    #[serde(default = "default_backing_volume")]
    pub backing_volume: String,

    /// Minimum hours between successful mirror runs
    #[serde(default = "default_mirror_interval")]
    pub interval_hours: u64,

    /// How often the mirror pass checks whether a run is due
    #[serde(default = "default_check_interval")]
    pub check_interval_minutes: u64,

    #[serde(default = "default_mirror_command")]
    pub command: String,

    /// Arguments; `{log_file}` is replaced by the per-run log path
    #[serde(default = "default_mirror_args")]
    pub args: Vec<String>,

    /// Exit codes that count as success
    #[serde(default = "default_valid_exit_codes")]
    pub valid_exit_codes: Vec<i32>,

    #[serde(default = "default_lock_path")]
    pub lock_path: PathBuf,

    #[serde(default = "default_watermark_path")]
    pub watermark_path: PathBuf,

    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    #[serde(default = "default_log_prefix")]
    pub log_prefix: String,

    /// Bounded lock wait in seconds (None = wait indefinitely)
    #[serde(default)]
    pub lock_timeout_secs: Option<u64>,

    /// Freeze this mount around the backing-volume snapshot
    #[serde(default)]
    pub freeze_mount: Option<PathBuf>,

    /// Paths that must be mount points before a mirror runs
    #[serde(default = "default_require_mounts")]
    pub require_mounts: Vec<PathBuf>,

    #[serde(default = "default_mirror_retention")]
    pub retention: RetentionConfig,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            backing_volume: default_backing_volume(),
            interval_hours: default_mirror_interval(),
            check_interval_minutes: default_check_interval(),
            command: default_mirror_command(),
            args: default_mirror_args(),
            valid_exit_codes: default_valid_exit_codes(),
            lock_path: default_lock_path(),
            watermark_path: default_watermark_path(),
            log_dir: default_log_dir(),
            log_prefix: default_log_prefix(),
            lock_timeout_secs: None,
            freeze_mount: None,
            require_mounts: default_require_mounts(),
            retention: default_mirror_retention(),
        }
    }
}

impl MirrorConfig {
    /// Coordinator settings derived from this section
    pub fn settings(&self) -> MirrorSettings {
        MirrorSettings {
            command: self.command.clone(),
            args: self.args.clone(),
            valid_exit_codes: self.valid_exit_codes.clone(),
            interval: hours(self.interval_hours),
            lock_path: self.lock_path.clone(),
            lock_timeout: self.lock_timeout_secs.map(Duration::from_secs),
            watermark_path: self.watermark_path.clone(),
            log_dir: self.log_dir.clone(),
            log_prefix: self.log_prefix.clone(),
        }
    }
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

/// Hours as a `TimeDelta`, clamped to [`MAX_HOURS`]
fn hours(value: u64) -> TimeDelta {
    TimeDelta::hours(value.min(MAX_HOURS) as i64)
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_min_age_hours() -> u64 {
    5
}

fn default_max_age_hours() -> u64 {
    168 // 7 days
}

fn default_min_count() -> usize {
    1
}

fn default_check_interval() -> u64 {
    5
}

fn default_purge_interval() -> u64 {
    60
}

fn default_slack_percent() -> u32 {
    DEFAULT_SLACK_PERCENT
}

fn default_backing_volume() -> String {
    "cephfs-backup".to_string()
}

fn default_mirror_interval() -> u64 {
    24
}

fn default_mirror_command() -> String {
    "rsync".to_string()
}

fn default_mirror_args() -> Vec<String> {
    vec![
        "-ah".to_string(),
        "--delete".to_string(),
        "--delete-excluded".to_string(),
        format!("--log-file={}", LOG_FILE_PLACEHOLDER),
        "/storage/cephfs/".to_string(),
        "/backup/backup/".to_string(),
    ]
}

fn default_valid_exit_codes() -> Vec<i32> {
    // 24: some source files vanished during transfer
    vec![0, 24]
}

fn default_lock_path() -> PathBuf {
    PathBuf::from("/backup/.rsync.lock")
}

fn default_watermark_path() -> PathBuf {
    PathBuf::from("/backup/last_success")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("/backup")
}

fn default_log_prefix() -> String {
    "rsync_".to_string()
}

fn default_require_mounts() -> Vec<PathBuf> {
    vec![PathBuf::from("/storage/cephfs"), PathBuf::from("/backup")]
}

fn default_mirror_retention() -> RetentionConfig {
    RetentionConfig {
        prefix: "cephfs_".to_string(),
        ..RetentionConfig::default()
    }
}

impl KeeperConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents)
            .map_err(|e| KeeperError::config(format!("{}: {}", path.display(), e)))
    }

    /// Load from `path`, falling back to defaults if the file does not exist
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| KeeperError::config(e.to_string()))
    }

    /// Effective log level after the debug shorthand
    pub fn effective_log_level(&self) -> LogLevel {
        if self.debug {
            LogLevel::Debug
        } else {
            self.log_level
        }
    }

    /// Compiled include pattern, if configured
    pub fn include_regex(&self) -> Result<Option<Regex>> {
        self.discovery
            .include_pattern
            .as_deref()
            .map(|p| {
                Regex::new(p).map_err(|e| KeeperError::config(format!("Invalid include_pattern: {}", e)))
            })
            .transpose()
    }

    pub fn volumes_group(&self) -> Result<SnapshotGroup> {
        self.volumes.retention.group("volumes")
    }

    pub fn mirror_group(&self) -> Result<SnapshotGroup> {
        self.mirror.retention.group("mirror")
    }

    /// The mirror backing volume, when the mirror is enabled
    pub fn backing_volume(&self) -> Option<&str> {
        self.mirror
            .enabled
            .then_some(self.mirror.backing_volume.as_str())
    }

    /// Check for values that would make a pass misbehave
    pub fn validate(&self) -> Result<()> {
        let intervals = [
            ("volumes.interval_minutes", self.volumes.interval_minutes, MAX_MINUTES),
            ("purge.interval_minutes", self.purge.interval_minutes, MAX_MINUTES),
            ("health.interval_minutes", self.health.interval_minutes, MAX_MINUTES),
            ("mirror.interval_hours", self.mirror.interval_hours, MAX_HOURS),
            ("mirror.check_interval_minutes", self.mirror.check_interval_minutes, MAX_MINUTES),
        ];
        for (name, value, max) in intervals {
            if value == 0 {
                return Err(KeeperError::config(format!("{} must be > 0", name)));
            }
            if value > max {
                return Err(KeeperError::config(format!("{} must be <= {}", name, max)));
            }
        }

        if self.health.slack_percent > MAX_SLACK_PERCENT {
            return Err(KeeperError::config(format!(
                "health.slack_percent must be <= {}",
                MAX_SLACK_PERCENT
            )));
        }

        self.volumes.retention.validate("volumes.retention")?;
        self.include_regex()?;

        if self.mirror.enabled {
            self.mirror.retention.validate("mirror.retention")?;
            if self.mirror.command.trim().is_empty() {
                return Err(KeeperError::config("mirror.command must not be empty"));
            }
            if self.mirror.valid_exit_codes.is_empty() {
                return Err(KeeperError::config("mirror.valid_exit_codes must not be empty"));
            }
            if self.mirror.backing_volume.trim().is_empty() {
                return Err(KeeperError::config("mirror.backing_volume must not be empty"));
            }
        }

        Ok(())
    }
}
