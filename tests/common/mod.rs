//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use snapkeeper::command::{CapturedOutput, CommandError, CommandReport, CommandRunner, CommandSpec};
use snapkeeper::config::KeeperConfig;
use std::path::Path;
use std::sync::Mutex;

pub fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, day, hour, minute, 0).unwrap()
}

/// Command runner that records command lines and answers with fixed exit codes
///
/// The mirror command gets `mirror_exit`; everything else exits 0.
pub struct RecordingRunner {
    mirror_program: String,
    mirror_exit: Mutex<i32>,
    calls: Mutex<Vec<String>>,
}

impl RecordingRunner {
    pub fn new(mirror_program: &str, mirror_exit: i32) -> Self {
        Self {
            mirror_program: mirror_program.to_string(),
            mirror_exit: Mutex::new(mirror_exit),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set_mirror_exit(&self, code: i32) {
        *self.mirror_exit.lock().unwrap() = code;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn mirror_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.starts_with(&self.mirror_program))
            .count()
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandReport, CommandError> {
        self.calls.lock().unwrap().push(spec.to_string());
        let code = if spec.program == self.mirror_program {
            *self.mirror_exit.lock().unwrap()
        } else {
            0
        };
        Ok(CommandReport {
            exit_code: Some(code),
            success: spec.accepts(Some(code)),
        })
    }

    async fn capture(&self, spec: &CommandSpec) -> Result<CapturedOutput, CommandError> {
        self.calls.lock().unwrap().push(spec.to_string());
        Ok(CapturedOutput {
            exit_code: Some(0),
            success: true,
            stdout: String::new(),
            stderr: String::new(),
        })
    }
}

/// Configuration with the mirror enabled and every path under `dir`
pub fn mirror_config(dir: &Path) -> KeeperConfig {
    let mut config = KeeperConfig::default();
    config.mirror.enabled = true;
    config.mirror.backing_volume = "cephfs-backup".to_string();
    config.mirror.command = "rsync".to_string();
    config.mirror.lock_path = dir.join("mirror.lock");
    config.mirror.watermark_path = dir.join("last_success");
    config.mirror.log_dir = dir.join("logs");
    config.mirror.require_mounts = Vec::new();
    config.mirror.lock_timeout_secs = Some(1);
    config
}
