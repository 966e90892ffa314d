/*!
 * Exclusive mirror coordinator
 *
 * One cycle: read the watermark, skip if a success is recent enough, take
 * the exclusion lock, run the external mirror command, and advance the
 * watermark only when the exit code is whitelisted. The lock guard is
 * dropped on every path out of the cycle.
 */

use chrono::{DateTime, TimeDelta, Utc};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::lock::ExclusionLock;
use super::logs::MirrorLogs;
use super::watermark::MirrorWatermark;
use crate::clock::Clock;
use crate::command::{CommandRunner, CommandSpec};
use crate::error::{KeeperError, LockError, Result};

/// Replaced in mirror arguments by the per-run log file path
pub const LOG_FILE_PLACEHOLDER: &str = "{log_file}";

/// Everything the coordinator needs to run one mirror cycle
#[derive(Debug, Clone)]
pub struct MirrorSettings {
    pub command: String,
    pub args: Vec<String>,
    pub valid_exit_codes: Vec<i32>,

    /// Minimum time between successful runs
    pub interval: TimeDelta,

    pub lock_path: PathBuf,

    /// Bounded lock wait; `None` blocks until the holder finishes
    pub lock_timeout: Option<Duration>,

    pub watermark_path: PathBuf,
    pub log_dir: PathBuf,
    pub log_prefix: String,
}

impl MirrorSettings {
    /// Command line for a run logging to `log_file`
    pub fn command_spec(&self, log_file: &std::path::Path) -> CommandSpec {
        let log_file = log_file.to_string_lossy();
        CommandSpec::new(self.command.as_str())
            .args(
                self.args
                    .iter()
                    .map(|arg| arg.replace(LOG_FILE_PLACEHOLDER, &log_file)),
            )
            .valid_exit_codes(&self.valid_exit_codes)
    }
}

/// Coordinator state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorState {
    Idle,
    Locking,
    Running,
}

/// Result of one coordinator cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorOutcome {
    /// Last success is within the interval; nothing was locked or run
    NotDue { last_success: DateTime<Utc> },

    /// Command exited with a whitelisted code; watermark advanced
    Completed {
        exit_code: Option<i32>,
        log_file: PathBuf,
    },

    /// Command exited with a code outside the whitelist
    Failed {
        exit_code: Option<i32>,
        log_file: PathBuf,
    },

    /// Another run held the lock past the configured wait
    LockTimeout { waited: Duration },
}

impl MirrorOutcome {
    /// Metric label for this outcome
    pub fn label(&self) -> &'static str {
        match self {
            MirrorOutcome::NotDue { .. } => "not_due",
            MirrorOutcome::Completed { .. } => "completed",
            MirrorOutcome::Failed { .. } => "failed",
            MirrorOutcome::LockTimeout { .. } => "lock_timeout",
        }
    }

    /// Whether the mirror command ran successfully this cycle
    pub fn performed(&self) -> bool {
        matches!(self, MirrorOutcome::Completed { .. })
    }

    /// The error to report for a failed run
    pub fn failure(&self, command: &str) -> Option<KeeperError> {
        match self {
            MirrorOutcome::Failed { exit_code, .. } => Some(KeeperError::CommandFailed {
                command: command.to_string(),
                exit_code: *exit_code,
            }),
            _ => None,
        }
    }
}

impl fmt::Display for MirrorOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MirrorOutcome::NotDue { last_success } => {
                write!(f, "not due (last success {})", last_success)
            }
            MirrorOutcome::Completed { exit_code, .. } => {
                write!(f, "completed (exit {:?})", exit_code)
            }
            MirrorOutcome::Failed { exit_code, log_file } => {
                write!(f, "failed (exit {:?}, see {})", exit_code, log_file.display())
            }
            MirrorOutcome::LockTimeout { waited } => {
                write!(f, "lock not acquired after {:?}", waited)
            }
        }
    }
}

/// Resets the coordinator to `Idle` when a cycle ends, however it ends
struct StateReset<'a>(&'a Mutex<MirrorState>);

impl Drop for StateReset<'_> {
    fn drop(&mut self) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = MirrorState::Idle;
    }
}

pub struct MirrorCoordinator {
    settings: MirrorSettings,
    watermark: MirrorWatermark,
    logs: MirrorLogs,
    runner: Arc<dyn CommandRunner>,
    clock: Arc<dyn Clock>,
    state: Mutex<MirrorState>,
}

impl MirrorCoordinator {
    pub fn new(settings: MirrorSettings, runner: Arc<dyn CommandRunner>, clock: Arc<dyn Clock>) -> Self {
        let watermark = MirrorWatermark::new(settings.watermark_path.clone());
        let logs = MirrorLogs::new(settings.log_dir.clone(), settings.log_prefix.clone());
        Self {
            settings,
            watermark,
            logs,
            runner,
            clock,
            state: Mutex::new(MirrorState::Idle),
        }
    }

    pub fn settings(&self) -> &MirrorSettings {
        &self.settings
    }

    pub fn watermark(&self) -> &MirrorWatermark {
        &self.watermark
    }

    pub fn logs(&self) -> &MirrorLogs {
        &self.logs
    }

    pub fn state(&self) -> MirrorState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: MirrorState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Run one coordinator cycle
    ///
    /// A non-whitelisted exit code is reported as [`MirrorOutcome::Failed`],
    /// not as an error. Errors are reserved for a command that could not be
    /// run at all and for lock or watermark I/O failures.
    pub async fn run_cycle(&self) -> Result<MirrorOutcome> {
        let now = self.clock.now();
        if let Some(last_success) = self.watermark.recent_success(self.settings.interval, now) {
            debug!("Mirror not due, last success {}", last_success);
            return Ok(MirrorOutcome::NotDue { last_success });
        }

        let _reset = StateReset(&self.state);
        self.set_state(MirrorState::Locking);

        let lock = match ExclusionLock::acquire(&self.settings.lock_path, self.settings.lock_timeout).await {
            Ok(lock) => lock,
            Err(LockError::Timeout { path, waited }) => {
                warn!(
                    "Mirror lock {} still held after {:?}, skipping cycle",
                    path.display(),
                    waited
                );
                return Ok(MirrorOutcome::LockTimeout { waited });
            }
            Err(e) => return Err(e.into()),
        };

        // A run that held the lock while we waited may have just succeeded.
        let now = self.clock.now();
        if let Some(last_success) = self.watermark.recent_success(self.settings.interval, now) {
            info!("Mirror completed by another run at {}", last_success);
            return Ok(MirrorOutcome::NotDue { last_success });
        }

        self.set_state(MirrorState::Running);
        std::fs::create_dir_all(self.logs.dir())?;
        let log_file = self.logs.path_for(now);
        let spec = self.settings.command_spec(&log_file);

        info!("Starting mirror: {}", spec);
        let report = self.runner.run(&spec).await?;

        let outcome = if spec.accepts(report.exit_code) {
            let finished = self.clock.now();
            self.watermark.mark(finished)?;
            info!("Mirror completed with exit code {:?}", report.exit_code);
            MirrorOutcome::Completed {
                exit_code: report.exit_code,
                log_file,
            }
        } else {
            error!(
                "Mirror failed with exit code {:?}, see {}",
                report.exit_code,
                log_file.display()
            );
            MirrorOutcome::Failed {
                exit_code: report.exit_code,
                log_file,
            }
        };

        drop(lock);
        Ok(outcome)
    }
}

impl fmt::Debug for MirrorCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MirrorCoordinator")
            .field("settings", &self.settings)
            .field("state", &self.state())
            .finish()
    }
}
