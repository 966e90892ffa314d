/*!
 * Creation policy
 *
 * A volume is due for a snapshot unless one of its managed snapshots is at
 * most `min_age` old. Creation itself is a separate step that may be wrapped
 * in a filesystem freeze/thaw bracket.
 */

use chrono::{DateTime, TimeDelta, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::{managed_snapshots, ManagedSnapshot, SnapshotGroup};
use crate::backend::{BackendResult, SnapshotBackend, SnapshotRef};
use crate::command::{CommandRunner, CommandSpec};
use crate::error::{KeeperError, Result};
use crate::naming::SnapshotNaming;

/// Decide from already-listed snapshots whether a new one is due
pub fn snapshot_due(managed: &[ManagedSnapshot], min_age: TimeDelta, now: DateTime<Utc>) -> bool {
    !managed.iter().any(|snap| snap.age(now) <= min_age)
}

/// List `volume` and decide whether a new snapshot is due
pub async fn is_snapshot_due(
    backend: &dyn SnapshotBackend,
    volume: &str,
    naming: &SnapshotNaming,
    min_age: TimeDelta,
    now: DateTime<Utc>,
) -> BackendResult<bool> {
    let snapshots = backend.list_snapshots(volume).await?;
    let managed = managed_snapshots(naming, &snapshots);
    Ok(snapshot_due(&managed, min_age, now))
}

/// Freeze/thaw bracket around a single snapshot create
///
/// Runs `fsfreeze -f <mount>` before the create and `fsfreeze -u <mount>`
/// after it, whether or not the create succeeded.
#[derive(Clone)]
pub struct FreezeBracket {
    mount: PathBuf,
    program: String,
    runner: Arc<dyn CommandRunner>,
}

impl FreezeBracket {
    pub fn new<P: Into<PathBuf>>(mount: P, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            mount: mount.into(),
            program: "fsfreeze".to_string(),
            runner,
        }
    }

    /// Use a different freeze tool with the same `-f`/`-u` flags
    pub fn with_program<S: Into<String>>(mut self, program: S) -> Self {
        self.program = program.into();
        self
    }

    pub fn mount(&self) -> &PathBuf {
        &self.mount
    }

    async fn invoke(&self, flag: &str) -> Result<()> {
        let spec = CommandSpec::new(self.program.as_str())
            .arg(flag)
            .arg(self.mount.to_string_lossy());
        let report = self.runner.run(&spec).await?;
        if !report.success {
            return Err(KeeperError::CommandFailed {
                command: spec.to_string(),
                exit_code: report.exit_code,
            });
        }
        Ok(())
    }

    pub async fn freeze(&self) -> Result<()> {
        self.invoke("-f").await
    }

    pub async fn thaw(&self) -> Result<()> {
        self.invoke("-u").await
    }
}

/// Result of one creation attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreationOutcome {
    /// A recent managed snapshot exists
    NotDue,

    /// Snapshot created under this name
    Created(String),

    /// A snapshot with this name already exists (same-minute request)
    Collided(String),
}

impl CreationOutcome {
    /// Number of snapshots this outcome added
    pub fn created_count(&self) -> u64 {
        match self {
            CreationOutcome::Created(_) => 1,
            _ => 0,
        }
    }
}

/// Create one snapshot named `name`, optionally inside a freeze bracket
pub async fn create_snapshot(
    backend: &dyn SnapshotBackend,
    volume: &str,
    name: &str,
    freeze: Option<&FreezeBracket>,
) -> Result<CreationOutcome> {
    let snap_ref = SnapshotRef::new(volume, name);
    info!("Creating snapshot {}", snap_ref);

    if let Some(bracket) = freeze {
        bracket.freeze().await?;
    }

    let created = backend.create_snapshot(volume, name).await;

    if let Some(bracket) = freeze {
        if let Err(e) = bracket.thaw().await {
            error!(
                "Failed to thaw {} after snapshot {}: {}",
                bracket.mount().display(),
                snap_ref,
                e
            );
            return Err(e);
        }
    }

    match created {
        Ok(()) => Ok(CreationOutcome::Created(name.to_string())),
        Err(e) if e.is_already_exists() => {
            warn!("Snapshot {} already exists, skipping", snap_ref);
            Ok(CreationOutcome::Collided(name.to_string()))
        }
        Err(e) => {
            error!("Error creating snapshot {}: {}", snap_ref, e);
            Err(e.into())
        }
    }
}

/// Create a snapshot on `volume` if one is due under the group policy
pub async fn ensure_snapshot(
    backend: &dyn SnapshotBackend,
    volume: &str,
    group: &SnapshotGroup,
    now: DateTime<Utc>,
    freeze: Option<&FreezeBracket>,
) -> Result<CreationOutcome> {
    if !is_snapshot_due(backend, volume, &group.naming, group.policy.min_age, now).await? {
        debug!(
            "Snapshot for {} not due: found one within {}",
            volume,
            super::format_delta(group.policy.min_age)
        );
        return Ok(CreationOutcome::NotDue);
    }

    let name = group.naming.encode(now);
    create_snapshot(backend, volume, &name, freeze).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::command::{CapturedOutput, CommandError, CommandReport};
    use crate::core::RetentionPolicy;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Mutex;

    fn at(d: u32, h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, d, h, m, 0).unwrap()
    }

    fn group(min_age_hours: i64) -> SnapshotGroup {
        SnapshotGroup::new(
            "volumes",
            SnapshotNaming::new("").unwrap(),
            RetentionPolicy {
                min_age: TimeDelta::hours(min_age_hours),
                ..Default::default()
            },
        )
    }

    /// Records every command line; fails those whose flag is listed
    #[derive(Default)]
    struct FreezeRecorder {
        calls: Mutex<Vec<String>>,
        failing_flags: Vec<&'static str>,
    }

    #[async_trait]
    impl CommandRunner for FreezeRecorder {
        async fn run(&self, spec: &CommandSpec) -> std::result::Result<CommandReport, CommandError> {
            self.calls.lock().unwrap().push(spec.to_string());
            let fail = self.failing_flags.iter().any(|f| spec.args[0] == *f);
            Ok(CommandReport {
                exit_code: Some(if fail { 1 } else { 0 }),
                success: !fail,
            })
        }

        async fn capture(&self, _spec: &CommandSpec) -> std::result::Result<CapturedOutput, CommandError> {
            unreachable!()
        }
    }

    #[tokio::test]
    async fn test_no_snapshots_is_due() {
        let backend = MemoryBackend::new();
        backend.add_volume("v1");
        backend.add_snapshot("v1", "hand-made", false);

        let naming = SnapshotNaming::new("").unwrap();
        let due = is_snapshot_due(&backend, "v1", &naming, TimeDelta::hours(5), at(5, 0, 0))
            .await
            .unwrap();
        assert!(due);
    }

    #[tokio::test]
    async fn test_age_boundary() {
        let backend = MemoryBackend::new();
        backend.add_snapshot("v1", "2024-01-05_00:00", false);
        let naming = SnapshotNaming::new("").unwrap();
        let min_age = TimeDelta::hours(5);

        // exactly min_age old: still recent
        assert!(!is_snapshot_due(&backend, "v1", &naming, min_age, at(5, 5, 0)).await.unwrap());
        // one minute past: due
        assert!(is_snapshot_due(&backend, "v1", &naming, min_age, at(5, 5, 1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_most_recent_snapshot_decides() {
        let backend = MemoryBackend::new();
        backend.add_snapshot("v1", "2023-06-01_00:00", false);
        backend.add_snapshot("v1", "2024-01-05_03:00", false);
        let naming = SnapshotNaming::new("").unwrap();

        assert!(!is_snapshot_due(&backend, "v1", &naming, TimeDelta::hours(5), at(5, 4, 0))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_ensure_snapshot_creates_encoded_name() {
        let backend = MemoryBackend::new();
        backend.add_volume("v1");

        let outcome = ensure_snapshot(&backend, "v1", &group(5), at(5, 10, 30), None)
            .await
            .unwrap();
        assert_eq!(outcome, CreationOutcome::Created("2024-01-05_10:30".to_string()));
        assert_eq!(outcome.created_count(), 1);

        let again = ensure_snapshot(&backend, "v1", &group(5), at(5, 11, 0), None)
            .await
            .unwrap();
        assert_eq!(again, CreationOutcome::NotDue);
        assert_eq!(backend.snapshot_names("v1").len(), 1);
    }

    #[tokio::test]
    async fn test_same_minute_collision_is_tolerated() {
        let backend = MemoryBackend::new();
        backend.add_snapshot("v1", "2024-01-05_10:30", false);

        let outcome = create_snapshot(&backend, "v1", "2024-01-05_10:30", None)
            .await
            .unwrap();
        assert_eq!(outcome, CreationOutcome::Collided("2024-01-05_10:30".to_string()));
        assert_eq!(outcome.created_count(), 0);
    }

    #[tokio::test]
    async fn test_freeze_bracket_thaws_after_failed_create() {
        let backend = MemoryBackend::new();
        backend.add_volume("v1");
        backend.fail_volume("v1");

        let recorder = Arc::new(FreezeRecorder::default());
        let bracket = FreezeBracket::new("/backup", recorder.clone());

        let result = create_snapshot(&backend, "v1", "2024-01-05_10:30", Some(&bracket)).await;
        assert!(result.is_err());
        assert_eq!(
            *recorder.calls.lock().unwrap(),
            vec!["fsfreeze -f /backup".to_string(), "fsfreeze -u /backup".to_string()]
        );
    }

    #[tokio::test]
    async fn test_freeze_failure_skips_create() {
        let backend = MemoryBackend::new();
        backend.add_volume("v1");

        let recorder = Arc::new(FreezeRecorder {
            failing_flags: vec!["-f"],
            ..Default::default()
        });
        let bracket = FreezeBracket::new("/backup", recorder.clone());

        let result = create_snapshot(&backend, "v1", "2024-01-05_10:30", Some(&bracket)).await;
        assert!(matches!(result, Err(KeeperError::CommandFailed { .. })));
        assert!(backend.creations().is_empty());
        assert_eq!(recorder.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_listing_failure_propagates() {
        let backend = MemoryBackend::new();
        backend.add_volume("v1");
        backend.fail_volume("v1");

        let result = ensure_snapshot(&backend, "v1", &group(5), at(5, 0, 0), None).await;
        assert!(matches!(result, Err(KeeperError::Backend(_))));
    }
}
