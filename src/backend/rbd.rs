//! Ceph RBD backend driven through the `rbd` command-line tool
//!
//! Every call shells out with `--id <user> --pool <pool> --format json` and
//! maps the tool's stderr onto the backend error taxonomy.

use super::error::{BackendError, BackendResult};
use super::types::SnapshotInfo;
use super::SnapshotBackend;
use crate::command::{CapturedOutput, CommandRunner, CommandSpec};
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;
use tracing::debug;

const BACKEND_NAME: &str = "rbd";

/// Connection settings for the `rbd` CLI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RbdSettings {
    /// Path or name of the `rbd` binary
    pub binary: String,

    /// Pool holding the images
    pub pool: String,

    /// Ceph client id (without the `client.` prefix)
    pub user: String,
}

impl Default for RbdSettings {
    fn default() -> Self {
        Self {
            binary: "rbd".to_string(),
            pool: "rbd".to_string(),
            user: "admin".to_string(),
        }
    }
}

/// One entry of `rbd snap ls --format json`
#[derive(Debug, Deserialize)]
struct RbdSnapshot {
    name: String,
    #[serde(default, deserialize_with = "flexible_bool")]
    protected: bool,
}

/// `rbd` prints `"protected": "true"` on most releases and a bare bool on some
fn flexible_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum BoolOrString {
        Bool(bool),
        Text(String),
    }

    Ok(match BoolOrString::deserialize(deserializer)? {
        BoolOrString::Bool(b) => b,
        BoolOrString::Text(s) => s.eq_ignore_ascii_case("true"),
    })
}

/// Snapshot backend for Ceph RBD images
pub struct RbdCliBackend {
    settings: RbdSettings,
    runner: Arc<dyn CommandRunner>,
}

impl RbdCliBackend {
    pub fn new(settings: RbdSettings, runner: Arc<dyn CommandRunner>) -> Self {
        Self { settings, runner }
    }

    pub fn settings(&self) -> &RbdSettings {
        &self.settings
    }

    fn image_spec(&self, volume: &str) -> String {
        format!("{}/{}", self.settings.pool, volume)
    }

    fn snap_spec(&self, volume: &str, name: &str) -> String {
        format!("{}/{}@{}", self.settings.pool, volume, name)
    }

    fn command<I, S>(&self, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandSpec::new(self.settings.binary.as_str())
            .args(["--id", self.settings.user.as_str()])
            .args(args)
    }

    async fn invoke(&self, spec: CommandSpec) -> BackendResult<CapturedOutput> {
        debug!("rbd: {}", spec);
        let output = self
            .runner
            .capture(&spec)
            .await
            .map_err(|e| BackendError::unavailable(BACKEND_NAME, e.to_string()))?;
        Ok(output)
    }

    /// Map a failed invocation onto the error taxonomy
    fn classify(volume: &str, snapshot: Option<&str>, output: &CapturedOutput) -> BackendError {
        let stderr = output.stderr.trim();
        let lower = stderr.to_ascii_lowercase();
        let target = match snapshot {
            Some(name) => format!("{}@{}", volume, name),
            None => volume.to_string(),
        };

        if lower.contains("protected") {
            BackendError::protected(volume, snapshot.unwrap_or_default())
        } else if lower.contains("file exists") || lower.contains("already exists") {
            BackendError::already_exists(volume, snapshot.unwrap_or_default())
        } else if lower.contains("no such file") || lower.contains("not found") {
            BackendError::not_found(target)
        } else if lower.contains("connection")
            || lower.contains("timed out")
            || lower.contains("rados")
        {
            BackendError::unavailable(BACKEND_NAME, stderr)
        } else {
            BackendError::Command {
                backend: BACKEND_NAME.to_string(),
                message: format!("{} (exit {:?}): {}", target, output.exit_code, stderr),
            }
        }
    }

    fn parse<'a, T: Deserialize<'a>>(stdout: &'a str) -> BackendResult<T> {
        serde_json::from_str(stdout).map_err(|e| BackendError::Parse {
            backend: BACKEND_NAME.to_string(),
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl SnapshotBackend for RbdCliBackend {
    fn name(&self) -> &str {
        BACKEND_NAME
    }

    async fn ping(&self) -> BackendResult<()> {
        let spec = self.command(["ls", "--pool", self.settings.pool.as_str(), "--format", "json"]);
        let output = self.invoke(spec).await?;
        if !output.success {
            return Err(BackendError::unavailable(BACKEND_NAME, output.stderr.trim()));
        }
        Ok(())
    }

    async fn list_volumes(&self) -> BackendResult<Vec<String>> {
        let spec = self.command(["ls", "--pool", self.settings.pool.as_str(), "--format", "json"]);
        let output = self.invoke(spec).await?;
        if !output.success {
            return Err(BackendError::unavailable(BACKEND_NAME, output.stderr.trim()));
        }
        Self::parse(&output.stdout)
    }

    async fn list_snapshots(&self, volume: &str) -> BackendResult<Vec<SnapshotInfo>> {
        let image = self.image_spec(volume);
        let spec = self.command(["snap", "ls", image.as_str(), "--format", "json"]);
        let output = self.invoke(spec).await?;
        if !output.success {
            return Err(Self::classify(volume, None, &output));
        }

        let snaps: Vec<RbdSnapshot> = Self::parse(&output.stdout)?;
        Ok(snaps
            .into_iter()
            .map(|s| SnapshotInfo {
                name: s.name,
                protected: s.protected,
            })
            .collect())
    }

    async fn create_snapshot(&self, volume: &str, name: &str) -> BackendResult<()> {
        let snap = self.snap_spec(volume, name);
        let output = self.invoke(self.command(["snap", "create", snap.as_str()])).await?;
        if !output.success {
            return Err(Self::classify(volume, Some(name), &output));
        }
        Ok(())
    }

    async fn delete_snapshot(&self, volume: &str, name: &str) -> BackendResult<()> {
        let snap = self.snap_spec(volume, name);
        let output = self.invoke(self.command(["snap", "rm", snap.as_str()])).await?;
        if !output.success {
            return Err(Self::classify(volume, Some(name), &output));
        }
        Ok(())
    }

    async fn is_protected(&self, volume: &str, name: &str) -> BackendResult<bool> {
        self.list_snapshots(volume)
            .await?
            .into_iter()
            .find(|s| s.name == name)
            .map(|s| s.protected)
            .ok_or_else(|| BackendError::not_found(format!("{}@{}", volume, name)))
    }
}
