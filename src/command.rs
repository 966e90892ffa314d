/*!
 * External command execution
 *
 * Runs helper tools (the mirror command, `fsfreeze`, the `rbd` CLI) and
 * decides success by matching the exit code against a whitelist. Some tools
 * use non-zero codes for conditions that still count as success (rsync
 * returns 24 when source files vanish mid-transfer).
 */

use async_trait::async_trait;
use std::fmt;
use std::io;
use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{error, info};

/// Errors raised before a command produced an exit status
#[derive(Error, Debug)]
pub enum CommandError {
    /// The program could not be started
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// Waiting on the child or reading its output failed
    #[error("I/O error running {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },
}

/// A command line plus the exit codes that count as success
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub valid_exit_codes: Vec<i32>,
}

impl CommandSpec {
    /// New command accepting only exit code 0
    pub fn new<S: Into<String>>(program: S) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            valid_exit_codes: vec![0],
        }
    }

    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn valid_exit_codes(mut self, codes: &[i32]) -> Self {
        self.valid_exit_codes = codes.to_vec();
        self
    }

    /// Whether an exit code (None = killed by signal) counts as success
    pub fn accepts(&self, exit_code: Option<i32>) -> bool {
        exit_code.is_some_and(|code| self.valid_exit_codes.contains(&code))
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Outcome of a command whose output was streamed to the log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandReport {
    pub exit_code: Option<i32>,
    pub success: bool,
}

/// Outcome of a command whose output was captured
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedOutput {
    pub exit_code: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Runs external commands
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion, logging stdout/stderr line by line
    async fn run(&self, spec: &CommandSpec) -> Result<CommandReport, CommandError>;

    /// Run to completion, returning stdout/stderr to the caller
    async fn capture(&self, spec: &CommandSpec) -> Result<CapturedOutput, CommandError>;
}

/// Runs commands as child processes of the daemon
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCommandRunner;

impl SystemCommandRunner {
    pub fn new() -> Self {
        Self
    }
}

async fn stream_lines<R>(program: &str, stream: &str, reader: Option<R>) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return Ok(());
    };

    // File names in mirror output are not guaranteed to be UTF-8.
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            return Ok(());
        }
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end();
        if !line.trim().is_empty() {
            info!("command {} {}: {}", program, stream, line);
        }
    }
}

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandReport, CommandError> {
        info!("Running command {}", spec);

        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CommandError::Spawn {
                program: spec.program.clone(),
                source,
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (out_result, err_result, status) = tokio::join!(
            stream_lines(&spec.program, "stdout", stdout),
            stream_lines(&spec.program, "stderr", stderr),
            child.wait()
        );

        let io_err = |source| CommandError::Io {
            program: spec.program.clone(),
            source,
        };
        out_result.map_err(io_err)?;
        err_result.map_err(io_err)?;
        let status = status.map_err(io_err)?;

        let exit_code = status.code();
        let success = spec.accepts(exit_code);
        if success {
            info!("command {} exited with accepted code {:?}", spec.program, exit_code);
        } else {
            error!("command {} returned an error: {}", spec.program, status);
        }

        Ok(CommandReport { exit_code, success })
    }

    async fn capture(&self, spec: &CommandSpec) -> Result<CapturedOutput, CommandError> {
        let output = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| CommandError::Spawn {
                program: spec.program.clone(),
                source,
            })?;

        let exit_code = output.status.code();
        Ok(CapturedOutput {
            exit_code,
            success: spec.accepts(exit_code),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
