//! Local command execution for build and deploy steps.
//!
//! Commands are argv arrays, no shell interpretation, run with a working
//! directory and judged only by their exit status.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::RwLock;
use tracing::{error, info};

use super::{PipelineError, Result};

/// Runs external build/archive/deploy commands.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run a command to completion. A nonzero exit is an error.
    async fn run(&self, command: &[String], working_dir: &Path) -> Result<()>;
}

/// Executor backed by real child processes.
#[derive(Debug, Default)]
pub struct ProcessExecutor;

impl ProcessExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandExecutor for ProcessExecutor {
    async fn run(&self, command: &[String], working_dir: &Path) -> Result<()> {
        let (executable, args) = command
            .split_first()
            .ok_or(PipelineError::EmptyCommand)?;

        info!(executable = %executable, ?args, working_dir = %working_dir.display(), "Running command");

        let mut cmd = Command::new(executable);
        cmd.args(args)
            .current_dir(working_dir)
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        let status = cmd
            .status()
            .await
            .map_err(|source| PipelineError::CommandSpawn {
                command: command.join(" "),
                source,
            })?;

        if !status.success() {
            error!(command = %command.join(" "), code = ?status.code(), "Command failed");
            return Err(PipelineError::CommandFailed {
                command: command.join(" "),
                code: status.code(),
            });
        }
        Ok(())
    }
}

/// One recorded command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub command: Vec<String>,
    pub working_dir: PathBuf,
}

/// Executor that records invocations instead of spawning processes, with an
/// optional scripted failure. Used by the tests and dry runs.
#[derive(Default)]
pub struct RecordingExecutor {
    invocations: RwLock<Vec<Invocation>>,
    fail_matching: RwLock<Option<String>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail any command whose joined argv contains `needle`.
    pub async fn fail_matching(&self, needle: impl Into<String>) {
        *self.fail_matching.write().await = Some(needle.into());
    }

    pub async fn clear_failures(&self) {
        *self.fail_matching.write().await = None;
    }

    pub async fn invocations(&self) -> Vec<Invocation> {
        self.invocations.read().await.clone()
    }

    pub async fn invocation_count(&self) -> usize {
        self.invocations.read().await.len()
    }
}

#[async_trait]
impl CommandExecutor for RecordingExecutor {
    async fn run(&self, command: &[String], working_dir: &Path) -> Result<()> {
        if command.is_empty() {
            return Err(PipelineError::EmptyCommand);
        }
        self.invocations.write().await.push(Invocation {
            command: command.to_vec(),
            working_dir: working_dir.to_path_buf(),
        });

        let joined = command.join(" ");
        if let Some(needle) = self.fail_matching.read().await.as_deref() {
            if joined.contains(needle) {
                return Err(PipelineError::CommandFailed {
                    command: joined,
                    code: Some(1),
                });
            }
        }
        Ok(())
    }
}
