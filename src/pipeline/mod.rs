//! Build-package-deploy pipeline for the compute backend.
//!
//! One pipeline instance per compute host. Stages are gated by a trigger
//! value (the source tree's content hash) compared against the persisted
//! last-applied hash: an unchanged tree short-circuits to `Deployed` with
//! zero side effects, and a failed stage neither advances state nor updates
//! the stored hash, so the next run retries from `Idle`.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::BackendConfig;

pub mod exec;
pub mod hash;
pub mod state;

pub use exec::{CommandExecutor, Invocation, ProcessExecutor, RecordingExecutor};
pub use hash::source_hash;
pub use state::{DeployStateStore, FileDeployStateStore, MemoryDeployStateStore};

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors raised by pipeline stages.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Command array cannot be empty")]
    EmptyCommand,

    #[error("Failed to spawn '{command}': {source}")]
    CommandSpawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command '{command}' exited with code {code:?}")]
    CommandFailed { command: String, code: Option<i32> },

    #[error("Failed to walk source tree '{dir}': {source}")]
    Walk {
        dir: String,
        #[source]
        source: walkdir::Error,
    },

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse deploy state '{path}': {source}")]
    StateParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode deploy state '{path}': {source}")]
    StateEncode {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Pipeline stage, `Deployed` being the steady state between trigger
/// changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Building,
    Packaged,
    Deployed,
}

/// The artifact a completed build produced.
#[derive(Debug, Clone)]
pub struct DeploymentArtifact {
    pub content_hash: String,
    pub source_dir: PathBuf,
    pub archive_path: PathBuf,
}

/// What a pipeline run did.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub state: PipelineState,
    pub content_hash: String,
    /// False when the trigger was unchanged and every stage was skipped.
    pub rebuilt: bool,
    pub artifact: Option<DeploymentArtifact>,
}

/// Everything one pipeline run needs to know.
#[derive(Debug, Clone)]
pub struct PipelineSpec {
    pub host: String,
    pub resource_group: String,
    pub source_dir: PathBuf,
    pub artifact_path: PathBuf,
    pub excludes: Vec<String>,
    pub build_command: Vec<String>,
    pub archive_command: Vec<String>,
    pub deploy_command: Vec<String>,
}

impl PipelineSpec {
    pub fn from_backend(
        backend: &BackendConfig,
        host: impl Into<String>,
        resource_group: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            resource_group: resource_group.into(),
            source_dir: PathBuf::from(&backend.source_dir),
            artifact_path: PathBuf::from(&backend.artifact_path),
            excludes: backend.excludes.clone(),
            build_command: backend.build_command.clone(),
            archive_command: backend.archive_command.clone(),
            deploy_command: backend.deploy_command.clone(),
        }
    }

    /// Substitute `{source_dir}`, `{artifact}`, `{resource_group}` and
    /// `{host}` placeholders in a command array.
    fn substitute(&self, command: &[String]) -> Vec<String> {
        command
            .iter()
            .map(|arg| {
                arg.replace("{source_dir}", &self.source_dir.to_string_lossy())
                    .replace("{artifact}", &self.artifact_path.to_string_lossy())
                    .replace("{resource_group}", &self.resource_group)
                    .replace("{host}", &self.host)
            })
            .collect()
    }
}

/// The three-stage state machine driving one host's deployment.
pub struct Pipeline {
    spec: PipelineSpec,
    executor: Arc<dyn CommandExecutor>,
    state_store: Arc<dyn DeployStateStore>,
    state: PipelineState,
}

impl Pipeline {
    pub fn new(
        spec: PipelineSpec,
        executor: Arc<dyn CommandExecutor>,
        state_store: Arc<dyn DeployStateStore>,
    ) -> Self {
        Self {
            spec,
            executor,
            state_store,
            state: PipelineState::Idle,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Drive the pipeline to `Deployed`, or fail without advancing.
    pub async fn run(&mut self) -> Result<PipelineOutcome> {
        let content_hash = hash::source_hash(&self.spec.source_dir, &self.spec.excludes)?;
        let last = self.state_store.last_applied(&self.spec.host).await?;

        if last.as_deref() == Some(content_hash.as_str()) {
            self.state = PipelineState::Deployed;
            info!(
                host = %self.spec.host,
                hash = %content_hash,
                "Source unchanged, skipping build and deploy"
            );
            return Ok(PipelineOutcome {
                state: self.state,
                content_hash,
                rebuilt: false,
                artifact: None,
            });
        }

        self.transition(PipelineState::Building);
        let build = self.spec.substitute(&self.spec.build_command);
        self.executor.run(&build, &self.spec.source_dir).await?;

        let archive = self.spec.substitute(&self.spec.archive_command);
        self.executor.run(&archive, &self.spec.source_dir).await?;
        self.transition(PipelineState::Packaged);

        let deploy = self.spec.substitute(&self.spec.deploy_command);
        self.executor.run(&deploy, &self.spec.source_dir).await?;
        self.transition(PipelineState::Deployed);

        // Only a fully deployed artifact counts as applied.
        self.state_store
            .record(&self.spec.host, &content_hash)
            .await?;

        info!(host = %self.spec.host, hash = %content_hash, "Deployed artifact");
        Ok(PipelineOutcome {
            state: self.state,
            content_hash: content_hash.clone(),
            rebuilt: true,
            artifact: Some(DeploymentArtifact {
                content_hash,
                source_dir: self.spec.source_dir.clone(),
                archive_path: self.spec.artifact_path.clone(),
            }),
        })
    }

    fn transition(&mut self, to: PipelineState) {
        debug!(host = %self.spec.host, from = ?self.state, to = ?to, "Pipeline transition");
        self.state = to;
    }
}
