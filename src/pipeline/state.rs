//! Persisted deploy state: last-applied trigger hash per compute host.
//!
//! The stored hash is what makes pipeline idempotence verifiable: a re-run
//! compares the current source hash against it instead of relying on
//! ambient build state.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::{PipelineError, Result};

/// Interface for deploy state tracking.
///
/// Keyed by compute host name. Upserts on record.
#[async_trait]
pub trait DeployStateStore: Send + Sync {
    /// The trigger hash last applied to `host`, if any.
    async fn last_applied(&self, host: &str) -> Result<Option<String>>;

    /// Record `hash` as applied to `host`.
    async fn record(&self, host: &str, hash: &str) -> Result<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct HostRecord {
    hash: String,
    recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StateFile {
    hosts: HashMap<String, HostRecord>,
}

/// Deploy state persisted as a JSON file.
pub struct FileDeployStateStore {
    path: PathBuf,
}

impl FileDeployStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read(&self) -> Result<StateFile> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => {
                serde_json::from_str(&contents).map_err(|source| PipelineError::StateParse {
                    path: self.path.display().to_string(),
                    source,
                })
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(StateFile::default()),
            Err(source) => Err(PipelineError::Io {
                path: self.path.display().to_string(),
                source,
            }),
        }
    }

    fn write(&self, state: &StateFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| PipelineError::Io {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let contents =
            serde_json::to_string_pretty(state).map_err(|source| PipelineError::StateEncode {
                path: self.path.display().to_string(),
                source,
            })?;
        std::fs::write(&self.path, contents).map_err(|source| PipelineError::Io {
            path: self.path.display().to_string(),
            source,
        })
    }
}

#[async_trait]
impl DeployStateStore for FileDeployStateStore {
    async fn last_applied(&self, host: &str) -> Result<Option<String>> {
        Ok(self.read()?.hosts.get(host).map(|r| r.hash.clone()))
    }

    async fn record(&self, host: &str, hash: &str) -> Result<()> {
        let mut state = self.read()?;
        state.hosts.insert(
            host.to_string(),
            HostRecord {
                hash: hash.to_string(),
                recorded_at: Utc::now(),
            },
        );
        self.write(&state)
    }
}

/// In-memory deploy state for tests.
#[derive(Default)]
pub struct MemoryDeployStateStore {
    records: RwLock<HashMap<String, String>>,
}

impl MemoryDeployStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeployStateStore for MemoryDeployStateStore {
    async fn last_applied(&self, host: &str) -> Result<Option<String>> {
        Ok(self.records.read().await.get(host).cloned())
    }

    async fn record(&self, host: &str, hash: &str) -> Result<()> {
        self.records
            .write()
            .await
            .insert(host.to_string(), hash.to_string());
        Ok(())
    }
}
