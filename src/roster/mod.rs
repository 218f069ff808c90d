//! Roster records and pre-provisioning validation.
//!
//! The roster arrives pre-parsed (source format handling is the caller's
//! concern); this module owns the record shape and the checks that must pass
//! before any provisioning starts. Input order is load-bearing: it defines
//! the index used to correlate exported keys.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

pub type Result<T> = std::result::Result<T, RosterError>;

/// Errors raised while loading or validating a roster.
#[derive(Debug, thiserror::Error)]
pub enum RosterError {
    #[error("Roster entry {index} has an empty id")]
    EmptyId { index: usize },

    #[error("Roster entry {index} duplicates id '{id}'")]
    DuplicateId { index: usize, id: String },

    #[error("Roster entry {index} ('{id}') has an invalid email: {email}")]
    InvalidEmail {
        index: usize,
        id: String,
        email: String,
    },

    #[error("Failed to read roster file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse roster file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

/// One registered user to be provisioned with gateway access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

impl RosterEntry {
    /// Subscription display name: `"{id}: {first} {last}"`.
    pub fn display_name(&self) -> String {
        format!("{}: {} {}", self.id, self.first_name, self.last_name)
    }
}

/// Validate a roster before provisioning: non-empty unique ids and plausible
/// emails. Fails on the first offending entry, reporting its index.
pub fn validate(roster: &[RosterEntry]) -> Result<()> {
    let mut seen = HashSet::new();
    for (index, entry) in roster.iter().enumerate() {
        if entry.id.trim().is_empty() {
            return Err(RosterError::EmptyId { index });
        }
        if !seen.insert(entry.id.as_str()) {
            return Err(RosterError::DuplicateId {
                index,
                id: entry.id.clone(),
            });
        }
        if !entry.email.contains('@') {
            return Err(RosterError::InvalidEmail {
                index,
                id: entry.id.clone(),
                email: entry.email.clone(),
            });
        }
    }
    Ok(())
}

/// Load a roster from a YAML file, preserving entry order.
pub fn load(path: impl AsRef<Path>) -> Result<Vec<RosterEntry>> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|source| RosterError::Read {
        path: path.display().to_string(),
        source,
    })?;
    serde_yaml::from_str(&contents).map_err(|source| RosterError::Parse {
        path: path.display().to_string(),
        source,
    })
}
