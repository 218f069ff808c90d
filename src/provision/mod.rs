//! Batch user provisioning.
//!
//! Walks the roster in input order and creates, per entry, one gateway
//! identity and one subscription, exporting the subscription's secret key
//! under a position-derived name. The position is the correlation contract
//! with downstream key distribution: index i always maps to roster row i,
//! starting at 0, and a failure halts the loop rather than skipping an
//! index.

use std::sync::Arc;

use tracing::{info, warn};

use crate::output::{Outputs, Secret};
use crate::provider::{IdentitySpec, ProviderError, ResourceProvider, SubscriptionSpec};
use crate::roster::RosterEntry;

pub type Result<T> = std::result::Result<T, ProvisionError>;

/// Errors raised by the batch provisioning loop.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("Provisioning failed at roster index {index} (user '{user_id}')")]
    Entry {
        index: usize,
        user_id: String,
        #[source]
        source: ProviderError,
    },
}

impl ProvisionError {
    /// The roster index the run halted at.
    pub fn index(&self) -> usize {
        match self {
            Self::Entry { index, .. } => *index,
        }
    }
}

/// The exported output name for roster position `index`.
///
/// This is the positional coupling external consumers depend on; changing
/// the prefix or the starting index breaks every existing key mapping.
pub fn subscription_key_name(index: usize) -> String {
    format!("SubscriptionKey_{index}")
}

/// One provisioned subscription key, tied to its roster position.
#[derive(Debug, Clone)]
pub struct SubscriptionKeyOutput {
    pub index: usize,
    pub user_id: String,
    pub secret: Secret,
}

/// Provisions the whole roster against one API surface.
pub struct BatchProvisioner {
    provider: Arc<dyn ResourceProvider>,
}

impl BatchProvisioner {
    pub fn new(provider: Arc<dyn ResourceProvider>) -> Self {
        Self { provider }
    }

    /// Create an identity and subscription for every roster entry, in input
    /// order. Returns exactly one key per entry, indexed by position.
    ///
    /// Fail-fast: on the first provider rejection the loop stops, earlier
    /// entries stay provisioned, and the error names the failing index.
    pub async fn provision_all(
        &self,
        roster: &[RosterEntry],
        api_ref: &str,
    ) -> Result<Vec<SubscriptionKeyOutput>> {
        let mut keys = Vec::with_capacity(roster.len());

        for (index, entry) in roster.iter().enumerate() {
            let identity = self
                .provider
                .create_identity(&IdentitySpec {
                    user_id: entry.id.clone(),
                    display_name: entry.display_name(),
                    email: entry.email.clone(),
                })
                .await
                .map_err(|source| entry_error(index, entry, source))?;

            let subscription = self
                .provider
                .create_subscription(&SubscriptionSpec {
                    owner: identity.user_id.clone(),
                    api_ref: api_ref.to_string(),
                    display_name: entry.display_name(),
                })
                .await
                .map_err(|source| entry_error(index, entry, source))?;

            info!(index, user_id = %entry.id, "Provisioned subscription");
            keys.push(SubscriptionKeyOutput {
                index,
                user_id: entry.id.clone(),
                secret: subscription.secret_key,
            });
        }

        info!(count = keys.len(), api = %api_ref, "Batch provisioning complete");
        Ok(keys)
    }
}

fn entry_error(index: usize, entry: &RosterEntry, source: ProviderError) -> ProvisionError {
    warn!(index, user_id = %entry.id, error = %source, "Provisioning halted");
    ProvisionError::Entry {
        index,
        user_id: entry.id.clone(),
        source,
    }
}

/// Export provisioned keys as sensitive outputs under their positional
/// names.
pub fn export_subscription_keys(outputs: &mut Outputs, keys: &[SubscriptionKeyOutput]) {
    for key in keys {
        outputs.insert_sensitive(subscription_key_name(key.index), key.secret.clone());
    }
}
