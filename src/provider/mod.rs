//! Resource provider boundary.
//!
//! The engine supplies ordering and specs; an external provider realizes
//! them with create-or-update semantics keyed by resource name. Re-applying
//! an unchanged spec against existing infrastructure converges rather than
//! duplicating.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::error;

use crate::config::Config;
use crate::graph::{AttrValue, ResolvedSpec, ResourceKind};
use crate::output::Secret;

pub mod memory;

pub use memory::MemoryProvider;

pub type Result<T> = std::result::Result<T, ProviderError>;

/// Errors surfaced by the resource provider.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Provider rejected resource '{name}': {message}")]
    Rejected { name: String, message: String },

    #[error("Identity '{user_id}' already exists with different attributes")]
    IdentityConflict { user_id: String },

    #[error("Resource '{name}' is missing required property '{property}'")]
    MissingProperty { name: String, property: String },

    #[error("Unknown provider type: {0}")]
    UnknownProvider(String),
}

/// A realized resource: its provider-assigned attributes, plain and secret.
#[derive(Debug, Clone)]
pub struct Realized {
    pub name: String,
    pub kind: ResourceKind,
    pub attributes: HashMap<String, AttrValue>,
}

impl Realized {
    pub fn attr(&self, name: &str) -> Option<&AttrValue> {
        self.attributes.get(name)
    }

    pub fn plain(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(AttrValue::as_plain)
    }

    pub fn secret(&self, name: &str) -> Option<&Secret> {
        self.attributes.get(name).and_then(AttrValue::as_secret)
    }
}

/// Lifecycle state of a gateway identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityState {
    Active,
    Blocked,
    Deleted,
}

/// A gateway identity, one-to-one with a roster entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub display_name: String,
    pub email: String,
    pub state: IdentityState,
}

/// Request to create (or converge on) an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentitySpec {
    pub user_id: String,
    pub display_name: String,
    pub email: String,
}

/// Lifecycle state of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Active,
    Suspended,
    Cancelled,
}

/// A per-user credential scoping access to one API surface.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub subscription_id: String,
    pub owner: String,
    pub api_ref: String,
    pub display_name: String,
    pub state: SubscriptionState,
    pub secret_key: Secret,
}

/// Request to create (or converge on) a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSpec {
    pub owner: String,
    pub api_ref: String,
    pub display_name: String,
}

/// Idempotent resource provisioning provider.
///
/// Every operation is keyed by a stable identifier (resource name, user id,
/// owner/api pair) so that re-application converges. The provider owns any
/// parallelization of independent work; the engine only guarantees that
/// calls arrive in dependency order.
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// Create or update a resource, returning its realized attributes.
    async fn apply(&self, spec: &ResolvedSpec) -> Result<Realized>;

    /// Create a gateway identity, converging if an identical one exists.
    async fn create_identity(&self, spec: &IdentitySpec) -> Result<Identity>;

    /// Create a subscription owned by an identity, bound to an API surface.
    /// Converges (keeping the existing secret) if one already exists for the
    /// same owner and API.
    async fn create_subscription(&self, spec: &SubscriptionSpec) -> Result<Subscription>;
}

/// Initialize a provider from configuration.
pub fn init_provider(config: &Config) -> Result<Arc<dyn ResourceProvider>> {
    match config.provider.as_str() {
        "memory" => Ok(Arc::new(MemoryProvider::new())),
        other => {
            error!(provider = %other, "Unknown provider type");
            Err(ProviderError::UnknownProvider(other.to_string()))
        }
    }
}
