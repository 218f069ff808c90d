//! In-memory provider implementation.
//!
//! Backs the `memory` provider type: dry runs and tests. Attributes and
//! secrets are generated on first apply and kept stable across re-applies,
//! so convergence is observable.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::graph::{AttrValue, ResolvedSpec, ResourceKind};
use crate::output::Secret;

use super::{
    Identity, IdentitySpec, IdentityState, ProviderError, Realized, ResourceProvider, Result,
    Subscription, SubscriptionSpec, SubscriptionState,
};

/// In-memory idempotent provider.
#[derive(Default)]
pub struct MemoryProvider {
    resources: RwLock<HashMap<String, Realized>>,
    identities: RwLock<HashMap<String, Identity>>,
    subscriptions: RwLock<HashMap<(String, String), Subscription>>,
    /// Resource names in apply order, one entry per apply call.
    applied: RwLock<Vec<String>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resource names in the order `apply` was called, including re-applies.
    pub async fn applied(&self) -> Vec<String> {
        self.applied.read().await.clone()
    }

    pub async fn identity(&self, user_id: &str) -> Option<Identity> {
        self.identities.read().await.get(user_id).cloned()
    }

    pub async fn identity_count(&self) -> usize {
        self.identities.read().await.len()
    }

    pub async fn subscription(&self, owner: &str, api_ref: &str) -> Option<Subscription> {
        self.subscriptions
            .read()
            .await
            .get(&(owner.to_string(), api_ref.to_string()))
            .cloned()
    }

    /// Pre-seed an identity, e.g. to simulate a conflicting pre-existing
    /// user in tests.
    pub async fn seed_identity(&self, identity: Identity) {
        self.identities
            .write()
            .await
            .insert(identity.user_id.clone(), identity);
    }

    fn generated_attributes(spec: &ResolvedSpec) -> HashMap<String, AttrValue> {
        let mut attrs: HashMap<String, AttrValue> =
            spec.properties.clone().into_iter().collect();
        attrs.insert("name".to_string(), AttrValue::Plain(spec.name.clone()));

        let lower = spec.name.to_lowercase();
        match spec.kind {
            ResourceKind::StorageAccount => {
                let key = Secret::new(format!("sak-{}", Uuid::new_v4().simple()));
                let connection = Secret::new(format!(
                    "DefaultEndpointsProtocol=https;AccountName={};AccountKey={}",
                    lower,
                    key.expose()
                ));
                attrs.insert("primary_access_key".to_string(), AttrValue::Secret(key));
                attrs.insert(
                    "primary_connection_string".to_string(),
                    AttrValue::Secret(connection),
                );
            }
            ResourceKind::Insights => {
                attrs.insert(
                    "instrumentation_key".to_string(),
                    AttrValue::Secret(Secret::new(Uuid::new_v4().to_string())),
                );
            }
            ResourceKind::ServicePlan => {
                attrs.insert(
                    "id".to_string(),
                    AttrValue::Plain(format!("/serviceplans/{lower}")),
                );
            }
            ResourceKind::FunctionHost => {
                attrs.insert(
                    "default_hostname".to_string(),
                    AttrValue::Plain(format!("{lower}.functions.example.com")),
                );
                attrs.insert(
                    "default_host_key".to_string(),
                    AttrValue::Secret(Secret::new(format!("fhk-{}", Uuid::new_v4().simple()))),
                );
            }
            ResourceKind::Gateway => {
                attrs.insert(
                    "gateway_url".to_string(),
                    AttrValue::Plain(format!("https://{lower}.gateway.example.com")),
                );
            }
            _ => {}
        }
        attrs
    }
}

#[async_trait]
impl ResourceProvider for MemoryProvider {
    async fn apply(&self, spec: &ResolvedSpec) -> Result<Realized> {
        self.applied.write().await.push(spec.name.clone());

        let mut resources = self.resources.write().await;
        if let Some(existing) = resources.get_mut(&spec.name) {
            // Converge: refresh declared properties, keep generated
            // attributes (hostnames, keys) stable.
            for (key, value) in &spec.properties {
                existing.attributes.insert(key.clone(), value.clone());
            }
            debug!(resource = %spec.name, "Converged existing resource");
            return Ok(existing.clone());
        }

        let realized = Realized {
            name: spec.name.clone(),
            kind: spec.kind,
            attributes: Self::generated_attributes(spec),
        };
        info!(resource = %spec.name, kind = ?spec.kind, "Created resource");
        resources.insert(spec.name.clone(), realized.clone());
        Ok(realized)
    }

    async fn create_identity(&self, spec: &IdentitySpec) -> Result<Identity> {
        let mut identities = self.identities.write().await;
        if let Some(existing) = identities.get(&spec.user_id) {
            if existing.display_name == spec.display_name && existing.email == spec.email {
                debug!(user_id = %spec.user_id, "Converged existing identity");
                return Ok(existing.clone());
            }
            return Err(ProviderError::IdentityConflict {
                user_id: spec.user_id.clone(),
            });
        }

        let identity = Identity {
            user_id: spec.user_id.clone(),
            display_name: spec.display_name.clone(),
            email: spec.email.clone(),
            state: IdentityState::Active,
        };
        info!(user_id = %spec.user_id, "Created identity");
        identities.insert(spec.user_id.clone(), identity.clone());
        Ok(identity)
    }

    async fn create_subscription(&self, spec: &SubscriptionSpec) -> Result<Subscription> {
        let identities = self.identities.read().await;
        if !identities.contains_key(&spec.owner) {
            return Err(ProviderError::Rejected {
                name: spec.display_name.clone(),
                message: format!("owner identity '{}' does not exist", spec.owner),
            });
        }
        drop(identities);

        let key = (spec.owner.clone(), spec.api_ref.clone());
        let mut subscriptions = self.subscriptions.write().await;
        if let Some(existing) = subscriptions.get(&key) {
            debug!(owner = %spec.owner, api = %spec.api_ref, "Converged existing subscription");
            return Ok(existing.clone());
        }

        let subscription = Subscription {
            subscription_id: Uuid::new_v4().to_string(),
            owner: spec.owner.clone(),
            api_ref: spec.api_ref.clone(),
            display_name: spec.display_name.clone(),
            state: SubscriptionState::Active,
            secret_key: Secret::new(format!("sub-{}", Uuid::new_v4().simple())),
        };
        info!(owner = %spec.owner, api = %spec.api_ref, "Created subscription");
        subscriptions.insert(key, subscription.clone());
        Ok(subscription)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn spec(name: &str, kind: ResourceKind) -> ResolvedSpec {
        ResolvedSpec {
            name: name.to_string(),
            kind,
            properties: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_apply_generates_stable_attributes() {
        let provider = MemoryProvider::new();
        let host = spec("MyHost", ResourceKind::FunctionHost);

        let first = provider.apply(&host).await.unwrap();
        let second = provider.apply(&host).await.unwrap();

        assert_eq!(
            first.plain("default_hostname"),
            Some("myhost.functions.example.com")
        );
        assert_eq!(
            first.secret("default_host_key").unwrap().expose(),
            second.secret("default_host_key").unwrap().expose()
        );
        assert_eq!(provider.applied().await, vec!["MyHost", "MyHost"]);
    }

    #[tokio::test]
    async fn test_identity_converges_on_identical_spec() {
        let provider = MemoryProvider::new();
        let spec = IdentitySpec {
            user_id: "u1".to_string(),
            display_name: "u1: A B".to_string(),
            email: "a@x.com".to_string(),
        };

        let first = provider.create_identity(&spec).await.unwrap();
        let second = provider.create_identity(&spec).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(provider.identity_count().await, 1);
    }

    #[tokio::test]
    async fn test_identity_conflict_on_different_spec() {
        let provider = MemoryProvider::new();
        provider
            .create_identity(&IdentitySpec {
                user_id: "u1".to_string(),
                display_name: "u1: A B".to_string(),
                email: "a@x.com".to_string(),
            })
            .await
            .unwrap();

        let result = provider
            .create_identity(&IdentitySpec {
                user_id: "u1".to_string(),
                display_name: "u1: C D".to_string(),
                email: "c@x.com".to_string(),
            })
            .await;
        assert!(matches!(
            result,
            Err(ProviderError::IdentityConflict { user_id }) if user_id == "u1"
        ));
    }

    #[tokio::test]
    async fn test_subscription_requires_owner_and_keeps_secret() {
        let provider = MemoryProvider::new();
        let sub_spec = SubscriptionSpec {
            owner: "u1".to_string(),
            api_ref: "api".to_string(),
            display_name: "u1: A B".to_string(),
        };

        assert!(matches!(
            provider.create_subscription(&sub_spec).await,
            Err(ProviderError::Rejected { .. })
        ));

        provider
            .create_identity(&IdentitySpec {
                user_id: "u1".to_string(),
                display_name: "u1: A B".to_string(),
                email: "a@x.com".to_string(),
            })
            .await
            .unwrap();

        let first = provider.create_subscription(&sub_spec).await.unwrap();
        let second = provider.create_subscription(&sub_spec).await.unwrap();
        assert_eq!(
            first.secret_key.expose(),
            second.secret_key.expose()
        );
        assert_eq!(first.subscription_id, second.subscription_id);
    }
}
