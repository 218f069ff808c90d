//! Whole-stack orchestration tests.
//!
//! Runs the full deployment against the in-memory provider, the recording
//! executor, and an in-memory deploy state store, exercising ordering,
//! pipeline idempotence, policy attachment, and batch provisioning
//! end to end.

use std::path::Path;
use std::sync::Arc;

use gantry::config::{BackendConfig, Config};
use gantry::output::{OutputValue, SENSITIVE_MARKER};
use gantry::pipeline::{MemoryDeployStateStore, RecordingExecutor};
use gantry::provider::{Identity, IdentityState, MemoryProvider};
use gantry::provision::subscription_key_name;
use gantry::roster::RosterEntry;
use gantry::stack::{Stack, StackError, GATEWAY_URL_OUTPUT};

// ============================================================================
// Fixtures
// ============================================================================

struct Harness {
    provider: Arc<MemoryProvider>,
    executor: Arc<RecordingExecutor>,
    state_store: Arc<MemoryDeployStateStore>,
    config: Config,
}

impl Harness {
    fn new(source_dir: &Path) -> Self {
        let config = Config {
            backend: BackendConfig {
                source_dir: source_dir.to_string_lossy().into_owned(),
                ..BackendConfig::default()
            },
            ..Config::for_test()
        };
        Self {
            provider: Arc::new(MemoryProvider::new()),
            executor: Arc::new(RecordingExecutor::new()),
            state_store: Arc::new(MemoryDeployStateStore::new()),
            config,
        }
    }

    fn stack(&self) -> Stack {
        Stack::new(
            self.config.clone(),
            self.provider.clone(),
            self.executor.clone(),
            self.state_store.clone(),
        )
    }
}

fn entry(id: &str, first: &str, last: &str) -> RosterEntry {
    RosterEntry {
        id: id.to_string(),
        first_name: first.to_string(),
        last_name: last.to_string(),
        email: format!("{id}@example.edu"),
    }
}

fn backend_source(dir: &Path) {
    std::fs::write(dir.join("handler.py"), "def main(req):\n    return 'ok'\n").unwrap();
    std::fs::write(dir.join("requirements.txt"), "requests\n").unwrap();
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn full_run_provisions_every_resource_in_order() {
    let dir = tempfile::tempdir().unwrap();
    backend_source(dir.path());
    let harness = Harness::new(dir.path());

    let roster = vec![entry("u1", "Ada", "Lovelace"), entry("u2", "Alan", "Turing")];
    let outcome = harness.stack().run(&roster).await.unwrap();

    // Every declared resource shows up exactly once, dependencies first.
    assert_eq!(outcome.order.len(), 12);
    let position = |name: &str| {
        outcome
            .order
            .iter()
            .position(|n| n == name)
            .unwrap_or_else(|| panic!("{name} missing from {:?}", outcome.order))
    };
    assert!(position("TestResourceGroup") < position("testassign"));
    assert!(position("testassign") < position("Test-assignFunctionApp"));
    assert!(position("Test-assignFunctionApp") < position("Test-assign-Deployment"));
    assert!(position("Test-assign-Deployment") < position("Test-assign-Backend"));
    assert!(position("Test-assign-Backend") < position("TestApi-policy"));

    // Build, archive, deploy ran exactly once.
    assert!(outcome.rebuilt);
    assert_eq!(harness.executor.invocation_count().await, 3);

    // The provider saw every non-deployment resource.
    let applied = harness.provider.applied().await;
    assert_eq!(applied.len(), 11);
    assert!(!applied.contains(&"Test-assign-Deployment".to_string()));
}

#[tokio::test]
async fn outputs_contain_gateway_url_and_indexed_keys() {
    let dir = tempfile::tempdir().unwrap();
    backend_source(dir.path());
    let harness = Harness::new(dir.path());

    let roster = vec![
        entry("u1", "Ada", "Lovelace"),
        entry("u2", "Alan", "Turing"),
        entry("u3", "Grace", "Hopper"),
    ];
    let outcome = harness.stack().run(&roster).await.unwrap();

    let url = match outcome.outputs.get(GATEWAY_URL_OUTPUT) {
        Some(OutputValue::Plain(url)) => url.clone(),
        other => panic!("unexpected gateway url output: {other:?}"),
    };
    assert!(url.starts_with("https://"));

    assert_eq!(outcome.keys.len(), 3);
    for (i, key) in outcome.keys.iter().enumerate() {
        assert_eq!(key.index, i);
        assert_eq!(key.user_id, roster[i].id);
        let output = outcome
            .outputs
            .get(&subscription_key_name(i))
            .unwrap_or_else(|| panic!("missing key output {i}"));
        assert!(output.is_sensitive());
    }

    // The listing never shows key material.
    for (name, shown) in outcome.outputs.listing() {
        if name.starts_with("SubscriptionKey_") {
            assert_eq!(shown, SENSITIVE_MARKER);
        }
    }
}

#[tokio::test]
async fn single_user_scenario_matches_contract() {
    let dir = tempfile::tempdir().unwrap();
    backend_source(dir.path());
    let harness = Harness::new(dir.path());

    let roster = vec![RosterEntry {
        id: "u1".to_string(),
        first_name: "A".to_string(),
        last_name: "B".to_string(),
        email: "a@x.com".to_string(),
    }];
    let outcome = harness.stack().run(&roster).await.unwrap();

    let identity = harness.provider.identity("u1").await.unwrap();
    assert_eq!(identity.display_name, "u1: A B");
    assert_eq!(identity.email, "a@x.com");

    let subscription = harness.provider.subscription("u1", "TestApi").await.unwrap();
    assert_eq!(subscription.display_name, "u1: A B");

    assert_eq!(outcome.keys.len(), 1);
    assert!(outcome.outputs.get("SubscriptionKey_0").is_some());
    assert!(outcome.outputs.get("SubscriptionKey_1").is_none());
}

#[tokio::test]
async fn empty_roster_provisions_infrastructure_only() {
    let dir = tempfile::tempdir().unwrap();
    backend_source(dir.path());
    let harness = Harness::new(dir.path());

    let outcome = harness.stack().run(&[]).await.unwrap();
    assert!(outcome.keys.is_empty());
    assert_eq!(outcome.outputs.len(), 1);
    assert!(outcome.outputs.get(GATEWAY_URL_OUTPUT).is_some());
    assert_eq!(harness.provider.identity_count().await, 0);
}

#[tokio::test]
async fn rerun_with_unchanged_source_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    backend_source(dir.path());
    let harness = Harness::new(dir.path());
    let roster = vec![entry("u1", "Ada", "Lovelace")];

    let first = harness.stack().run(&roster).await.unwrap();
    assert!(first.rebuilt);
    assert_eq!(harness.executor.invocation_count().await, 3);

    let second = harness.stack().run(&roster).await.unwrap();
    assert!(!second.rebuilt);
    // Zero new build/deploy side effects.
    assert_eq!(harness.executor.invocation_count().await, 3);

    // Subscriptions converged: same key material, same outputs.
    assert_eq!(
        first.keys[0].secret.expose(),
        second.keys[0].secret.expose()
    );
}

#[tokio::test]
async fn source_change_causes_exactly_one_rebuild() {
    let dir = tempfile::tempdir().unwrap();
    backend_source(dir.path());
    let harness = Harness::new(dir.path());
    let roster = vec![entry("u1", "Ada", "Lovelace")];

    harness.stack().run(&roster).await.unwrap();
    std::fs::write(dir.path().join("handler.py"), "def main(req):\n    return 'v2'\n").unwrap();

    let second = harness.stack().run(&roster).await.unwrap();
    assert!(second.rebuilt);
    assert_eq!(harness.executor.invocation_count().await, 6);

    let third = harness.stack().run(&roster).await.unwrap();
    assert!(!third.rebuilt);
    assert_eq!(harness.executor.invocation_count().await, 6);
}

#[tokio::test]
async fn build_failure_leaves_pipeline_retryable() {
    let dir = tempfile::tempdir().unwrap();
    backend_source(dir.path());
    let harness = Harness::new(dir.path());
    harness.executor.fail_matching("pip").await;
    let roster = vec![entry("u1", "Ada", "Lovelace")];

    let err = harness.stack().run(&roster).await.unwrap_err();
    assert!(matches!(err, StackError::Pipeline(_)));
    // No user was provisioned past the failed deployment.
    assert_eq!(harness.provider.identity_count().await, 0);

    // Cleared failure: the retry rebuilds from scratch and completes.
    harness.executor.clear_failures().await;
    let outcome = harness.stack().run(&roster).await.unwrap();
    assert!(outcome.rebuilt);
    assert_eq!(harness.provider.identity_count().await, 1);
}

#[tokio::test]
async fn provisioning_failure_mid_roster_reports_index_and_halts() {
    let dir = tempfile::tempdir().unwrap();
    backend_source(dir.path());
    let harness = Harness::new(dir.path());

    // A pre-existing identity with different attributes makes index 2
    // conflict.
    harness
        .provider
        .seed_identity(Identity {
            user_id: "u3".to_string(),
            display_name: "someone else entirely".to_string(),
            email: "other@example.edu".to_string(),
            state: IdentityState::Active,
        })
        .await;

    let roster = vec![
        entry("u1", "Ada", "Lovelace"),
        entry("u2", "Alan", "Turing"),
        entry("u3", "Grace", "Hopper"),
        entry("u4", "Edsger", "Dijkstra"),
        entry("u5", "Barbara", "Liskov"),
    ];
    let err = harness.stack().run(&roster).await.unwrap_err();
    match err {
        StackError::Provision(provision_err) => assert_eq!(provision_err.index(), 2),
        other => panic!("expected provisioning error, got {other}"),
    }

    // Indices 0 and 1 remain provisioned; 3 and 4 were never attempted.
    assert!(harness.provider.identity("u1").await.is_some());
    assert!(harness.provider.identity("u2").await.is_some());
    assert!(harness.provider.identity("u4").await.is_none());
    assert!(harness.provider.identity("u5").await.is_none());
}

#[tokio::test]
async fn duplicate_roster_ids_fail_before_any_provisioning() {
    let dir = tempfile::tempdir().unwrap();
    backend_source(dir.path());
    let harness = Harness::new(dir.path());

    let roster = vec![entry("u1", "Ada", "Lovelace"), entry("u1", "Alan", "Turing")];
    let err = harness.stack().run(&roster).await.unwrap_err();
    assert!(matches!(err, StackError::Roster(_)));

    // Fatal before provisioning: nothing was created at all.
    assert!(harness.provider.applied().await.is_empty());
    assert_eq!(harness.executor.invocation_count().await, 0);
}
