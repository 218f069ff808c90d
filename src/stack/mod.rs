//! The serverless API-gateway stack.
//!
//! Declares the full resource set on the graph (storage, observability,
//! compute host, gateway, API, backend binding), realizes it in dependency
//! order through the provider, drives the backend pipeline, attaches the
//! inbound policy, and provisions the roster. The one non-provider node is
//! the deployment itself, realized by the pipeline state machine.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::{Config, ConfigError};
use crate::graph::{
    AttrValue, GraphError, ResourceGraph, ResourceHandle, ResourceKind, ResourceSpec,
};
use crate::output::Outputs;
use crate::pipeline::{
    CommandExecutor, DeployStateStore, Pipeline, PipelineError, PipelineSpec,
};
use crate::policy::{PolicyDocument, PolicyError};
use crate::provider::{ProviderError, Realized, ResourceProvider};
use crate::provision::{
    export_subscription_keys, BatchProvisioner, ProvisionError, SubscriptionKeyOutput,
};
use crate::roster::{RosterEntry, RosterError};

pub type Result<T> = std::result::Result<T, StackError>;

/// Output name of the gateway base URL.
pub const GATEWAY_URL_OUTPUT: &str = "ApiManagementUrl";

/// Identity headers injected ahead of rate limiting, evaluated by the
/// gateway against the authenticated principal.
const IDENTITY_HEADERS: [(&str, &str); 2] = [
    ("X-User-Id", "@(context.User.Id)"),
    ("X-User-Email", "@(context.User.Email)"),
];

/// Errors from a whole-stack run.
#[derive(Debug, thiserror::Error)]
pub enum StackError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Roster(#[from] RosterError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error("Realized resource '{resource}' did not expose attribute '{attr}'")]
    MissingAttribute { resource: String, attr: String },
}

/// What a completed run produced.
#[derive(Debug)]
pub struct StackOutcome {
    /// Gateway URL plus one sensitive subscription key per roster position.
    pub outputs: Outputs,
    /// Provisioned keys in roster order.
    pub keys: Vec<SubscriptionKeyOutput>,
    /// Resource names in realization order.
    pub order: Vec<String>,
    /// Whether the backend was rebuilt and redeployed this run.
    pub rebuilt: bool,
}

/// Handles of the declared resources, for dispatch during realization.
struct StackGraph {
    graph: ResourceGraph,
    api: ResourceHandle,
    gateway: ResourceHandle,
}

/// Orchestrates one deployment run.
pub struct Stack {
    config: Config,
    provider: Arc<dyn ResourceProvider>,
    executor: Arc<dyn CommandExecutor>,
    state_store: Arc<dyn DeployStateStore>,
}

impl Stack {
    pub fn new(
        config: Config,
        provider: Arc<dyn ResourceProvider>,
        executor: Arc<dyn CommandExecutor>,
        state_store: Arc<dyn DeployStateStore>,
    ) -> Self {
        Self {
            config,
            provider,
            executor,
            state_store,
        }
    }

    /// Realization order without side effects, for inspection.
    pub fn plan(&self) -> Result<Vec<String>> {
        let declared = self.declare()?;
        let order = declared.graph.realization_order()?;
        order
            .into_iter()
            .map(|handle| Ok(declared.graph.spec(handle)?.name.clone()))
            .collect()
    }

    /// Validate, realize every resource in dependency order, and provision
    /// the roster. Re-running against existing infrastructure converges.
    pub async fn run(&self, roster: &[RosterEntry]) -> Result<StackOutcome> {
        self.config.validate()?;
        crate::roster::validate(roster)?;

        let declared = self.declare()?;
        let order = declared.graph.realization_order()?;
        info!(resources = order.len(), users = roster.len(), "Starting deployment run");

        let mut realized: HashMap<ResourceHandle, Realized> = HashMap::new();
        let mut order_names = Vec::with_capacity(order.len());
        let mut rebuilt = false;

        for handle in order {
            let spec = declared.graph.spec(handle)?;
            let resolved = spec.resolve(|target, attr| {
                realized.get(&target).and_then(|r| r.attr(attr)).cloned()
            })?;
            order_names.push(resolved.name.clone());

            let result = if resolved.kind == ResourceKind::Deployment {
                rebuilt = self.run_pipeline(&resolved).await?;
                let mut attributes: HashMap<String, AttrValue> =
                    resolved.properties.clone().into_iter().collect();
                attributes.insert("name".to_string(), AttrValue::Plain(resolved.name.clone()));
                Realized {
                    name: resolved.name.clone(),
                    kind: resolved.kind,
                    attributes,
                }
            } else {
                self.provider.apply(&resolved).await?
            };

            debug!(resource = %result.name, kind = ?result.kind, "Realized");
            realized.insert(handle, result);
        }

        let mut outputs = Outputs::new();
        let gateway_name = declared.graph.spec(declared.gateway)?.name.clone();
        let gateway_url = realized
            .get(&declared.gateway)
            .and_then(|r| r.plain("gateway_url"))
            .ok_or_else(|| StackError::MissingAttribute {
                resource: gateway_name,
                attr: "gateway_url".to_string(),
            })?;
        outputs.insert(GATEWAY_URL_OUTPUT, gateway_url);

        let api_name = declared.graph.spec(declared.api)?.name.clone();
        let provisioner = BatchProvisioner::new(self.provider.clone());
        let keys = provisioner.provision_all(roster, &api_name).await?;
        export_subscription_keys(&mut outputs, &keys);

        info!(
            outputs = outputs.len(),
            rebuilt, "Deployment run complete"
        );
        Ok(StackOutcome {
            outputs,
            keys,
            order: order_names,
            rebuilt,
        })
    }

    /// Declare the full resource set, mirroring the managed deployment's
    /// shape: names derive from the configured prefix and environment, and
    /// every ordering constraint is an edge.
    fn declare(&self) -> Result<StackGraph> {
        let config = &self.config;
        let prefix = &config.prefix;
        let environment = &config.environment;
        let mut graph = ResourceGraph::new();

        let group = graph.declare(
            ResourceSpec::new(
                format!("{prefix}ResourceGroup"),
                ResourceKind::ResourceGroup,
            )
            .with("location", config.region.as_str()),
        )?;

        let storage = graph.declare(
            ResourceSpec::new(
                format!("{prefix}{environment}").to_lowercase(),
                ResourceKind::StorageAccount,
            )
            .with("location", group.attr("location"))
            .with("resource_group", group.attr("name"))
            .with("account_tier", "Standard")
            .with("replication_type", "LRS"),
        )?;

        graph.declare(
            ResourceSpec::new("TestResults", ResourceKind::StorageTable)
                .with("storage_account", storage.attr("name")),
        )?;

        let insights = graph.declare(
            ResourceSpec::new(
                format!("{prefix}-{environment}applicationInsights"),
                ResourceKind::Insights,
            )
            .with("location", group.attr("location"))
            .with("resource_group", group.attr("name"))
            .with("application_type", "web"),
        )?;

        let plan = graph.declare(
            ResourceSpec::new(
                format!("{prefix}-{environment}-AppServicePlan"),
                ResourceKind::ServicePlan,
            )
            .with("location", group.attr("location"))
            .with("resource_group", group.attr("name"))
            .with("os_type", "Linux")
            .with("sku_name", "Y1"),
        )?;

        let host = graph.declare(
            ResourceSpec::new(
                format!("{prefix}-{environment}FunctionApp"),
                ResourceKind::FunctionHost,
            )
            .with("location", group.attr("location"))
            .with("resource_group", group.attr("name"))
            .with("service_plan_id", plan.attr("id"))
            .with("storage_account", storage.attr("name"))
            .with("storage_access_key", storage.attr("primary_access_key"))
            .with("functions_extension_version", "~4")
            .with("worker_runtime", "python")
            .with("python_version", config.backend.python_version.as_str())
            .with(
                "app_insights_instrumentation_key",
                insights.attr("instrumentation_key"),
            )
            .with(
                "storage_connection_string",
                storage.attr("primary_connection_string"),
            ),
        )?;

        let deployment = graph.declare(
            ResourceSpec::new(
                format!("{prefix}-{environment}-Deployment"),
                ResourceKind::Deployment,
            )
            .with("host", host.attr("name"))
            .with("resource_group", group.attr("name")),
        )?;

        let gateway = graph.declare(
            ResourceSpec::new(
                format!("{prefix}-{environment}-ApiManagement"),
                ResourceKind::Gateway,
            )
            .with("location", group.attr("location"))
            .with("resource_group", group.attr("name"))
            .with("publisher_name", config.publisher_name.as_str())
            .with("publisher_email", config.publisher_email.as_str())
            .with("sku_name", config.gateway.sku_name.as_str())
            .with("cors_domain", config.gateway.cors_domain.as_str()),
        )?;

        // Host access key, fetched once and referenced by name so rotation
        // never touches the policy document.
        let named_value = graph.declare(
            ResourceSpec::new(
                format!("{prefix}-{environment}-FunctionKey"),
                ResourceKind::NamedValue,
            )
            .with("gateway", gateway.attr("name"))
            .with("value", host.attr("default_host_key"))
            .with("secret", "true"),
        )?;

        let backend_name = format!("{prefix}-{environment}-Backend");
        let backend = graph.declare(
            ResourceSpec::new(backend_name.as_str(), ResourceKind::BackendBinding)
                .with("gateway", gateway.attr("name"))
                .with("hostname", host.attr("default_hostname"))
                .with("credentials", named_value.attr("name")),
        )?;
        // Binding requires a deployed artifact behind the hostname, not just
        // a declared host.
        graph.depends_on(backend, deployment)?;

        let api = graph.declare(
            ResourceSpec::new(config.api_name.as_str(), ResourceKind::Api)
                .with("gateway", gateway.attr("name"))
                .with("display_name", config.api_name.as_str())
                .with("path", environment.as_str())
                .with("subscription_required", "true")
                .with("operations", config.gateway.function_names.join(",")),
        )?;

        let policy = PolicyDocument::assemble(
            &IDENTITY_HEADERS,
            config.gateway.key_rate_limit,
            config.gateway.source_rate_limit,
            &backend_name,
        );
        policy.validate()?;

        let attachment = graph.declare(
            ResourceSpec::new(format!("{}-policy", config.api_name), ResourceKind::PolicyAttachment)
                .with("api", api.attr("name"))
                .with("xml", policy.to_xml()),
        )?;
        graph.depends_on(attachment, backend)?;

        Ok(StackGraph {
            graph,
            api,
            gateway,
        })
    }

    async fn run_pipeline(&self, resolved: &crate::graph::ResolvedSpec) -> Result<bool> {
        let host = resolved
            .plain("host")
            .ok_or_else(|| StackError::MissingAttribute {
                resource: resolved.name.clone(),
                attr: "host".to_string(),
            })?;
        let resource_group =
            resolved
                .plain("resource_group")
                .ok_or_else(|| StackError::MissingAttribute {
                    resource: resolved.name.clone(),
                    attr: "resource_group".to_string(),
                })?;

        let spec = PipelineSpec::from_backend(&self.config.backend, host, resource_group);
        let mut pipeline = Pipeline::new(spec, self.executor.clone(), self.state_store.clone());
        let outcome = pipeline.run().await?;
        Ok(outcome.rebuilt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{MemoryDeployStateStore, RecordingExecutor};
    use crate::provider::MemoryProvider;

    fn test_stack(source_dir: &std::path::Path) -> Stack {
        let config = Config {
            backend: crate::config::BackendConfig {
                source_dir: source_dir.to_string_lossy().into_owned(),
                ..crate::config::BackendConfig::default()
            },
            ..Config::for_test()
        };
        Stack::new(
            config,
            Arc::new(MemoryProvider::new()),
            Arc::new(RecordingExecutor::new()),
            Arc::new(MemoryDeployStateStore::new()),
        )
    }

    #[test]
    fn test_plan_orders_dependencies_first() {
        let dir = tempfile::tempdir().unwrap();
        let stack = test_stack(dir.path());
        let order = stack.plan().unwrap();

        let position = |name: &str| {
            order
                .iter()
                .position(|n| n == name)
                .unwrap_or_else(|| panic!("{name} missing from plan: {order:?}"))
        };

        assert!(position("TestResourceGroup") < position("testassign"));
        assert!(position("testassign") < position("Test-assignFunctionApp"));
        assert!(position("Test-assignFunctionApp") < position("Test-assign-Deployment"));
        assert!(position("Test-assign-Deployment") < position("Test-assign-Backend"));
        assert!(position("Test-assign-Backend") < position("TestApi-policy"));
        assert!(position("TestApi") < position("TestApi-policy"));
    }

    #[test]
    fn test_plan_contains_every_resource() {
        let dir = tempfile::tempdir().unwrap();
        let stack = test_stack(dir.path());
        let order = stack.plan().unwrap();
        assert_eq!(order.len(), 12);
    }

    #[tokio::test]
    async fn test_run_requires_valid_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut stack = test_stack(dir.path());
        stack.config.api_name = String::new();

        assert!(matches!(
            stack.run(&[]).await,
            Err(StackError::Config(ConfigError::MissingRequired("api_name")))
        ));
    }
}
