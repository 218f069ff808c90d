//! Deployment configuration.
//!
//! Aggregates the values the run consumes into a single Config struct that
//! can be loaded from a YAML file or environment variables. Required values
//! are validated before any provisioning starts.

use serde::Deserialize;

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "gantry.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "GANTRY_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "GANTRY";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "GANTRY_LOG";

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration value: {0}")]
    MissingRequired(&'static str),

    #[error("Publisher email '{0}' is not a plausible address")]
    InvalidPublisherEmail(String),

    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// A rate limit: allowed calls per renewal period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub calls: u32,
    pub renewal_period_secs: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            calls: 10,
            renewal_period_secs: 60,
        }
    }
}

/// Gateway and API surface configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Gateway SKU passed through to the provider.
    pub sku_name: String,
    /// CORS domain for the API surface.
    pub cors_domain: String,
    /// Rate limit keyed by subscription key.
    pub key_rate_limit: RateLimitConfig,
    /// Rate limit keyed by source address.
    pub source_rate_limit: RateLimitConfig,
    /// Backend function names exposed as API operations.
    pub function_names: Vec<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            sku_name: "Basic_1".to_string(),
            cors_domain: "*".to_string(),
            key_rate_limit: RateLimitConfig::default(),
            source_rate_limit: RateLimitConfig::default(),
            function_names: Vec::new(),
        }
    }
}

/// Compute backend build and deploy configuration.
///
/// Command arrays support `{source_dir}`, `{artifact}`, `{resource_group}`
/// and `{host}` placeholders, substituted at run time.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Backend source tree.
    pub source_dir: String,
    /// Archive the pipeline produces and deploys.
    pub artifact_path: String,
    /// Directory names excluded from both hashing and archiving.
    pub excludes: Vec<String>,
    /// Backend runtime version passed through to the host.
    pub python_version: String,
    /// Vendors runtime dependencies into the source tree.
    pub build_command: Vec<String>,
    /// Archives the source tree into the artifact.
    pub archive_command: Vec<String>,
    /// Pushes the artifact to the compute host.
    pub deploy_command: Vec<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            source_dir: "backend".to_string(),
            artifact_path: "deployment.zip".to_string(),
            excludes: vec![".venv".to_string()],
            python_version: "3.9".to_string(),
            build_command: vec![
                "pip".to_string(),
                "install".to_string(),
                "-r".to_string(),
                "requirements.txt".to_string(),
                "--target=.python_packages/lib/site-packages".to_string(),
            ],
            archive_command: vec![
                "zip".to_string(),
                "-r".to_string(),
                "{artifact}".to_string(),
                ".".to_string(),
                "-x".to_string(),
                ".venv/*".to_string(),
            ],
            deploy_command: vec![
                "az".to_string(),
                "functionapp".to_string(),
                "deployment".to_string(),
                "source".to_string(),
                "config-zip".to_string(),
                "--resource-group".to_string(),
                "{resource_group}".to_string(),
                "--name".to_string(),
                "{host}".to_string(),
                "--src".to_string(),
                "{artifact}".to_string(),
                "--build-remote".to_string(),
                "true".to_string(),
            ],
        }
    }
}

/// Main deployment configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// API display name.
    pub api_name: String,
    /// Gateway publisher name.
    pub publisher_name: String,
    /// Gateway publisher email.
    pub publisher_email: String,
    /// Name prefix applied to every provisioned resource.
    pub prefix: String,
    /// Target region.
    pub region: String,
    /// Deployment environment name, appended to resource names.
    pub environment: String,
    /// Gateway and API surface settings.
    pub gateway: GatewayConfig,
    /// Compute backend build/deploy settings.
    pub backend: BackendConfig,
    /// Path of the persisted deploy state (last-applied hash per host).
    pub state_path: String,
    /// Resource provider type.
    pub provider: String,
    /// Roster file consumed by the deploy binary.
    pub roster_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_name: String::new(),
            publisher_name: String::new(),
            publisher_email: String::new(),
            prefix: String::new(),
            region: "eastasia".to_string(),
            environment: "assign".to_string(),
            gateway: GatewayConfig::default(),
            backend: BackendConfig::default(),
            state_path: ".gantry/deploy-state.json".to_string(),
            provider: "memory".to_string(),
            roster_path: "roster.yaml".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `gantry.yaml` in the current directory (if present)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `GANTRY_CONFIG` (if set)
    /// 4. `GANTRY`-prefixed environment variables (`__` separator)
    /// 5. Plain environment variables for the legacy names
    ///    (`PREFIX`, `API_NAME`, `PUBLISHER_NAME`, `PUBLISHER_EMAIL`)
    pub fn load(path: Option<&str>) -> Result<Self> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            // Legacy env names (PREFIX, API_NAME, ...) map onto the top-level
            // fields directly.
            .add_source(Environment::default().try_parsing(true))
            .build()?;

        let config: Config = config.try_deserialize()?;
        Ok(config)
    }

    /// Check required values before any provisioning.
    pub fn validate(&self) -> Result<()> {
        if self.api_name.trim().is_empty() {
            return Err(ConfigError::MissingRequired("api_name"));
        }
        if self.publisher_name.trim().is_empty() {
            return Err(ConfigError::MissingRequired("publisher_name"));
        }
        if self.publisher_email.trim().is_empty() {
            return Err(ConfigError::MissingRequired("publisher_email"));
        }
        if self.prefix.trim().is_empty() {
            return Err(ConfigError::MissingRequired("prefix"));
        }
        if !self.publisher_email.contains('@') {
            return Err(ConfigError::InvalidPublisherEmail(
                self.publisher_email.clone(),
            ));
        }
        Ok(())
    }

    /// Create config for testing, with the required values filled in.
    pub fn for_test() -> Self {
        Self {
            api_name: "TestApi".to_string(),
            publisher_name: "Test Publisher".to_string(),
            publisher_email: "publisher@example.com".to_string(),
            prefix: "Test".to_string(),
            gateway: GatewayConfig {
                function_names: vec!["pytester".to_string(), "test-results".to_string()],
                ..GatewayConfig::default()
            },
            ..Self::default()
        }
    }
}
