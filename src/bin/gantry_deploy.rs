//! gantry-deploy: provision the full API-gateway stack
//!
//! Loads configuration (file + environment) and the roster, realizes every
//! resource in dependency order, drives the backend pipeline, and prints
//! the outputs with sensitive values redacted.
//!
//! ## Configuration
//! ```yaml
//! api_name: PyTestRunner
//! publisher_name: Example University
//! publisher_email: ops@example.edu
//! prefix: PyTest
//! backend:
//!   source_dir: ../pytest-runner-func
//! ```
//!
//! Roster file (order defines key indices):
//! ```yaml
//! - id: u1
//!   first_name: Ada
//!   last_name: Lovelace
//!   email: ada@example.edu
//! ```

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gantry::config::{Config, LOG_ENV_VAR};
use gantry::pipeline::{FileDeployStateStore, ProcessExecutor};
use gantry::provider::init_provider;
use gantry::roster;
use gantry::stack::Stack;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = std::env::args().nth(1);
    let config = Config::load(config_path.as_deref())?;
    config.validate()?;

    let entries = roster::load(&config.roster_path)?;
    roster::validate(&entries)?;
    info!(users = entries.len(), "Roster loaded");

    let provider = init_provider(&config)?;
    let executor = Arc::new(ProcessExecutor::new());
    let state_store = Arc::new(FileDeployStateStore::new(&config.state_path));

    let stack = Stack::new(config, provider, executor, state_store);
    let outcome = stack.run(&entries).await?;

    for (name, value) in outcome.outputs.listing() {
        println!("{name} = {value}");
    }
    Ok(())
}
