//! Reference binary wiring: loads configuration, assembles the query and autopilot stacks against
//! the bundled `FakeRuntime`, and serves the two management HTTP endpoints until interrupted.
//!
//! A real deployment supplies its own `RuntimeMetadataProvider`/`ThreadTopologyProvider`/
//! `RuntimeStateWatch`/`LocalStoreHandle` bindings over its actual stream-processing runtime and
//! links against the library crates directly rather than this binary.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use streams_autopilot::{Autopilot, AutopilotConfig};
use streams_common::config::keys;
use streams_common::{HostInfo, Properties};
use streams_host_manager::HostManagerBuilder;
use streams_interactive_query::InteractiveQueryExecutor;
use streams_management_http::{ManagementEndpoints, ManagementServer};
use streams_query_store::local::LocalStoreAdapter;
use streams_query_store::{StoreDescriptor, StoreType};
use streams_recovery_window::RecoveryWindow;
use streams_remote_store::HttpStoreDescriptor;
use streams_runtime_facade::fake::{FakeRuntime, ForStore};

#[derive(Parser)]
#[command(name = "streamsctl", about = "Interactive query + autopilot control plane")]
struct Args {
    /// TOML properties file; keys are read as dotted paths (e.g. `[autopilot] lag.threshold = 1000`
    /// becomes `autopilot.lag.threshold`).
    #[arg(long, env = "STREAMS_CONFIG")]
    config: Option<PathBuf>,

    /// Overrides `application.server` from the config file.
    #[arg(long, env = "APPLICATION_SERVER")]
    application_server: Option<String>,

    /// Name of the local key-value store this instance owns and serves interactive queries for.
    #[arg(long, env = "STORE_NAME", default_value = "join-store")]
    store_name: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let mut properties = match &args.config {
        Some(path) => load_properties(path)?,
        None => Properties::new(),
    };
    if let Some(application_server) = args.application_server {
        properties.set(keys::APPLICATION_SERVER, application_server);
    }

    let self_host: HostInfo = properties
        .require_string(keys::APPLICATION_SERVER)
        .context("application.server is not configured; refusing to start")?
        .parse()
        .context("application.server is not a valid host:port")?;

    let runtime = Arc::new(FakeRuntime::new(self_host.clone()));

    let local_handle = Arc::new(ForStore::new(runtime.clone(), args.store_name.clone()));
    let local_adapter = Arc::new(LocalStoreAdapter::from_properties(
        args.store_name.clone(),
        StoreType::KeyValue,
        &properties,
        local_handle,
    )?);
    let descriptor: Arc<dyn StoreDescriptor> =
        Arc::new(HttpStoreDescriptor::new(args.store_name.clone(), StoreType::KeyValue));

    let mut builder = HostManagerBuilder::new();
    builder.register_store(descriptor, local_adapter);
    let host_manager = builder.build(self_host.clone(), runtime.clone());

    let autopilot_config = AutopilotConfig::from_properties(&properties)?;
    let generic_timeout = autopilot_config.generic_timeout;

    let query = Arc::new(InteractiveQueryExecutor::new(
        host_manager.clone(),
        streams_serde_registry::default_registry(),
        generic_timeout,
    ));

    let window = RecoveryWindow::spawn(&*runtime, autopilot_config.between_runs);
    let autopilot = Arc::new(Autopilot::new(
        autopilot_config,
        runtime.clone(),
        Some(window),
    ));
    if properties.get_bool_or(keys::AUTOPILOT_ENABLED, false) {
        autopilot.automate()?;
        tracing::info!("autopilot scheduling enabled");
    }

    let endpoints = ManagementEndpoints::from_exposure_list(
        properties.get_string_or(keys::MANAGEMENT_ENDPOINTS_EXPOSE, ""),
    );
    let server = Arc::new(ManagementServer::new(
        query,
        autopilot.clone(),
        host_manager.clone(),
        endpoints,
        generic_timeout,
    ));

    let addr = SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), self_host.port);
    let serving = server.serve(addr).await?;
    tracing::info!(%addr, "management-http listening");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    serving.abort();
    autopilot.shutdown().await;
    host_manager.clean_up().await;

    Ok(())
}

fn load_properties(path: &PathBuf) -> anyhow::Result<Properties> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    let parsed: toml::Value = toml::from_str(&text)
        .with_context(|| format!("parsing config file {}", path.display()))?;
    let mut flat = HashMap::new();
    flatten_toml("", &parsed, &mut flat);
    Ok(Properties::from_map(flat))
}

/// Flattens a parsed TOML document into dot-separated keys, matching the flat property-bag model
/// the rest of the system reads from (`[autopilot.period] between-runs = 1000` becomes
/// `autopilot.period.between-runs`).
fn flatten_toml(prefix: &str, value: &toml::Value, out: &mut HashMap<String, String>) {
    match value {
        toml::Value::Table(table) => {
            for (key, value) in table {
                let full_key = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_toml(&full_key, value, out);
            }
        }
        toml::Value::String(s) => {
            out.insert(prefix.to_owned(), s.clone());
        }
        other => {
            out.insert(prefix.to_owned(), other.to_string());
        }
    }
}
