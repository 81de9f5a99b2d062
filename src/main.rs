//! # LLM Routing Gateway
//!
//! Multi-tenant, OpenAI-compatible gateway that routes each chat completion
//! to the best available provider, rotates credentials and falls back across
//! providers on transient failures.
//!
//! ## Usage
//!
//! ```bash
//! # Start with defaults (built-in model catalog, port 8080)
//! llm-routing-gateway
//!
//! # Start with a config file
//! llm-routing-gateway --config /etc/gateway/gateway.toml
//!
//! # Environment overrides
//! GATEWAY_PORT=9000 GATEWAY_LOG_FORMAT=json llm-routing-gateway
//! ```

use gateway_config::{load_config, ConfigLoader, EnvSecretSource, GatewayConfig};
use gateway_core::{InMemoryMetadataStore, MetadataSnapshot, MetadataStore};
use gateway_providers::{ProviderRegistry, ReqwestTransport};
use gateway_resilience::{CredentialResolver, CredentialRotator, KeyHealthConfig, KeyHealthTracker};
use gateway_routing::{CachedMetadata, ProviderCatalog, Router, RouterConfig};
use gateway_server::{AppState, ShutdownConfig, ShutdownCoordinator};
use gateway_telemetry::{init_logging, LoggingConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Application entry point
#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        // Logging may not be up yet when configuration fails
        eprintln!("llm-routing-gateway: {e}");
        error!(error = %e, "Application failed");
        std::process::exit(1);
    }
}

/// Main application logic
async fn run() -> Result<(), BoxError> {
    let config = match config_path_arg() {
        Some(path) => ConfigLoader::new().with_file(path).load().await?,
        None => load_config().await?,
    };

    init_logging(&LoggingConfig::from(&config.logging))?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.server.host,
        port = config.server.port,
        providers = config.providers.len(),
        "Starting LLM routing gateway"
    );

    let state = build_state(&config).await?;
    gateway_server::serve(&config.server, state).await?;

    info!("Gateway stopped");
    Ok(())
}

/// `--config <path>` or `--config=<path>`
fn config_path_arg() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" || arg == "-c" {
            return args.next().map(PathBuf::from);
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(PathBuf::from(path));
        }
    }
    None
}

async fn build_state(config: &GatewayConfig) -> Result<AppState, BoxError> {
    let catalog = match &config.catalog_path {
        Some(path) => ProviderCatalog::load(path).await?,
        None => ProviderCatalog::builtin()?,
    };
    info!(models = catalog.len(), "Model catalog ready");

    let store: Arc<dyn MetadataStore> = match &config.metadata_path {
        Some(path) => Arc::new(load_metadata(path).await?),
        None => {
            warn!("No metadata_path configured, every API key will be rejected");
            Arc::new(InMemoryMetadataStore::new())
        }
    };

    let health = Arc::new(KeyHealthTracker::new(KeyHealthConfig {
        error_threshold: config.key_health.error_threshold,
        blacklist_duration: config.key_health.blacklist_duration,
    }));
    let credentials = Arc::new(CredentialResolver::new(
        Arc::new(EnvSecretSource),
        Arc::new(CredentialRotator::new()),
        health,
    ));

    for provider in config.providers.iter().filter(|p| p.enabled) {
        if std::env::var(&provider.secret_name).is_err() {
            warn!(
                provider = %provider.id,
                secret = %provider.secret_name,
                "Provider secret is not set, only organization keys can serve it"
            );
        }
    }

    let router = Router::builder()
        .catalog(Arc::new(catalog))
        .registry(ProviderRegistry::with_defaults())
        .transport(Arc::new(ReqwestTransport::new()?))
        .credentials(credentials)
        .metadata(Arc::new(CachedMetadata::new(store, &config.cache)))
        .providers(config.providers.iter().cloned())
        .config(RouterConfig::from(&config.routing))
        .build()?;

    let shutdown = ShutdownCoordinator::new(
        ShutdownConfig::new().with_graceful_timeout(config.server.shutdown_timeout),
    );
    Ok(AppState::new(Arc::new(router)).with_shutdown(Arc::new(shutdown)))
}

async fn load_metadata(path: &Path) -> Result<InMemoryMetadataStore, BoxError> {
    let content = tokio::fs::read_to_string(path).await?;
    let snapshot: MetadataSnapshot = match path.extension().and_then(|e| e.to_str()) {
        Some("yaml" | "yml") => serde_yaml::from_str(&content)?,
        _ => serde_json::from_str(&content)?,
    };
    info!(
        path = %path.display(),
        api_keys = snapshot.api_keys.len(),
        organizations = snapshot.organizations.len(),
        provider_keys = snapshot.provider_keys.len(),
        iam_rules = snapshot.iam_rules.len(),
        "Loaded metadata snapshot"
    );
    Ok(InMemoryMetadataStore::from_snapshot(snapshot))
}
