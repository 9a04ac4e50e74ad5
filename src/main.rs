// Main entry point - Dependency injection and server setup
mod domain;
mod application;
mod infrastructure;
mod presentation;

use std::{net::SocketAddr, sync::Arc, time::Duration};
use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::{compression::CompressionLayer, trace::TraceLayer};
use tracing_subscriber::EnvFilter;

use crate::application::cache_store::CacheStore;
use crate::application::config_store::ConfigStore;
use crate::application::key_resolver::SeriesKeyResolver;
use crate::application::persistence::PersistenceGateway;
use crate::application::refresh_scheduler::SchedulerDeps;
use crate::application::sample_fetcher::RemoteSampleFetcher;
use crate::application::trend_service::TrendService;
use crate::infrastructure::config::{
    load_queries_config, load_settings, StorageBackend, StorageSettings,
};
use crate::infrastructure::http_query_executor::HttpQueryExecutor;
use crate::infrastructure::memory_store::MemoryStore;
use crate::infrastructure::query_catalog::StaticQueryCatalog;
use crate::infrastructure::sqlite_store::SqliteStore;
use crate::presentation::app_state::AppState;
use crate::presentation::handlers::{
    close_series, delete_series, get_series, health_check, list_series, open_series,
    refresh_series, series_status, update_config,
};

fn open_gateway(storage: &StorageSettings) -> anyhow::Result<Arc<dyn PersistenceGateway>> {
    let gateway: Arc<dyn PersistenceGateway> = match storage.backend {
        StorageBackend::Sqlite => Arc::new(SqliteStore::open(&storage.path, storage.quota_bytes)?),
        StorageBackend::Memory => match storage.quota_bytes {
            Some(quota) => Arc::new(MemoryStore::with_quota(quota)),
            None => Arc::new(MemoryStore::new()),
        },
    };
    Ok(gateway)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("trend_cache=info")),
        )
        .init();

    // Load configuration
    let settings = load_settings()?;
    let queries_config = load_queries_config()?;

    // Create adapters (infrastructure layer)
    let gateway = open_gateway(&settings.storage)?;
    let catalog = Arc::new(StaticQueryCatalog::new(queries_config.queries));
    let executor = Arc::new(HttpQueryExecutor::new(
        settings.remote.base_url.clone(),
        settings.remote.token.clone(),
        Duration::from_millis(settings.remote.query_timeout_ms),
        Duration::from_millis(settings.remote.fallback_timeout_ms),
    ));
    tracing::info!(
        "Using {:?} storage with {} registered queries",
        settings.storage.backend,
        catalog.len()
    );

    // Create services (application layer)
    let deps = SchedulerDeps {
        fetcher: RemoteSampleFetcher::new(catalog, executor),
        cache: CacheStore::new(gateway.clone()),
        configs: ConfigStore::new(gateway.clone(), settings.defaults.clone()),
    };
    let trend_service = TrendService::new(SeriesKeyResolver::new(gateway), deps);

    for seed in &settings.series {
        let opened = match seed.to_open_request() {
            Ok(request) => trend_service.open(request).await.map_err(anyhow::Error::from),
            Err(e) => Err(e.into()),
        };
        match opened {
            Ok(key) => tracing::info!("Opened configured series {}", key),
            Err(e) => tracing::error!("Failed to open configured series '{}': {}", seed.title, e),
        }
    }

    // Create application state
    let state = Arc::new(AppState { trend_service });

    // Build router (presentation layer)
    let router = Router::new()
        .route("/healthz", get(health_check))
        .route("/series", get(list_series).post(open_series))
        .route("/series/:key", get(get_series).delete(delete_series))
        .route("/series/:key/status", get(series_status))
        .route("/series/:key/refresh", post(refresh_series))
        .route("/series/:key/config", put(update_config))
        .route("/series/:key/close", post(close_series))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .with_state(state.clone());

    // Start server
    let addr: SocketAddr = settings.server.bind_addr.parse()?;
    tracing::info!("Starting trend-cache service on {}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.trend_service.shutdown().await;
    tracing::info!("All series flushed");

    Ok(())
}
