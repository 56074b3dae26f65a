//! HTTP server setup and shared application state.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use sqlx::SqlitePool;
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::background::BackgroundQueue;
use crate::cache::{CacheLayer, MemoryCacheStore};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::failover::Orchestrator;
use crate::health::HealthTracker;
use crate::limiter::{MemoryCounterStore, RateLimiter};
use crate::pipeline::Pipeline;
use crate::providers::{ProviderId, ProviderRegistry};
use crate::storage::{PromptStore, SqlitePromptStore};

/// Pending detached side effects the gateway will hold before dropping new
/// ones.
const BACKGROUND_QUEUE_CAPACITY: usize = 1024;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub limiter: Arc<RateLimiter>,
    pub health: Arc<HealthTracker>,
    pub config: Arc<Config>,
    pub db: Option<SqlitePool>,
}

/// Create the axum router with all endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/execute", post(handlers::execute))
        .route("/analyze", post(handlers::analyze))
        .route("/health", get(handlers::health))
        .route("/providers", get(handlers::list_providers))
        .route("/stats", get(handlers::stats_overview))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Wire up the component graph from config.
///
/// `db` feeds health tracking, telemetry, and the stats endpoint; `store`
/// supplies prompt definitions. Both are injectable so tests can run
/// against temp databases and in-memory stores.
pub fn build_state(
    config: Config,
    db: Option<SqlitePool>,
    store: Arc<dyn PromptStore>,
) -> Result<AppState> {
    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| Error::Internal(format!("failed to build HTTP client: {}", e)))?;

    let registry = Arc::new(ProviderRegistry::from_config(&config.providers, client));
    let health = Arc::new(HealthTracker::new(db.clone(), registry.ids()));

    let orchestrator = Orchestrator::new(registry, health.clone(), config.routing.clone());

    // One queue carries every detached side effect (cache writes, telemetry)
    let background = Arc::new(BackgroundQueue::new(BACKGROUND_QUEUE_CAPACITY));

    let cache = if config.cache.enabled {
        CacheLayer::new(
            Arc::new(MemoryCacheStore::new(config.cache.capacity)),
            background.clone(),
        )
    } else {
        CacheLayer::disabled(background.clone())
    };

    // Config validation guarantees the primary parses
    let primary = ProviderId::parse(&config.failover.primary)
        .ok_or_else(|| Error::Internal("unvalidated primary provider".to_string()))?;

    let pipeline = Pipeline::new(
        store,
        cache,
        orchestrator,
        db.clone(),
        background,
        config.guardrail.blocked_terms.clone(),
        Duration::from_secs(config.cache.ttl_seconds),
        primary,
        config.failover.auto,
    );

    let limiter = Arc::new(RateLimiter::new(Arc::new(MemoryCounterStore::new())));

    Ok(AppState {
        pipeline: Arc::new(pipeline),
        limiter,
        health,
        config: Arc::new(config),
        db,
    })
}

/// Run the HTTP server.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let listen_addr = config.server.listen.clone();

    // Persistence is load-bearing for health ordering and telemetry, but the
    // gateway still serves without it
    let db = match crate::storage::init_pool(&config.database().path).await {
        Ok(pool) => Some(pool),
        Err(e) => {
            tracing::warn!(error = %e, "Database unavailable, running without persistence");
            None
        }
    };

    let store: Arc<dyn PromptStore> = match &db {
        Some(pool) => Arc::new(SqlitePromptStore::new(pool.clone())),
        None => {
            tracing::warn!("No database: prompt versions cannot be resolved");
            Arc::new(crate::storage::MemoryPromptStore::new())
        }
    };

    let state = build_state(config, db, store)?;
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(address = %listen_addr, "Starting promptrelay gateway");

    axum::serve(listener, app).await?;

    Ok(())
}
