//! One-Shield Correlation Engine
//!
//! Correlates findings raised by different detectors / log types.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 ONE-SHIELD CORRELATOR                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌───────────┐  ┌────────────────┐  ┌────────────────────┐ │
//! │  │  API      │  │  Join Engine   │  │  Search /          │ │
//! │  │  (Axum)   │─▶│  + Vector      │  │  Aggregator        │ │
//! │  │           │  │  Embeddings    │  │  (multi-kNN merge) │ │
//! │  └───────────┘  └───────┬────────┘  └─────────┬──────────┘ │
//! │                         ▼                     ▼            │
//! │            ┌──────────────────────────────────────┐        │
//! │            │ Correlation history (memory / PG)    │        │
//! │            └──────────────────────────────────────┘        │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod config;
mod db;
mod engine;
mod error;
mod handlers;
mod models;
mod sources;
mod store;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    Router,
    routing::{get, post},
};
use tower_http::{
    cors::{CorsLayer, Any},
    trace::TraceLayer,
    compression::CompressionLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, StorageBackend};
use crate::engine::CorrelationService;
use crate::sources::Catalog;
use crate::store::{CorrelationIndex, MemoryStore, PgStore};

pub use error::{AppResult, CorrelationError};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env();

    // Initialize logging
    init_tracing(&config);

    tracing::info!("One-Shield Correlator starting...");

    let index: Arc<dyn CorrelationIndex> = match config.storage_backend {
        StorageBackend::Memory => {
            tracing::info!("Storage: in-memory correlation index");
            Arc::new(MemoryStore::new())
        }
        StorageBackend::Postgres => {
            tracing::info!("Database: {}", config.database_url.split('@').last().unwrap_or("***"));
            Arc::new(
                PgStore::connect(&config.database_url)
                    .await
                    .context("Failed to create database pool")?,
            )
        }
    };

    let catalog = match &config.catalog_path {
        Some(path) => Arc::new(
            Catalog::load(path, config.engine.vector_dimensions)
                .with_context(|| format!("Failed to load catalog {}", path.display()))?,
        ),
        None => {
            tracing::warn!("CATALOG_PATH not set, no detectors or correlation rules configured");
            Arc::new(Catalog::empty())
        }
    };

    let service = Arc::new(CorrelationService::new(
        index,
        catalog.clone(),
        catalog,
        config.engine.clone(),
    ));

    tracing::info!("Ensuring correlation schema...");
    service
        .ensure_schema()
        .await
        .context("Failed to prepare correlation indices")?;

    let app = create_router(AppState { service });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("🚀 Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "oneshield_correlator=debug,tower_http=debug".into());
    let json = config.is_production()
        || std::env::var("LOG_FORMAT").map(|f| f == "json").unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<CorrelationService>,
}

/// Create the main router with all routes
fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::check))
        // Finding ingestion
        .route("/api/v1/findings", post(handlers::findings::publish))
        // Correlations
        .route("/api/v1/correlations", get(handlers::correlations::list))
        .route("/api/v1/correlations/search", get(handlers::correlations::search))
        // Correlation alerts
        .route("/api/v1/correlations/alerts", get(handlers::alerts::list))
        .route("/api/v1/correlations/alerts/ack", post(handlers::alerts::acknowledge))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        )
        .with_state(state)
}
