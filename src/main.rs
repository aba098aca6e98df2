//! LogForge Server
//!
//! Scores incoming log records for anomalies, mines recurring message
//! patterns, and streams events to live dashboard connections.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        LOGFORGE                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌───────────┐  ┌───────────────┐  ┌─────────────────────┐ │
//! │  │  API      │  │  Scoring      │  │  Fan-out Manager    │ │
//! │  │  + WS     │  │  Worker       │  │  (topics → clients) │ │
//! │  │  (Axum)   │  │  (interval)   │  │                     │ │
//! │  └─────┬─────┘  └───────┬───────┘  └──────────┬──────────┘ │
//! │        │        NOTIFY  │         LISTEN      │            │
//! │        └────────────────┼─────────────────────┘            │
//! │                         ▼                                   │
//! │                  ┌─────────────┐                           │
//! │                  │ PostgreSQL  │                           │
//! │                  └─────────────┘                           │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod config;
mod db;
mod error;
mod events;
mod fanout;
mod handlers;
mod models;
mod patterns;
mod scoring;
mod store;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    Router,
    routing::{get, post},
};
use tokio::sync::watch;
use tower_http::{
    cors::{CorsLayer, Any},
    trace::TraceLayer,
    compression::CompressionLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::events::{topics, EventPublisher, PgEventBus};
use crate::fanout::{FanoutManager, PgUpstream, Upstream};
use crate::patterns::PatternMiner;
use crate::scoring::ScoringWorker;
use crate::store::{PgRecordStore, RecordStore};

pub use error::{AppError, AppResult};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    dotenvy::dotenv().ok();
    let config = config::Config::from_env();

    init_tracing(config.json_logs || config.is_production());

    tracing::info!("LogForge server starting...");
    tracing::info!("Database: {}", config.database_url.split('@').last().unwrap_or("***"));

    // Initialize database pool
    let pool = db::create_pool(&config.database_url, config.db_max_connections)
        .await
        .context("Failed to create database pool")?;

    // Run migrations
    tracing::info!("Running database migrations...");
    db::run_migrations(&pool)
        .await
        .context("Failed to run migrations")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let store: Arc<dyn RecordStore> = Arc::new(PgRecordStore::new(pool.clone()));
    let bus: Arc<dyn EventPublisher> = Arc::new(PgEventBus::new(pool.clone()));
    let upstream: Arc<dyn Upstream> = Arc::new(PgUpstream::new(
        config.database_url.clone(),
        &topics::BUS_FED,
    ));
    let fanout = FanoutManager::start(Some(upstream), config.subscriber_buffer);
    let miner = Arc::new(PatternMiner::new(store.clone(), config.patterns.clone()));

    // Background scoring
    let worker = ScoringWorker::new(store, bus, fanout.clone(), config.scoring.clone());
    let worker_task = tokio::spawn(worker.run(shutdown_rx.clone()));

    // Build application state
    let state = AppState {
        pool,
        config: config.clone(),
        fanout,
        miner,
        shutdown: shutdown_rx,
    };

    let app = create_router(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("🚀 Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await
        .context("Server error")?;

    if let Err(e) = worker_task.await {
        tracing::error!("Scoring worker task failed: {}", e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "logforge_server=debug,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Resolves on Ctrl+C after telling the worker and every stream to stop
async fn shutdown_signal(shutdown: watch::Sender<bool>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }

    tracing::info!("Shutdown signal received");
    let _ = shutdown.send(true);
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: sqlx::PgPool,
    pub config: config::Config,
    pub fanout: Arc<FanoutManager>,
    pub miner: Arc<PatternMiner>,
    pub shutdown: watch::Receiver<bool>,
}

/// Create the main router with all routes
fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Logs
        .route("/api/v1/logs/search", post(handlers::logs::search))
        .route("/api/v1/logs/stats", get(handlers::logs::stats))

        // Anomalies
        .route("/api/v1/anomalies/recent", get(handlers::anomalies::recent))
        .route("/api/v1/anomalies/:id/explain", get(handlers::anomalies::explain))

        // Patterns
        .route("/api/v1/patterns", get(handlers::patterns::list))

        // Alert rules
        .route("/api/v1/alerts", get(handlers::alerts::list).post(handlers::alerts::create))
        .route(
            "/api/v1/alerts/:id",
            get(handlers::alerts::get)
                .patch(handlers::alerts::update)
                .delete(handlers::alerts::delete),
        )
        .layer(CompressionLayer::new());

    // Live streams (upgrade responses stay uncompressed)
    let stream_routes = Router::new()
        .route("/ws/logs", get(handlers::stream::logs))
        .route("/ws/anomalies", get(handlers::stream::anomalies))
        .route("/ws/alerts", get(handlers::stream::alerts));

    Router::new()
        .route("/health", get(handlers::health::check))
        .merge(api_routes)
        .merge(stream_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        )
        .with_state(state)
}
