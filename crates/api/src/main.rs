//! Subsentry API server binary entrypoint.

use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use subsentry_common::config::AppConfig;
use subsentry_common::db::{create_pool, run_migrations};
use subsentry_common::redis_pool::create_redis_pool;
use subsentry_engine::{RenewalScheduler, SchedulerSettings};
use subsentry_notifier::build_notifier;

use subsentry_api::routes::create_router;
use subsentry_api::state::AppState;

/// Request bodies are small JSON documents.
const MAX_BODY_BYTES: usize = 64 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("subsentry_api=debug,subsentry_engine=debug,tower_http=debug")
        }))
        .init();

    tracing::info!("Starting Subsentry API server...");

    // Load and validate configuration before touching any backend
    let config = AppConfig::from_env()?;
    let settings = SchedulerSettings::from_config(&config)?;
    let notifier = build_notifier(&config)?;
    tracing::info!(channel = notifier.channel_name(), "Notifier configured");

    // Create database connection pool
    let pool = create_pool(&config.database_url, config.db_max_connections).await?;
    run_migrations(&pool).await?;
    tracing::info!("Database pool created");

    // Create Redis connection
    let redis = create_redis_pool(&config.redis_url).await?;
    tracing::info!("Redis connection established");

    // The periodic loop lives in subsentry-scheduler; this instance only serves manual runs
    let scheduler = Arc::new(RenewalScheduler::with_backends(
        pool.clone(),
        redis,
        notifier.clone(),
        settings,
    ));

    let state = AppState::new(pool, scheduler.clone(), notifier);

    // Build router
    let app = create_router(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.api_port));
    tracing::info!("API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
            scheduler.shutdown();
        })
        .await?;

    Ok(())
}
