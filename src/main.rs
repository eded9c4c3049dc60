mod app;
mod config;
mod db;
mod errors;
mod external;
mod logging;
mod models;
mod routes;
mod services;
mod state;

use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use crate::config::AppConfig;
use crate::external::registry::ProviderRegistry;
use crate::services::ingestion_engine::IngestionEngine;
use crate::services::metrics::{LogMetrics, MetricsSink};
use crate::services::persistent_scheduler::{PersistentScheduler, SchedulerSettings};
use crate::services::rate_limiter::SharedRateLimiter;
use crate::services::request_coordinator::RequestCoordinator;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    logging::init_logging(logging::LoggingConfig::from_env())
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {}", e))?;

    let config = AppConfig::from_env();

    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(10)
        .connect(&config.database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    let limiter = Arc::new(SharedRateLimiter::new());
    let registry = Arc::new(ProviderRegistry::with_defaults());
    let coordinator = RequestCoordinator::new(
        limiter.clone(),
        config.enable_request_coordinator,
        config.request_coordinator_window_seconds,
    );
    let metrics: Arc<dyn MetricsSink> = Arc::new(LogMetrics);

    let engine = Arc::new(IngestionEngine::new(
        pool.clone(),
        registry.clone(),
        coordinator.clone(),
    ));

    let scheduler = if config.enable_embedded_scheduler {
        let scheduler = PersistentScheduler::new(
            pool.clone(),
            engine.clone(),
            metrics.clone(),
            SchedulerSettings {
                max_workers: config.scheduler_max_workers,
            },
        )
        .await?;
        scheduler.start().await?;
        Some(scheduler)
    } else {
        info!("Embedded scheduler disabled; job endpoints will answer 503");
        None
    };

    let state = AppState {
        pool,
        scheduler: scheduler.clone(),
        coordinator: coordinator.clone(),
        registry,
        metrics,
    };

    let app = app::create_app(state, &config.cors_origins);

    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!("🚀 Marketpipe backend running at http://{}/", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
            if let Some(scheduler) = scheduler {
                scheduler.shutdown().await;
            }
            coordinator.shutdown();
        })
        .await?;

    Ok(())
}
