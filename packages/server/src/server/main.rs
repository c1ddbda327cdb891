// Main entry point for the Parseline API server

use std::sync::Arc;

use anyhow::{Context, Result};
use server_core::domains::scraping::jobs::register_scraping_jobs;
use server_core::kernel::jobs::{JobRegistry, JobWorker};
use server_core::kernel::ServerDeps;
use server_core::{server::build_app, Config};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,server_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Parseline scraping orchestrator");

    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!("Configuration loaded");

    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connected");

    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Migrations complete");

    let deps = Arc::new(ServerDeps::new(pool, config.scraper.clone()));

    // Register phase jobs and start the worker pool
    let mut registry = JobRegistry::new();
    register_scraping_jobs(&mut registry);
    let registry = Arc::new(registry);

    let shutdown = CancellationToken::new();
    for _ in 0..config.job_workers {
        let worker = JobWorker::new(registry.clone(), deps.clone());
        let token = shutdown.child_token();
        tokio::spawn(async move {
            if let Err(e) = worker.run(token).await {
                tracing::error!(error = %e, "Job worker exited with error");
            }
        });
    }
    tracing::info!(workers = config.job_workers, "Job workers started");

    let app = build_app(deps);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Starting server on {}", addr);
    tracing::info!("Health check: http://localhost:{}/health", config.port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .context("Server error")?;

    Ok(())
}

async fn shutdown_signal(workers: CancellationToken) {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Shutdown signal received, stopping workers");
    workers.cancel();
}
