// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Health-Ingest webhook server
//!
//! Receives Health Auto Export pushes, stages them and feeds the ingestion
//! pipeline.

use anyhow::Context;
use health_ingest::{config::Config, store::Store, AppState};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured JSON logging
    init_logging()?;

    // Load configuration from environment
    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!(
        port = config.port,
        data_dir = %config.data_dir.display(),
        mode = ?config.processing_mode,
        auth = config.webhook_secret.is_some(),
        "Starting health-ingest webhook"
    );

    let store = Arc::new(Store::from_config(&config).context("Failed to create store client")?);
    match store.ping().await {
        Ok(()) => tracing::info!(store = store.name(), "Store reachable"),
        // Payloads are staged regardless; failed writes go to the failure log.
        Err(e) => tracing::warn!(store = store.name(), error = %e, "Store not reachable at startup"),
    }

    let state = Arc::new(
        AppState::build(config.clone(), store)
            .await
            .context("Failed to initialize application state")?,
    );

    // Build router
    let app = health_ingest::routes::create_router(state.clone());

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Draining processing queue");
    state.queue.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

/// Initialize structured JSON logging.
fn init_logging() -> anyhow::Result<()> {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("health_ingest=debug".parse()?)
                .add_directive("info".parse()?),
        )
        .with(format)
        .init();
    Ok(())
}
