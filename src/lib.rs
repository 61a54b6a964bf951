// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Health-Ingest: Apple Health exports into a time-series store
//!
//! This crate receives "Health Auto Export" payloads over a webhook (or
//! from files), stages them durably and turns them into raw, hourly and
//! daily series with incremental, idempotent imports.

pub mod config;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod store;
pub mod time_utils;

use config::Config;
use services::{FailureLog, Pipeline, ProcessingQueue, Stager};
use std::sync::Arc;
use store::Store;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub pipeline: Arc<Pipeline>,
    pub stager: Stager,
    pub failures: Arc<FailureLog>,
    pub queue: ProcessingQueue,
}

impl AppState {
    /// Open the staging area, load watermarks and start the workers.
    pub async fn build(config: Config, store: Arc<Store>) -> anyhow::Result<Self> {
        let stager = Stager::open(&config.staging_dir()).await?;
        let pipeline = Arc::new(Pipeline::from_config(&config, store).await?);
        let failures = Arc::new(FailureLog::new(&config.failure_log_path()));
        let queue = ProcessingQueue::start(
            pipeline.clone(),
            failures.clone(),
            config.workers,
            config.queue_capacity,
        );

        Ok(Self {
            config,
            pipeline,
            stager,
            failures,
            queue,
        })
    }
}
