// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! HTTP route handlers.

pub mod webhook;

use crate::AppState;
use axum::extract::{DefaultBodyLimit, State};
use axum::{routing::get, Json, Router};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
}

/// Health check response
async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: state.config.service_name.clone(),
    })
}

#[derive(Serialize)]
pub struct ServiceDescription {
    pub status: &'static str,
    pub message: &'static str,
    pub endpoints: BTreeMap<&'static str, &'static str>,
}

async fn describe() -> Json<ServiceDescription> {
    Json(ServiceDescription {
        status: "ok",
        message: "Health Auto Export Webhook Receiver",
        endpoints: BTreeMap::from([
            ("POST /webhook", "Receive health data export"),
            ("GET /health", "Health check"),
        ]),
    })
}

/// Build the complete router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    let max_body = state.config.max_body_bytes;

    Router::new()
        .route("/", get(describe))
        .route("/health", get(health_check))
        .merge(webhook::routes(state.clone()))
        .layer(DefaultBodyLimit::max(max_body))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}
