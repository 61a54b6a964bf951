// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Webhook route for Health Auto Export pushes.
//!
//! A delivery moves `received -> authenticated -> staged -> processed ->
//! acknowledged`, or ends `rejected`. The payload is on disk before the
//! sender hears back; processing failures after that are logged for
//! replay and still acknowledged.

use crate::config::ProcessingMode;
use crate::error::{AppError, Result};
use crate::middleware::require_webhook_secret;
use crate::services::parser;
use crate::services::queue::{self, EnqueueError};
use crate::services::StageOutcome;
use crate::AppState;
use axum::{
    body::Bytes,
    extract::State,
    middleware,
    routing::post,
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Webhook routes. Auth applies only to these.
pub fn routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/webhook", post(receive))
        .route_layer(middleware::from_fn_with_state(state, require_webhook_secret))
}

/// Per-delivery lifecycle, logged as the `state` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeliveryState {
    Authenticated,
    Staged,
    Processed,
    Acknowledged,
    Rejected,
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeliveryState::Authenticated => "authenticated",
            DeliveryState::Staged => "staged",
            DeliveryState::Processed => "processed",
            DeliveryState::Acknowledged => "acknowledged",
            DeliveryState::Rejected => "rejected",
        })
    }
}

#[derive(Serialize)]
pub struct Ack {
    pub status: &'static str,
}

const OK: Ack = Ack { status: "ok" };

/// Receive an export push (POST).
async fn receive(State(state): State<Arc<AppState>>, body: Bytes) -> Result<Json<Ack>> {
    let received_at = Utc::now();
    tracing::info!(
        state = %DeliveryState::Authenticated,
        bytes = body.len(),
        "Webhook push received"
    );

    if body.is_empty() {
        tracing::warn!(state = %DeliveryState::Rejected, "Empty request body");
        return Err(AppError::BadRequest("Empty request body".to_string()));
    }

    // A body that is not an export is refused before anything is staged.
    let doc = match parser::parse_bytes(&body) {
        Ok(doc) => doc,
        Err(e) => {
            tracing::warn!(state = %DeliveryState::Rejected, error = %e, "Invalid export payload");
            return Err(e.into());
        }
    };

    let staged = match state.stager.stage(&body, received_at).await? {
        StageOutcome::Staged(staged) => staged,
        StageOutcome::Duplicate { path } => {
            tracing::info!(
                state = %DeliveryState::Acknowledged,
                staged_file = %path.display(),
                "Duplicate delivery; already staged"
            );
            return Ok(Json(OK));
        }
    };
    tracing::info!(
        state = %DeliveryState::Staged,
        staged_file = %staged.path.display(),
        checksum = %staged.checksum,
        "Payload staged"
    );

    match state.config.processing_mode {
        ProcessingMode::Inline => {
            let report =
                queue::run_document(&state.pipeline, &state.failures, &staged.path, doc).await;
            tracing::info!(
                state = %DeliveryState::Processed,
                samples = report.parse.samples,
                sources = report.sources.len(),
                complete = report.is_complete(),
                "Payload processed"
            );
        }
        ProcessingMode::Queued => {
            drop(doc);
            if let Err(e) = state.queue.enqueue(staged.path.clone()) {
                // Staged either way; replay picks it up.
                let reason = e.to_string();
                if let Err(log_err) = state.failures.record(&staged.path, &reason).await {
                    tracing::error!(error = %log_err, "Failed to write failure log");
                }
                match e {
                    EnqueueError::Full => tracing::warn!(
                        staged_file = %staged.path.display(),
                        "Processing queue full; payload left for replay"
                    ),
                    EnqueueError::Closed => tracing::error!(
                        staged_file = %staged.path.display(),
                        "Processing queue closed; payload left for replay"
                    ),
                }
            }
        }
    }

    tracing::info!(state = %DeliveryState::Acknowledged, "Webhook push acknowledged");
    Ok(Json(OK))
}
