// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Bearer-token check for webhook pushes.

use crate::error::AppError;
use crate::AppState;
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use subtle::ConstantTimeEq;

/// Check `Authorization: Bearer <secret>` in constant time.
pub fn check_bearer(headers: &HeaderMap, secret: &str) -> Result<(), AppError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or(AppError::Unauthorized)?;

    if bool::from(token.as_bytes().ct_eq(secret.as_bytes())) {
        Ok(())
    } else {
        Err(AppError::Unauthorized)
    }
}

/// Middleware that requires the webhook secret when one is configured.
pub async fn require_webhook_secret(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    tracing::debug!(state = "received", uri = %request.uri(), "Webhook push");
    if let Some(secret) = &state.config.webhook_secret {
        if let Err(e) = check_bearer(request.headers(), secret) {
            tracing::warn!(state = "rejected", "Webhook push with missing or wrong token");
            return Err(e);
        }
    }

    Ok(next.run(request).await)
}
