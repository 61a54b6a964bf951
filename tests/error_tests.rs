// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use axum::http::StatusCode;
use axum::response::IntoResponse;
use health_ingest::error::{AppError, PipelineError, StagingError};
use health_ingest::store::StoreError;

async fn body(err: AppError) -> (StatusCode, serde_json::Value) {
    let response = err.into_response();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1024)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_schema_error_is_bad_request_with_details() {
    let err: AppError = PipelineError::Schema("missing metrics and workouts".to_string()).into();
    let (status, json) = body(err).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "bad_request");
    assert_eq!(json["details"], "missing metrics and workouts");
}

#[tokio::test]
async fn test_storage_error_is_internal_without_details() {
    let err: AppError = PipelineError::Storage(StoreError::Fatal("401 from store".to_string())).into();
    let (status, json) = body(err).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["error"], "internal_error");
    assert!(json.get("details").is_none());
}

#[tokio::test]
async fn test_staging_error_is_internal() {
    let io = std::io::Error::other("disk full");
    let (status, json) = body(AppError::Staging(StagingError::Io(io))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["error"], "staging_error");
}

#[tokio::test]
async fn test_unauthorized() {
    let (status, json) = body(AppError::Unauthorized).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"], "unauthorized");
}

#[test]
fn test_store_error_transience() {
    assert!(StoreError::Transient("timeout".to_string()).is_transient());
    assert!(!StoreError::Fatal("bad request".to_string()).is_transient());
}
