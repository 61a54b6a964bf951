// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Integration tests for webhook handling.

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use health_ingest::config::ProcessingMode;
use health_ingest::store::{MemoryStore, RAW_MEASUREMENT};
use tower::ServiceExt;

mod common;
use common::{body_json, create_test_app, create_test_app_with, create_test_app_with_store, export};

fn heart_rate_body() -> Vec<u8> {
    serde_json::to_vec(&export(
        "heart_rate",
        "Apple Watch",
        &[
            ("2025-12-08 10:15:00 +0000", 60.0),
            ("2025-12-08 10:45:00 +0000", 70.0),
        ],
    ))
    .unwrap()
}

async fn staged_files(app: &common::TestApp) -> usize {
    let mut entries = tokio::fs::read_dir(app.state.config.staging_dir())
        .await
        .unwrap();
    let mut n = 0;
    while let Some(e) = entries.next_entry().await.unwrap() {
        if e.file_name().to_string_lossy().ends_with(".json") {
            n += 1;
        }
    }
    n
}

#[tokio::test]
async fn test_health_check() {
    let app = create_test_app().await;
    let response = app.get("/health").await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["service"], "health-auto-export-webhook");
}

#[tokio::test]
async fn test_root_describes_endpoints() {
    let app = create_test_app().await;
    let response = app.get("/").await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["endpoints"]["POST /webhook"].is_string());
    assert!(json["endpoints"]["GET /health"].is_string());
}

#[tokio::test]
async fn test_missing_token_is_rejected_before_staging() {
    let app = create_test_app().await;

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhook")
                .body(Body::from(heart_rate_body()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error"], "unauthorized");
    assert!(app.state.stager.is_empty());
    assert_eq!(staged_files(&app).await, 0);
}

#[tokio::test]
async fn test_wrong_token_is_rejected() {
    let app = create_test_app().await;

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhook")
                .header(header::AUTHORIZATION, "Bearer not_the_secret")
                .body(Body::from(heart_rate_body()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(app.memory().points(RAW_MEASUREMENT).is_empty());
}

#[tokio::test]
async fn test_no_secret_configured_allows_push() {
    let app = create_test_app_with(|c| c.webhook_secret = None).await;

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhook")
                .body(Body::from(heart_rate_body()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_valid_push_is_staged_and_imported() {
    let app = create_test_app().await;

    let response = app.push(heart_rate_body()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ok");

    assert_eq!(staged_files(&app).await, 1);
    assert_eq!(app.memory().points(RAW_MEASUREMENT).len(), 2);
    assert!(app.state.pipeline.tracker().watermark("Apple Watch").is_some());
}

#[tokio::test]
async fn test_duplicate_push_is_a_noop() {
    let app = create_test_app().await;

    assert_eq!(app.push(heart_rate_body()).await.status(), StatusCode::OK);
    let calls = app.memory().write_calls();

    let response = app.push(heart_rate_body()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ok");

    assert_eq!(staged_files(&app).await, 1);
    assert_eq!(app.memory().write_calls(), calls);
    assert_eq!(app.memory().points(RAW_MEASUREMENT).len(), 2);
}

#[tokio::test]
async fn test_invalid_json_is_bad_request() {
    let app = create_test_app().await;

    let response = app.push("{not json").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"], "bad_request");
    assert!(json["details"].is_string());
    assert_eq!(staged_files(&app).await, 0);
}

#[tokio::test]
async fn test_document_without_sections_is_bad_request() {
    let app = create_test_app().await;

    let response = app.push(r#"{"data": {"something": []}}"#).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(staged_files(&app).await, 0);

    let response = app.push("").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_oversized_body_is_refused() {
    let app = create_test_app_with(|c| c.max_body_bytes = 1024).await;

    let response = app.push(vec![b' '; 4096]).await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(staged_files(&app).await, 0);
}

#[tokio::test]
async fn test_store_failure_still_acknowledges() {
    let store = MemoryStore::new();
    store.set_fail_all(true);
    let app = create_test_app_with_store(|_| {}, store).await;

    let response = app.push(heart_rate_body()).await;
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(staged_files(&app).await, 1);
    let failures = app.state.failures.read_all().await.unwrap();
    assert_eq!(failures.len(), 1);
    assert!(failures[0]
        .staged_file
        .starts_with(app.state.config.staging_dir()));
    assert_eq!(app.state.pipeline.tracker().watermark("Apple Watch"), None);
}

#[tokio::test]
async fn test_queued_mode_processes_in_background() {
    let app = create_test_app_with(|c| c.processing_mode = ProcessingMode::Queued).await;

    let response = app.push(heart_rate_body()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(staged_files(&app).await, 1);

    // Shutdown waits for the queued payload.
    app.state.queue.shutdown().await;
    assert_eq!(app.memory().points(RAW_MEASUREMENT).len(), 2);
    assert!(app.state.failures.read_all().await.unwrap().is_empty());
}

fn reading_body(source: &str, minute: u32) -> Vec<u8> {
    let date = format!("2025-12-08 10:{:02}:00 +0000", minute);
    serde_json::to_vec(&export("heart_rate", source, &[(date.as_str(), 60.0)])).unwrap()
}

#[tokio::test]
async fn test_full_queue_acknowledges_and_logs_for_replay() {
    let store = MemoryStore::new();
    store.pause_writes();
    let app = create_test_app_with_store(
        |c| {
            c.processing_mode = ProcessingMode::Queued;
            c.workers = 1;
            c.queue_capacity = 1;
        },
        store,
    )
    .await;

    // One payload blocks the only worker, one fills the queue.
    for minute in 0..3 {
        let response = app.push(reading_body("Apple Watch", minute)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
    assert_eq!(staged_files(&app).await, 3);

    let failures = app.state.failures.read_all().await.unwrap();
    assert!(!failures.is_empty());
    assert!(failures
        .iter()
        .all(|f| f.error == "processing queue is full"));

    app.memory().resume_writes();
    app.state.queue.shutdown().await;
    let processed = app.memory().points(RAW_MEASUREMENT).len();
    assert_eq!(processed + failures.len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_pushes_from_spawned_tasks() {
    let app = create_test_app().await;
    let sources = ["Apple Watch", "iPhone", "Oura"];

    let handles: Vec<_> = sources
        .iter()
        .enumerate()
        .map(|(i, source)| {
            let router = app.router.clone();
            let body = reading_body(source, i as u32);
            tokio::spawn(async move {
                router
                    .oneshot(
                        Request::builder()
                            .method("POST")
                            .uri("/webhook")
                            .header(header::AUTHORIZATION, format!("Bearer {}", common::SECRET))
                            .header(header::CONTENT_TYPE, "application/json")
                            .body(Body::from(body))
                            .unwrap(),
                    )
                    .await
                    .unwrap()
            })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.await.unwrap().status(), StatusCode::OK);
    }

    assert_eq!(staged_files(&app).await, sources.len());
    assert_eq!(app.memory().points(RAW_MEASUREMENT).len(), sources.len());
    for source in sources {
        assert!(app.state.pipeline.tracker().watermark(source).is_some());
    }
}
