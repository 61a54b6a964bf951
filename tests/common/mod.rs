// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use axum::body::Body;
use axum::http::{header, Request, Response};
use health_ingest::config::Config;
use health_ingest::routes::create_router;
use health_ingest::store::{MemoryStore, Store};
use health_ingest::AppState;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

pub const SECRET: &str = "test_webhook_secret";

/// Offline app: in-memory store, data dir in a temp directory.
pub struct TestApp {
    pub router: axum::Router,
    pub state: Arc<AppState>,
    /// Keeps the data directory alive for the test's duration.
    pub _dir: TempDir,
}

impl TestApp {
    #[allow(dead_code)]
    pub fn memory(&self) -> &MemoryStore {
        self.state
            .pipeline
            .store()
            .as_memory()
            .expect("test app uses the memory store")
    }

    /// POST a body to `/webhook` with the test secret.
    #[allow(dead_code)]
    pub async fn push(&self, body: impl Into<Body>) -> Response<Body> {
        self.router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhook")
                    .header(header::AUTHORIZATION, format!("Bearer {}", SECRET))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(body.into())
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    #[allow(dead_code)]
    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.router
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }
}

/// Create a test app with offline dependencies.
#[allow(dead_code)]
pub async fn create_test_app() -> TestApp {
    create_test_app_with(|_| {}).await
}

/// Create a test app, adjusting the config and store first.
#[allow(dead_code)]
pub async fn create_test_app_with(adjust: impl FnOnce(&mut Config)) -> TestApp {
    create_test_app_with_store(adjust, MemoryStore::new()).await
}

#[allow(dead_code)]
pub async fn create_test_app_with_store(
    adjust: impl FnOnce(&mut Config),
    store: MemoryStore,
) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::test_default();
    config.data_dir = dir.path().to_path_buf();
    adjust(&mut config);

    let state = Arc::new(
        AppState::build(config, Arc::new(Store::Memory(store)))
            .await
            .unwrap(),
    );
    TestApp {
        router: create_router(state.clone()),
        state,
        _dir: dir,
    }
}

/// Webhook export body with one metric series for one source.
#[allow(dead_code)]
pub fn export(metric: &str, source: &str, points: &[(&str, f64)]) -> Value {
    let data: Vec<Value> = points
        .iter()
        .map(|(date, qty)| json!({"date": date, "qty": qty, "source": source}))
        .collect();
    json!({
        "data": {
            "metrics": [{"name": metric, "units": "count/min", "data": data}],
            "workouts": []
        }
    })
}

#[allow(dead_code)]
pub async fn body_json(response: Response<Body>) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}
