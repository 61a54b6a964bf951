// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Time-series store contract.
//!
//! The pipeline only needs two things from the store: batched point writes
//! (idempotent upserts keyed by measurement, tags and timestamp) and a query
//! for the raw samples of one series over a time range.

pub mod influx;
pub mod memory;
pub mod point;

pub use influx::InfluxStore;
pub use memory::MemoryStore;
pub use point::{FieldValue, Point, RAW_MEASUREMENT};

use crate::config::Config;
use crate::models::MetricKind;
use chrono::{DateTime, Utc};

/// Store errors, split by whether a retry can help.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// Timeout, connection reset, 5xx, 429.
    #[error("Transient storage error: {0}")]
    Transient(String),

    #[error("Fatal storage error: {0}")]
    Fatal(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

/// Store backend.
///
/// Enum dispatch keeps the async calls monomorphic; there are only ever
/// these two backends.
pub enum Store {
    Influx(InfluxStore),
    Memory(MemoryStore),
}

impl Store {
    /// Build the store described by the configuration.
    ///
    /// Without an InfluxDB URL the pipeline runs against an in-process store.
    pub fn from_config(config: &Config) -> Result<Self, StoreError> {
        match &config.influx_url {
            Some(url) => Ok(Store::Influx(InfluxStore::new(
                url,
                config.influx_token.as_deref().unwrap_or_default(),
                config.influx_org.as_deref().unwrap_or_default(),
                &config.influx_bucket,
                config.write_timeout(),
            )?)),
            None => {
                tracing::warn!("INFLUXDB_URL not set; using in-memory store");
                Ok(Store::Memory(MemoryStore::new()))
            }
        }
    }

    /// Returns the backend name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Store::Influx(_) => "influxdb",
            Store::Memory(_) => "memory",
        }
    }

    /// Write a batch of points. All or nothing from the caller's view.
    pub async fn write(&self, points: &[Point]) -> Result<(), StoreError> {
        match self {
            Store::Influx(s) => s.write(points).await,
            Store::Memory(s) => {
                s.wait_writable().await;
                s.write(points)
            }
        }
    }

    /// Raw `(timestamp, value)` pairs of one series in `[start, end)`.
    pub async fn query_raw(
        &self,
        source: &str,
        metric: &MetricKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<(DateTime<Utc>, f64)>, StoreError> {
        match self {
            Store::Influx(s) => s.query_raw(source, metric, start, end).await,
            Store::Memory(s) => s.query_raw(source, metric, start, end),
        }
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        match self {
            Store::Influx(s) => s.ping().await,
            Store::Memory(_) => Ok(()),
        }
    }

    /// The in-memory backend, if that is what this is.
    pub fn as_memory(&self) -> Option<&MemoryStore> {
        match self {
            Store::Memory(s) => Some(s),
            Store::Influx(_) => None,
        }
    }
}
