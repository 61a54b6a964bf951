// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Batched, retrying writes to the time-series store.
//!
//! Points are chunked to the configured batch size and sent with at most
//! `max_in_flight_batches` requests outstanding across the whole process.
//! Transient failures back off exponentially. A batch that still fails is
//! split and each record retried alone, so one bad record does not sink
//! its neighbours.

use crate::config::Config;
use crate::models::MetricKind;
use crate::store::{Point, Store, StoreError};
use chrono::{DateTime, Utc};
use futures_util::{stream, StreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Split-batch fallback gives up once this many records in a row fail
/// before any succeeds; the store is down rather than rejecting a record.
const SPLIT_ABORT_AFTER: usize = 3;

/// Retry policy for store calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.max_write_attempts.max(1),
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
            attempt_timeout: config.write_timeout(),
        }
    }

    /// Delay before retry number `attempt` (1-based): base * 2^(attempt-1), capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Per-point result of a write, index aligned with the input.
#[derive(Debug, Default)]
pub struct WriteOutcome {
    pub confirmed: Vec<bool>,
    /// Distinct error messages seen, for reporting.
    pub errors: Vec<String>,
}

impl WriteOutcome {
    pub fn committed(&self) -> usize {
        self.confirmed.iter().filter(|ok| **ok).count()
    }

    pub fn failed(&self) -> usize {
        self.confirmed.len() - self.committed()
    }

    fn note(&mut self, err: &StoreError) {
        let msg = err.to_string();
        if !self.errors.contains(&msg) {
            self.errors.push(msg);
        }
    }
}

pub struct StorageWriter {
    store: Arc<Store>,
    permits: Arc<Semaphore>,
    batch_size: usize,
    max_in_flight: usize,
    policy: RetryPolicy,
}

impl StorageWriter {
    pub fn new(store: Arc<Store>, config: &Config) -> Self {
        Self {
            store,
            permits: Arc::new(Semaphore::new(config.max_in_flight_batches.max(1))),
            batch_size: config.batch_size.max(1),
            max_in_flight: config.max_in_flight_batches.max(1),
            policy: RetryPolicy::from_config(config),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Write all points, reporting which ones were confirmed.
    pub async fn write_points(&self, points: &[Point]) -> WriteOutcome {
        let mut outcome = WriteOutcome {
            confirmed: vec![false; points.len()],
            errors: Vec::new(),
        };
        if points.is_empty() {
            return outcome;
        }

        // Futures are built up front so the stream holds no closure over `self`.
        let batches: Vec<_> = points
            .chunks(self.batch_size)
            .enumerate()
            .map(|(i, chunk)| self.write_chunk_at(i * self.batch_size, chunk))
            .collect();
        let results: Vec<(usize, Vec<bool>, Vec<StoreError>)> = stream::iter(batches)
            .buffer_unordered(self.max_in_flight)
            .collect()
            .await;

        for (offset, ok, errs) in results {
            for (j, confirmed) in ok.into_iter().enumerate() {
                outcome.confirmed[offset + j] = confirmed;
            }
            for err in &errs {
                outcome.note(err);
            }
        }

        if outcome.failed() > 0 {
            tracing::warn!(
                committed = outcome.committed(),
                failed = outcome.failed(),
                errors = ?outcome.errors,
                "Some points were not committed"
            );
        }
        outcome
    }

    /// Raw values for one series, retried like a write.
    pub async fn query_raw(
        &self,
        source: &str,
        metric: &MetricKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<(DateTime<Utc>, f64)>, StoreError> {
        self.with_retry("query", move || self.store.query_raw(source, metric, start, end))
            .await
    }

    async fn write_chunk_at(
        &self,
        offset: usize,
        chunk: &[Point],
    ) -> (usize, Vec<bool>, Vec<StoreError>) {
        let (ok, errs) = self.write_chunk(chunk).await;
        (offset, ok, errs)
    }

    async fn write_chunk(&self, chunk: &[Point]) -> (Vec<bool>, Vec<StoreError>) {
        let err = match self.with_retry("batch", move || self.store.write(chunk)).await {
            Ok(()) => return (vec![true; chunk.len()], Vec::new()),
            Err(e) => e,
        };
        if chunk.len() == 1 {
            return (vec![false], vec![err]);
        }

        tracing::warn!(
            points = chunk.len(),
            error = %err,
            "Batch failed; retrying per record"
        );

        let mut ok = vec![false; chunk.len()];
        let mut errs = vec![err];
        let mut any_success = false;
        let mut consecutive_failures = 0;
        for (i, point) in chunk.iter().enumerate() {
            if !any_success && consecutive_failures >= SPLIT_ABORT_AFTER {
                tracing::error!(
                    remaining = chunk.len() - i,
                    "Store rejecting every record; abandoning batch"
                );
                break;
            }
            match self
                .with_retry("record", move || self.store.write(std::slice::from_ref(point)))
                .await
            {
                Ok(()) => {
                    ok[i] = true;
                    any_success = true;
                    consecutive_failures = 0;
                }
                Err(e) => {
                    tracing::warn!(
                        measurement = point.measurement,
                        timestamp = %point.timestamp,
                        error = %e,
                        "Record failed after retries"
                    );
                    consecutive_failures += 1;
                    errs.push(e);
                }
            }
        }
        (ok, errs)
    }

    /// Run a store call with a per-attempt deadline, retrying transient
    /// failures with exponential backoff. Each attempt holds an in-flight permit.
    async fn with_retry<T, F, Fut>(&self, what: &'static str, mut op: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut attempt = 1;
        loop {
            let result = {
                let _permit = self
                    .permits
                    .acquire()
                    .await
                    .map_err(|e| StoreError::Fatal(format!("writer closed: {}", e)))?;
                match tokio::time::timeout(self.policy.attempt_timeout, op()).await {
                    Ok(r) => r,
                    Err(_) => Err(StoreError::Transient(format!(
                        "{} attempt timed out after {:?}",
                        what, self.policy.attempt_timeout
                    ))),
                }
            };

            match result {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.backoff(attempt);
                    tracing::debug!(
                        what,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient store error; backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
