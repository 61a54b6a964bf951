// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-process store used for dry runs and tests.

use super::point::{Point, RAW_MEASUREMENT};
use super::StoreError;
use crate::models::MetricKind;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;

type SeriesKey = (&'static str, Vec<(&'static str, String)>, DateTime<Utc>);

/// Upserting point store with failure injection.
#[derive(Default)]
pub struct MemoryStore {
    points: Mutex<BTreeMap<SeriesKey, Point>>,
    /// Any batch containing a point at one of these timestamps fails.
    fail_timestamps: Mutex<HashSet<DateTime<Utc>>>,
    /// Number of upcoming write calls that fail transiently.
    fail_next: AtomicUsize,
    /// Fail every write with a fatal error.
    fail_all: AtomicBool,
    /// Writes wait while set.
    paused: AtomicBool,
    resumed: Notify,
    write_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every batch that contains a point at `ts` fail transiently.
    pub fn set_fail_timestamps(&self, timestamps: impl IntoIterator<Item = DateTime<Utc>>) {
        let mut guard = self
            .fail_timestamps
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        guard.clear();
        guard.extend(timestamps);
    }

    /// Fail the next `n` write calls with a transient error.
    pub fn fail_next_writes(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn set_fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    /// Hold every write until `resume_writes`.
    pub fn pause_writes(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume_writes(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.resumed.notify_waiters();
    }

    /// Wait until writes are not paused.
    pub async fn wait_writable(&self) {
        loop {
            let resumed = self.resumed.notified();
            if !self.paused.load(Ordering::SeqCst) {
                return;
            }
            resumed.await;
        }
    }

    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    pub fn write(&self, points: &[Point]) -> Result<(), StoreError> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_all.load(Ordering::SeqCst) {
            return Err(StoreError::Fatal("store unavailable".to_string()));
        }
        if self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::Transient("injected failure".to_string()));
        }
        {
            let fail = self
                .fail_timestamps
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if let Some(p) = points.iter().find(|p| fail.contains(&p.timestamp)) {
                return Err(StoreError::Transient(format!(
                    "injected failure at {}",
                    p.timestamp
                )));
            }
        }

        let mut guard = self.points.lock().unwrap_or_else(|e| e.into_inner());
        for point in points {
            let key = (point.measurement, point.tags.clone(), point.timestamp);
            guard.insert(key, point.clone());
        }
        Ok(())
    }

    pub fn query_raw(
        &self,
        source: &str,
        metric: &MetricKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<(DateTime<Utc>, f64)>, StoreError> {
        let guard = self.points.lock().unwrap_or_else(|e| e.into_inner());
        Ok(guard
            .values()
            .filter(|p| {
                p.measurement == RAW_MEASUREMENT
                    && p.timestamp >= start
                    && p.timestamp < end
                    && p.tag_value("source") == Some(source)
                    && p.tag_value("metric_name") == Some(metric.as_str())
            })
            .filter_map(|p| p.field_f64("value").map(|v| (p.timestamp, v)))
            .collect())
    }

    /// All stored points of one measurement, ordered by tags then time.
    pub fn points(&self, measurement: &str) -> Vec<Point> {
        let guard = self.points.lock().unwrap_or_else(|e| e.into_inner());
        guard
            .values()
            .filter(|p| p.measurement == measurement)
            .cloned()
            .collect()
    }

    /// Find one point by measurement, `source`/`metric_name` tags and time.
    pub fn find(
        &self,
        measurement: &str,
        source: &str,
        metric: &str,
        timestamp: DateTime<Utc>,
    ) -> Option<Point> {
        self.points(measurement).into_iter().find(|p| {
            p.timestamp == timestamp
                && p.tag_value("source") == Some(source)
                && p.tag_value("metric_name") == Some(metric)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FieldValue;
    use chrono::TimeZone;

    fn raw(ts: DateTime<Utc>, value: f64) -> Point {
        Point::new(RAW_MEASUREMENT, ts)
            .tag("source", "Watch")
            .tag("metric_name", "heart_rate")
            .field("value", FieldValue::Float(value))
            .field("unit", FieldValue::Str("count/min".to_string()))
    }

    #[test]
    fn same_identity_overwrites() {
        let store = MemoryStore::new();
        let ts = Utc.with_ymd_and_hms(2025, 12, 8, 10, 15, 0).unwrap();
        store.write(&[raw(ts, 60.0)]).unwrap();
        store.write(&[raw(ts, 61.0)]).unwrap();

        let points = store.points(RAW_MEASUREMENT);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].field_f64("value"), Some(61.0));
    }

    #[test]
    fn query_raw_filters_series_and_range() {
        let store = MemoryStore::new();
        let t0 = Utc.with_ymd_and_hms(2025, 12, 8, 10, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2025, 12, 8, 10, 30, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2025, 12, 8, 11, 0, 0).unwrap();
        store
            .write(&[raw(t0, 1.0), raw(t1, 2.0), raw(t2, 3.0)])
            .unwrap();

        let rows = store
            .query_raw("Watch", &MetricKind::HeartRate, t0, t2)
            .unwrap();
        assert_eq!(rows, vec![(t0, 1.0), (t1, 2.0)]);

        let other = store
            .query_raw("Phone", &MetricKind::HeartRate, t0, t2)
            .unwrap();
        assert!(other.is_empty());
    }

    #[test]
    fn injected_failures() {
        let store = MemoryStore::new();
        let ts = Utc.with_ymd_and_hms(2025, 12, 8, 10, 15, 0).unwrap();

        store.fail_next_writes(1);
        assert!(store.write(&[raw(ts, 1.0)]).unwrap_err().is_transient());
        assert!(store.write(&[raw(ts, 1.0)]).is_ok());

        store.set_fail_timestamps([ts]);
        assert!(store.write(&[raw(ts, 1.0)]).is_err());

        store.set_fail_timestamps([]);
        store.set_fail_all(true);
        assert!(!store.write(&[raw(ts, 1.0)]).unwrap_err().is_transient());
        assert_eq!(store.write_calls(), 4);
    }

    #[tokio::test]
    async fn paused_writes_wait_for_resume() {
        let store = std::sync::Arc::new(MemoryStore::new());
        store.pause_writes();

        let waiter = {
            let store = store.clone();
            tokio::spawn(async move { store.wait_writable().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        store.resume_writes();
        waiter.await.unwrap();
        store.wait_writable().await;
    }
}
