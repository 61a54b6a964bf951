// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Per-source import watermarks.
//!
//! The tracker only filters. The pipeline moves a watermark forward after
//! the writer confirms a commit, and only ever forward.

use crate::models::MetricSample;
use crate::services::staging::durable_write;
use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Result of filtering one source's samples against its watermark.
#[derive(Debug, Default)]
pub struct Admission {
    pub admitted: Vec<MetricSample>,
    pub rejected: usize,
}

pub struct IncrementalTracker {
    watermarks: DashMap<String, DateTime<Utc>>,
    duplicate_window: Duration,
    /// Persisted snapshot location; `None` keeps watermarks in memory only.
    path: Option<PathBuf>,
    persist_lock: Mutex<()>,
}

impl IncrementalTracker {
    /// In-memory tracker.
    pub fn new(duplicate_window: Duration) -> Self {
        Self {
            watermarks: DashMap::new(),
            duplicate_window,
            path: None,
            persist_lock: Mutex::new(()),
        }
    }

    /// Tracker backed by a JSON file. A missing file starts empty.
    pub async fn load(path: &Path, duplicate_window: Duration) -> std::io::Result<Self> {
        let mut watermarks = DashMap::new();
        match tokio::fs::read(path).await {
            Ok(bytes) => {
                let saved: BTreeMap<String, DateTime<Utc>> = serde_json::from_slice(&bytes)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
                tracing::info!(
                    path = %path.display(),
                    sources = saved.len(),
                    "Loaded import watermarks"
                );
                watermarks.extend(saved);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        Ok(Self {
            watermarks,
            duplicate_window,
            path: Some(path.to_path_buf()),
            persist_lock: Mutex::new(()),
        })
    }

    pub fn duplicate_window(&self) -> Duration {
        self.duplicate_window
    }

    pub fn watermark(&self, source: &str) -> Option<DateTime<Utc>> {
        self.watermarks.get(source).map(|w| *w)
    }

    /// Samples at or before this instant are treated as already committed.
    ///
    /// `None` when nothing is committed yet, or the window reaches past the
    /// start of representable time.
    pub fn cutoff(&self, source: &str) -> Option<DateTime<Utc>> {
        self.watermark(source)
            .and_then(|w| w.checked_sub_signed(self.duplicate_window))
    }

    /// Drop samples that are already committed for `source`.
    pub fn admit(&self, source: &str, samples: Vec<MetricSample>) -> Admission {
        let Some(cutoff) = self.cutoff(source) else {
            return Admission {
                admitted: samples,
                rejected: 0,
            };
        };

        let total = samples.len();
        let admitted: Vec<_> = samples
            .into_iter()
            .filter(|s| s.timestamp > cutoff)
            .collect();
        let rejected = total - admitted.len();
        if rejected > 0 {
            tracing::debug!(source, rejected, %cutoff, "Rejected already-committed samples");
        }

        Admission { admitted, rejected }
    }

    /// Move the watermark forward to `committed_max`. Returns whether it moved.
    pub async fn advance(
        &self,
        source: &str,
        committed_max: DateTime<Utc>,
    ) -> std::io::Result<bool> {
        let moved = match self.watermarks.entry(source.to_string()) {
            Entry::Occupied(mut e) => {
                if committed_max > *e.get() {
                    e.insert(committed_max);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(e) => {
                e.insert(committed_max);
                true
            }
        };

        if moved {
            tracing::debug!(source, watermark = %committed_max, "Advanced watermark");
            self.persist().await?;
        }
        Ok(moved)
    }

    pub fn snapshot(&self) -> BTreeMap<String, DateTime<Utc>> {
        self.watermarks
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect()
    }

    async fn persist(&self) -> std::io::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let _guard = self.persist_lock.lock().await;
        // Snapshot under the lock so the last writer always saves the newest state.
        let bytes = serde_json::to_vec_pretty(&self.snapshot())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        durable_write(path, &bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MetricKind;
    use chrono::TimeZone;

    fn sample(ts: DateTime<Utc>) -> MetricSample {
        MetricSample {
            metric: MetricKind::HeartRate,
            source: "Watch".to_string(),
            timestamp: ts,
            value: 60.0,
            unit: "count/min".to_string(),
            utc_offset_secs: 0,
        }
    }

    #[test]
    fn admits_everything_without_watermark() {
        let tracker = IncrementalTracker::new(Duration::hours(48));
        let ts = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let a = tracker.admit("Watch", vec![sample(ts)]);
        assert_eq!(a.admitted.len(), 1);
        assert_eq!(a.rejected, 0);
    }

    #[tokio::test]
    async fn rejects_at_or_before_cutoff() {
        let tracker = IncrementalTracker::new(Duration::hours(48));
        let wm = Utc.with_ymd_and_hms(2025, 12, 10, 0, 0, 0).unwrap();
        tracker.advance("Watch", wm).await.unwrap();

        let cutoff = wm - Duration::hours(48);
        let a = tracker.admit(
            "Watch",
            vec![
                sample(cutoff - Duration::seconds(1)),
                sample(cutoff),
                sample(cutoff + Duration::seconds(1)),
                sample(wm),
            ],
        );
        assert_eq!(a.admitted.len(), 2);
        assert_eq!(a.rejected, 2);

        // other sources unaffected
        let b = tracker.admit("Phone", vec![sample(cutoff - Duration::days(10))]);
        assert_eq!(b.admitted.len(), 1);
    }

    #[tokio::test]
    async fn window_longer_than_history_admits_everything() {
        let tracker = IncrementalTracker::new(Duration::MAX);
        let wm = Utc.with_ymd_and_hms(2025, 12, 10, 0, 0, 0).unwrap();
        tracker.advance("Watch", wm).await.unwrap();

        assert_eq!(tracker.cutoff("Watch"), None);
        let a = tracker.admit("Watch", vec![sample(wm - Duration::days(3650))]);
        assert_eq!(a.admitted.len(), 1);
    }

    #[tokio::test]
    async fn advance_never_regresses() {
        let tracker = IncrementalTracker::new(Duration::hours(1));
        let t1 = Utc.with_ymd_and_hms(2025, 12, 10, 0, 0, 0).unwrap();
        let t0 = t1 - Duration::hours(5);

        assert!(tracker.advance("Watch", t1).await.unwrap());
        assert!(!tracker.advance("Watch", t0).await.unwrap());
        assert!(!tracker.advance("Watch", t1).await.unwrap());
        assert_eq!(tracker.watermark("Watch"), Some(t1));
    }

    #[tokio::test]
    async fn persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watermarks.json");
        let ts = Utc.with_ymd_and_hms(2025, 12, 10, 8, 30, 0).unwrap();

        {
            let tracker = IncrementalTracker::load(&path, Duration::hours(48))
                .await
                .unwrap();
            assert!(tracker.snapshot().is_empty());
            tracker.advance("Apple Watch", ts).await.unwrap();
        }

        let reloaded = IncrementalTracker::load(&path, Duration::hours(48))
            .await
            .unwrap();
        assert_eq!(reloaded.watermark("Apple Watch"), Some(ts));
    }
}
