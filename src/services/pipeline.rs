// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Ingestion pipeline: parse, filter, write raw, aggregate, advance.
//!
//! Each source has its own lock around its aggregator state and its
//! commit/advance step. Different sources run in parallel.

use crate::config::Config;
use crate::error::PipelineError;
use crate::models::{AggregateBucket, BucketKey, Granularity, MetricKind, MetricSample, WorkoutRecord};
use crate::services::aggregator::Aggregator;
use crate::services::parser::{self, ParseReport, ParsedDocument};
use crate::services::tracker::{Admission, IncrementalTracker};
use crate::services::writer::StorageWriter;
use crate::store::point::WORKOUT_MEASUREMENT;
use crate::store::{Point, Store, StoreError};
use crate::time_utils::hours;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use futures_util::{stream, StreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Max sources processed concurrently within one document.
const MAX_CONCURRENT_SOURCES: usize = 4;

/// Which destinations a run writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteTargets {
    pub raw: bool,
    pub hourly: bool,
    pub daily: bool,
}

impl WriteTargets {
    pub fn from_config(config: &Config) -> Self {
        Self {
            raw: config.write_raw,
            hourly: config.write_hourly,
            daily: config.write_daily,
        }
    }

    fn granularities(&self) -> Vec<Granularity> {
        let mut out = Vec::new();
        if self.hourly {
            out.push(Granularity::Hourly);
        }
        if self.daily {
            out.push(Granularity::Daily);
        }
        out
    }
}

/// What happened to one source's samples.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SourceReport {
    pub source: String,
    pub admitted: usize,
    pub rejected: usize,
    pub raw_committed: usize,
    pub raw_failed: usize,
    pub late_dropped: usize,
    pub buckets_written: usize,
    pub buckets_failed: usize,
    pub watermark: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SourceReport {
    fn is_complete(&self) -> bool {
        self.raw_failed == 0 && self.buckets_failed == 0 && self.error.is_none()
    }
}

/// Outcome of one pipeline run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineReport {
    pub parse: ParseReport,
    pub sources: Vec<SourceReport>,
    pub workouts_written: usize,
    pub workout_points_failed: usize,
}

impl PipelineReport {
    /// Whether everything admitted was committed.
    pub fn is_complete(&self) -> bool {
        self.workout_points_failed == 0 && self.sources.iter().all(SourceReport::is_complete)
    }

    /// One-line description of what did not commit.
    pub fn failure_summary(&self) -> Option<String> {
        if self.is_complete() {
            return None;
        }
        let mut parts = Vec::new();
        for s in self.sources.iter().filter(|s| !s.is_complete()) {
            match &s.error {
                Some(e) => parts.push(format!("{}: {}", s.source, e)),
                None => parts.push(format!(
                    "{}: {} raw and {} aggregate points not committed",
                    s.source, s.raw_failed, s.buckets_failed
                )),
            }
        }
        if self.workout_points_failed > 0 {
            parts.push(format!(
                "workouts: {} points not committed",
                self.workout_points_failed
            ));
        }
        Some(parts.join("; "))
    }
}

pub struct Pipeline {
    writer: StorageWriter,
    tracker: IncrementalTracker,
    aggregators: DashMap<String, Arc<Mutex<Aggregator>>>,
    lateness: Duration,
    targets: WriteTargets,
}

impl Pipeline {
    pub fn new(
        writer: StorageWriter,
        tracker: IncrementalTracker,
        lateness: Duration,
        targets: WriteTargets,
    ) -> Self {
        Self {
            writer,
            tracker,
            aggregators: DashMap::new(),
            lateness,
            targets,
        }
    }

    /// Build a pipeline from configuration, loading persisted watermarks.
    pub async fn from_config(config: &Config, store: Arc<Store>) -> Result<Self, PipelineError> {
        let tracker = IncrementalTracker::load(
            &config.watermark_path(),
            hours(config.duplicate_window_hours),
        )
        .await?;

        Ok(Self::new(
            StorageWriter::new(store, config),
            tracker,
            hours(config.lateness_tolerance_hours),
            WriteTargets::from_config(config),
        ))
    }

    pub fn tracker(&self) -> &IncrementalTracker {
        &self.tracker
    }

    pub fn store(&self) -> &Store {
        self.writer.store()
    }

    /// Parse and process raw payload bytes.
    pub async fn process_bytes(&self, bytes: &[u8]) -> Result<PipelineReport, PipelineError> {
        let doc = parser::parse_bytes(bytes)?;
        Ok(self.process_document(doc, Utc::now()).await)
    }

    /// Process an already parsed document as of `now`.
    pub async fn process_document(&self, doc: ParsedDocument, now: DateTime<Utc>) -> PipelineReport {
        let ParsedDocument {
            samples,
            workouts,
            report: parse,
        } = doc;

        if !parse.failures.is_empty() {
            tracing::warn!(
                failures = parse.failures.len(),
                "Skipped invalid records"
            );
        }

        let mut by_source: BTreeMap<String, Vec<MetricSample>> = BTreeMap::new();
        for sample in samples {
            by_source
                .entry(sample.source.clone())
                .or_default()
                .push(sample);
        }

        // Futures are built up front so the stream holds no closure over `self`.
        let runs: Vec<_> = by_source
            .into_iter()
            .map(|(source, samples)| self.process_source(source, samples, now))
            .collect();
        let sources: Vec<SourceReport> = stream::iter(runs)
            .buffer_unordered(MAX_CONCURRENT_SOURCES)
            .collect()
            .await;

        let (workouts_written, workout_points_failed) = self.write_workouts(&workouts).await;

        let mut report = PipelineReport {
            parse,
            sources,
            workouts_written,
            workout_points_failed,
        };
        report.sources.sort_by(|a, b| a.source.cmp(&b.source));

        tracing::info!(
            samples = report.parse.samples,
            sources = report.sources.len(),
            workouts = report.workouts_written,
            complete = report.is_complete(),
            "Pipeline run finished"
        );
        report
    }

    fn aggregator_for(&self, source: &str) -> Arc<Mutex<Aggregator>> {
        self.aggregators
            .entry(source.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(Aggregator::new(
                    self.lateness,
                    &self.targets.granularities(),
                )))
            })
            .clone()
    }

    async fn process_source(
        &self,
        source: String,
        samples: Vec<MetricSample>,
        now: DateTime<Utc>,
    ) -> SourceReport {
        let lock = self.aggregator_for(&source);
        let mut agg = lock.lock().await;

        let Admission { admitted, rejected } = self.tracker.admit(&source, samples);
        let mut report = SourceReport {
            source: source.clone(),
            admitted: admitted.len(),
            rejected,
            watermark: self.tracker.watermark(&source),
            ..Default::default()
        };
        if admitted.is_empty() {
            return report;
        }

        // Seed buckets this process has no state for, before anything is written.
        if agg.is_enabled() {
            if let Err(e) = self.hydrate(&mut agg, &admitted).await {
                tracing::error!(
                    source = %source,
                    error = %e,
                    "Could not load bucket history; nothing written for source"
                );
                report.error = Some(e.to_string());
                return report;
            }
        }

        // Closed buckets refuse the sample outright, raw included.
        let (accepted, late) = agg.reject_late(admitted, now);
        report.late_dropped = late;

        let confirmed: Vec<MetricSample> = if self.targets.raw {
            let points: Vec<Point> = accepted.iter().map(Point::from_sample).collect();
            let outcome = self.writer.write_points(&points).await;
            report.raw_committed = outcome.committed();
            report.raw_failed = outcome.failed();
            accepted
                .into_iter()
                .zip(outcome.confirmed)
                .filter_map(|(s, ok)| ok.then_some(s))
                .collect()
        } else {
            accepted
        };

        agg.ingest(&confirmed);

        let buckets = agg.drain_dirty();
        if !buckets.is_empty() {
            let points: Vec<Point> = buckets.iter().map(Point::from_bucket).collect();
            let outcome = self.writer.write_points(&points).await;
            report.buckets_written = outcome.committed();
            report.buckets_failed = outcome.failed();

            let keys: Vec<BucketKey> = buckets.iter().map(AggregateBucket::key).collect();
            agg.record_flush(keys.iter().zip(outcome.confirmed.iter().copied()));
        }
        let evicted = agg.evict_closed(now);

        // Without raw writes the rollups are the commit.
        let advance_to = if self.targets.raw || report.buckets_failed == 0 {
            confirmed.iter().map(|s| s.timestamp).max()
        } else {
            None
        };
        if let Some(max) = advance_to {
            if let Err(e) = self.tracker.advance(&source, max).await {
                tracing::error!(source = %source, error = %e, "Failed to persist watermark");
                report.error = Some(format!("watermark persistence: {}", e));
            }
        }
        report.watermark = self.tracker.watermark(&source);

        tracing::info!(
            source = %source,
            admitted = report.admitted,
            rejected = report.rejected,
            raw_committed = report.raw_committed,
            raw_failed = report.raw_failed,
            late_dropped = report.late_dropped,
            buckets = report.buckets_written,
            evicted,
            open_buckets = agg.open_buckets(),
            retained_values = agg.retained_values(),
            "Source processed"
        );
        report
    }

    /// Load committed raw values for every bucket the samples touch that the
    /// aggregator holds no state for. Adjacent buckets of one series share a
    /// single range query.
    async fn hydrate(&self, agg: &mut Aggregator, samples: &[MetricSample]) -> Result<(), StoreError> {
        let mut by_series: BTreeMap<(String, MetricKind), Vec<BucketKey>> = BTreeMap::new();
        for key in agg.missing_buckets(samples) {
            by_series
                .entry((key.source.clone(), key.metric.clone()))
                .or_default()
                .push(key);
        }

        for ((source, metric), mut keys) in by_series {
            keys.sort_by_key(|k| k.bucket_start);
            for (start, end) in coalesce(&keys) {
                let mut rows = self.writer.query_raw(&source, &metric, start, end).await?;
                rows.sort_by_key(|(ts, _)| *ts);
                for key in keys.iter().filter(|k| k.bucket_start >= start && k.bucket_end() <= end) {
                    let lo = rows.partition_point(|(ts, _)| *ts < key.bucket_start);
                    let hi = rows.partition_point(|(ts, _)| *ts < key.bucket_end());
                    agg.seed(key, rows[lo..hi].iter().copied());
                }
                tracing::debug!(
                    source = %source,
                    metric = %metric,
                    %start,
                    %end,
                    rows = rows.len(),
                    "Hydrated buckets from storage"
                );
            }
        }
        Ok(())
    }

    /// Workouts are idempotent upserts keyed by workout ID; they bypass the
    /// watermark filter.
    async fn write_workouts(&self, workouts: &[WorkoutRecord]) -> (usize, usize) {
        if workouts.is_empty() {
            return (0, 0);
        }

        let mut points = Vec::new();
        for record in workouts {
            points.push(Point::from_workout(&record.workout));
            points.extend(
                record
                    .samples
                    .iter()
                    .filter(|s| !s.is_empty())
                    .map(Point::from_workout_sample),
            );
        }

        let outcome = self.writer.write_points(&points).await;
        let summaries_written = points
            .iter()
            .zip(&outcome.confirmed)
            .filter(|(p, ok)| **ok && p.measurement == WORKOUT_MEASUREMENT)
            .count();
        (summaries_written, outcome.failed())
    }
}

/// Merge overlapping or touching bucket spans (sorted by start) into
/// query ranges.
fn coalesce(keys: &[BucketKey]) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let mut ranges: Vec<(DateTime<Utc>, DateTime<Utc>)> = Vec::new();
    for key in keys {
        let (start, end) = (key.bucket_start, key.bucket_end());
        match ranges.last_mut() {
            Some((_, last_end)) if start <= *last_end => *last_end = (*last_end).max(end),
            _ => ranges.push((start, end)),
        }
    }
    ranges
}

/// Summary counts for a parsed document without touching storage.
pub fn dry_run_report(doc: &ParsedDocument) -> PipelineReport {
    let mut by_source: BTreeMap<&str, usize> = BTreeMap::new();
    for s in &doc.samples {
        *by_source.entry(s.source.as_str()).or_default() += 1;
    }
    PipelineReport {
        parse: doc.report.clone(),
        sources: by_source
            .into_iter()
            .map(|(source, n)| SourceReport {
                source: source.to_string(),
                admitted: n,
                ..Default::default()
            })
            .collect(),
        workouts_written: 0,
        workout_points_failed: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::point::WORKOUT_SAMPLE_MEASUREMENT;
    use crate::store::{MemoryStore, RAW_MEASUREMENT};
    use chrono::TimeZone;
    use serde_json::json;

    const ALL: WriteTargets = WriteTargets {
        raw: true,
        hourly: true,
        daily: true,
    };

    fn pipeline(store: Arc<Store>, targets: WriteTargets) -> Pipeline {
        let config = Config::test_default();
        Pipeline::new(
            StorageWriter::new(store, &config),
            IncrementalTracker::new(Duration::hours(48)),
            Duration::hours(24),
            targets,
        )
    }

    fn memory() -> Arc<Store> {
        Arc::new(Store::Memory(MemoryStore::new()))
    }

    fn heart_rate(points: &[(&str, f64)]) -> ParsedDocument {
        let data: Vec<_> = points
            .iter()
            .map(|(date, qty)| json!({"date": date, "qty": qty, "source": "Watch"}))
            .collect();
        parser::parse_document(&json!({
            "data": {"metrics": [{"name": "heart_rate", "units": "count/min", "data": data}]}
        }))
        .unwrap()
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 12, 8, h, m, 0).unwrap()
    }

    #[tokio::test]
    async fn raw_and_rollups_are_written() {
        let p = pipeline(memory(), ALL);
        let doc = heart_rate(&[
            ("2025-12-08 10:15:00 +0000", 60.0),
            ("2025-12-08 10:45:00 +0000", 70.0),
        ]);

        let report = p.process_document(doc, at(11, 0)).await;
        assert!(report.is_complete());
        assert_eq!(report.sources.len(), 1);
        assert_eq!(report.sources[0].raw_committed, 2);
        assert_eq!(report.sources[0].buckets_written, 2);
        assert_eq!(p.tracker().watermark("Watch"), Some(at(10, 45)));

        let mem = p.store().as_memory().unwrap();
        assert_eq!(mem.points(RAW_MEASUREMENT).len(), 2);
        let hourly = mem
            .find(
                Granularity::Hourly.measurement(),
                "Watch",
                "heart_rate",
                at(10, 0),
            )
            .unwrap();
        assert_eq!(hourly.field_f64("avg"), Some(65.0));
        let daily = mem
            .find(Granularity::Daily.measurement(), "Watch", "heart_rate", at(0, 0))
            .unwrap();
        assert_eq!(daily.field_f64("count"), Some(2.0));
    }

    #[tokio::test]
    async fn restart_hydrates_bucket_from_store() {
        let store = memory();
        let first = pipeline(store.clone(), ALL);
        first
            .process_document(heart_rate(&[("2025-12-08 10:15:00 +0000", 60.0)]), at(11, 0))
            .await;

        // fresh process, same storage, watermark lost
        let second = pipeline(store.clone(), ALL);
        second
            .process_document(heart_rate(&[("2025-12-08 10:45:00 +0000", 70.0)]), at(11, 0))
            .await;

        let hourly = store
            .as_memory()
            .unwrap()
            .find(
                Granularity::Hourly.measurement(),
                "Watch",
                "heart_rate",
                at(10, 0),
            )
            .unwrap();
        assert_eq!(hourly.field_f64("count"), Some(2.0));
        assert_eq!(hourly.field_f64("sum"), Some(130.0));
    }

    #[tokio::test]
    async fn rollups_only_when_raw_disabled() {
        let p = pipeline(
            memory(),
            WriteTargets {
                raw: false,
                hourly: true,
                daily: false,
            },
        );
        let report = p
            .process_document(heart_rate(&[("2025-12-08 10:15:00 +0000", 60.0)]), at(11, 0))
            .await;

        assert_eq!(report.sources[0].raw_committed, 0);
        assert_eq!(report.sources[0].buckets_written, 1);
        let mem = p.store().as_memory().unwrap();
        assert!(mem.points(RAW_MEASUREMENT).is_empty());
        assert!(mem.points(Granularity::Daily.measurement()).is_empty());
        assert_eq!(p.tracker().watermark("Watch"), Some(at(10, 15)));
    }

    #[tokio::test]
    async fn store_outage_keeps_watermark() {
        let store = memory();
        store.as_memory().unwrap().set_fail_all(true);
        let p = pipeline(store, ALL);

        let report = p
            .process_document(heart_rate(&[("2025-12-08 10:15:00 +0000", 60.0)]), at(11, 0))
            .await;
        assert!(!report.is_complete());
        assert!(report.failure_summary().unwrap().contains("Watch"));
        assert_eq!(p.tracker().watermark("Watch"), None);
    }

    #[tokio::test]
    async fn workouts_are_upserted_on_every_import() {
        let p = pipeline(memory(), ALL);
        let doc = json!({
            "data": {
                "metrics": [],
                "workouts": [{
                    "id": "run-1",
                    "name": "Outdoor Run",
                    "start": "2025-12-08 07:00:00 +0000",
                    "end": "2025-12-08 07:30:00 +0000",
                    "heartRateData": [
                        {"date": "2025-12-08 07:05:00 +0000", "Avg": 140},
                        {"date": "2025-12-08 07:10:00 +0000", "Avg": 150}
                    ]
                }]
            }
        });

        for _ in 0..2 {
            let parsed = parser::parse_document(&doc).unwrap();
            let report = p.process_document(parsed, at(8, 0)).await;
            assert_eq!(report.workouts_written, 1);
        }

        let mem = p.store().as_memory().unwrap();
        let workouts = mem.points(WORKOUT_MEASUREMENT);
        assert_eq!(workouts.len(), 1);
        assert_eq!(workouts[0].field_f64("avg_heart_rate"), Some(145.0));
        assert_eq!(mem.points(WORKOUT_SAMPLE_MEASUREMENT).len(), 2);
    }

    #[test]
    fn dry_run_counts_per_source() {
        let doc = heart_rate(&[
            ("2025-12-08 10:15:00 +0000", 60.0),
            ("2025-12-08 10:45:00 +0000", 70.0),
        ]);
        let report = dry_run_report(&doc);
        assert_eq!(report.parse.samples, 2);
        assert_eq!(report.sources[0].source, "Watch");
        assert_eq!(report.sources[0].admitted, 2);
    }
}
