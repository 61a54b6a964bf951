// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Streaming hourly/daily rollups with late-data correction.
//!
//! Each open bucket keeps the raw values it has seen, keyed by timestamp, so
//! a flush always recomputes from the full set and a resubmitted sample
//! replaces rather than double counts.
//!
//! A bucket closes once `now > bucket_end + lateness` *and* it holds data
//! already committed to storage. Samples for a closed bucket are refused
//! before anything is written, so raw and rollups never disagree. A past
//! bucket with no committed history is still open: that is a backfill.

use crate::models::{AggregateBucket, BucketKey, Granularity, MetricSample};
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Default)]
struct Accumulator {
    values: BTreeMap<DateTime<Utc>, f64>,
    dirty: bool,
    /// Holds values that are already in storage (seeded or flushed).
    committed: bool,
}

/// Rollup state for one source.
#[derive(Debug)]
pub struct Aggregator {
    buckets: BTreeMap<BucketKey, Accumulator>,
    lateness: Duration,
    granularities: Vec<Granularity>,
}

impl Aggregator {
    pub fn new(lateness: Duration, granularities: &[Granularity]) -> Self {
        Self {
            buckets: BTreeMap::new(),
            lateness,
            granularities: granularities.to_vec(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.granularities.is_empty()
    }

    fn keys<'a>(&'a self, sample: &'a MetricSample) -> impl Iterator<Item = BucketKey> + 'a {
        let local = sample.local_time();
        self.granularities
            .iter()
            .map(move |&g| BucketKey::for_sample(&sample.source, &sample.metric, g, local))
    }

    fn past_deadline(&self, key: &BucketKey, now: DateTime<Utc>) -> bool {
        key.deadline(self.lateness).is_some_and(|d| now > d)
    }

    /// A closed bucket no longer accepts samples.
    ///
    /// Only meaningful once the bucket has been hydrated; an unknown bucket
    /// is reported open.
    pub fn is_closed(&self, key: &BucketKey, now: DateTime<Utc>) -> bool {
        self.past_deadline(key, now) && self.buckets.get(key).is_some_and(|acc| acc.committed)
    }

    /// Buckets these samples touch that hold no state yet.
    ///
    /// The caller seeds these from storage before anything else, so the
    /// first flush after a restart still sees every committed sample and a
    /// closed bucket is recognised as closed.
    pub fn missing_buckets(&self, samples: &[MetricSample]) -> Vec<BucketKey> {
        let mut missing = BTreeSet::new();
        for sample in samples {
            for key in self.keys(sample) {
                if !self.buckets.contains_key(&key) {
                    missing.insert(key);
                }
            }
        }
        missing.into_iter().collect()
    }

    /// Seed a bucket with values already in storage. Values already held
    /// in memory win.
    pub fn seed(&mut self, key: &BucketKey, values: impl IntoIterator<Item = (DateTime<Utc>, f64)>) {
        let acc = self.buckets.entry(key.clone()).or_default();
        for (ts, v) in values {
            acc.values.entry(ts).or_insert(v);
            acc.committed = true;
        }
    }

    /// Split off samples that would land in a closed bucket of any enabled
    /// granularity. Returns the accepted samples and the number refused.
    pub fn reject_late(
        &self,
        samples: Vec<MetricSample>,
        now: DateTime<Utc>,
    ) -> (Vec<MetricSample>, usize) {
        let total = samples.len();
        let accepted: Vec<MetricSample> = samples
            .into_iter()
            .filter(|sample| match self.keys(sample).find(|k| self.is_closed(k, now)) {
                Some(key) => {
                    tracing::warn!(
                        anomaly = "LateDataDropped",
                        source = %sample.source,
                        metric = %sample.metric,
                        granularity = ?key.granularity,
                        timestamp = %sample.timestamp,
                        bucket_start = %key.bucket_start,
                        "Sample arrived after bucket closed"
                    );
                    false
                }
                None => true,
            })
            .collect();
        let late = total - accepted.len();
        (accepted, late)
    }

    /// Insert samples into their buckets. Returns the number of bucket
    /// inserts (one per sample per enabled granularity).
    pub fn ingest(&mut self, samples: &[MetricSample]) -> usize {
        let mut inserted = 0;
        for sample in samples {
            let keys: Vec<BucketKey> = self.keys(sample).collect();
            for key in keys {
                let acc = self.buckets.entry(key).or_default();
                acc.values.insert(sample.timestamp, sample.value);
                acc.dirty = true;
                inserted += 1;
            }
        }
        inserted
    }

    /// Recompute every dirty bucket and clear its dirty flag.
    pub fn drain_dirty(&mut self) -> Vec<AggregateBucket> {
        self.buckets
            .iter_mut()
            .filter(|(_, acc)| acc.dirty)
            .filter_map(|(key, acc)| {
                acc.dirty = false;
                AggregateBucket::from_values(key, acc.values.values())
            })
            .collect()
    }

    /// Record the outcome of flushing buckets. Written buckets become
    /// committed; failed ones are re-marked so the next flush retries them.
    pub fn record_flush<'a>(&mut self, results: impl IntoIterator<Item = (&'a BucketKey, bool)>) {
        for (key, ok) in results {
            if let Some(acc) = self.buckets.get_mut(key) {
                if ok {
                    acc.committed = true;
                } else {
                    acc.dirty = true;
                }
            }
        }
    }

    /// Drop buckets past their deadline that have nothing left to flush.
    pub fn evict_closed(&mut self, now: DateTime<Utc>) -> usize {
        let lateness = self.lateness;
        let before = self.buckets.len();
        self.buckets.retain(|key, acc| {
            acc.dirty || !key.deadline(lateness).is_some_and(|d| now > d)
        });
        before - self.buckets.len()
    }

    pub fn open_buckets(&self) -> usize {
        self.buckets.len()
    }

    pub fn retained_values(&self) -> usize {
        self.buckets.values().map(|acc| acc.values.len()).sum()
    }
}
