// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Hourly/daily rollup model.

use crate::models::MetricKind;
use crate::time_utils::{truncate_to_day, truncate_to_hour};
use chrono::{DateTime, Duration, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

/// Rollup resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Hourly,
    Daily,
}

impl Granularity {
    pub const ALL: [Granularity; 2] = [Granularity::Hourly, Granularity::Daily];

    /// Start of the bucket containing `ts`, on the boundaries of the
    /// reading's own UTC offset.
    pub fn bucket_start(self, ts: DateTime<FixedOffset>) -> DateTime<Utc> {
        match self {
            Granularity::Hourly => truncate_to_hour(ts),
            Granularity::Daily => truncate_to_day(ts),
        }
    }

    pub fn width(self) -> Duration {
        match self {
            Granularity::Hourly => Duration::hours(1),
            Granularity::Daily => Duration::days(1),
        }
    }

    /// Storage measurement this granularity is written to.
    pub fn measurement(self) -> &'static str {
        match self {
            Granularity::Hourly => "health_metrics_hourly",
            Granularity::Daily => "health_metrics_daily",
        }
    }
}

/// Identity of an aggregate bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketKey {
    pub source: String,
    pub metric: MetricKind,
    pub granularity: Granularity,
    pub bucket_start: DateTime<Utc>,
}

impl BucketKey {
    pub fn for_sample(
        source: &str,
        metric: &MetricKind,
        granularity: Granularity,
        ts: DateTime<FixedOffset>,
    ) -> Self {
        Self {
            source: source.to_string(),
            metric: metric.clone(),
            granularity,
            bucket_start: granularity.bucket_start(ts),
        }
    }

    pub fn bucket_end(&self) -> DateTime<Utc> {
        self.bucket_start
            .checked_add_signed(self.granularity.width())
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Last instant a sample may still join this bucket. `None` when the
    /// tolerance runs past the end of representable time.
    pub fn deadline(&self, lateness: Duration) -> Option<DateTime<Utc>> {
        self.bucket_end().checked_add_signed(lateness)
    }
}

/// Summary statistics for one bucket, recomputed from its full sample set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateBucket {
    pub metric: MetricKind,
    pub source: String,
    pub granularity: Granularity,
    pub bucket_start: DateTime<Utc>,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub sum: f64,
    pub count: u64,
}

impl AggregateBucket {
    /// Compute a bucket from its values. Returns `None` for an empty set.
    pub fn from_values<'a>(
        key: &BucketKey,
        values: impl IntoIterator<Item = &'a f64>,
    ) -> Option<Self> {
        let mut count = 0u64;
        let mut sum = 0.0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for &v in values {
            count += 1;
            sum += v;
            min = min.min(v);
            max = max.max(v);
        }
        if count == 0 {
            return None;
        }

        Some(Self {
            metric: key.metric.clone(),
            source: key.source.clone(),
            granularity: key.granularity,
            bucket_start: key.bucket_start,
            avg: sum / count as f64,
            min,
            max,
            sum,
            count,
        })
    }

    pub fn key(&self) -> BucketKey {
        BucketKey {
            source: self.source.clone(),
            metric: self.metric.clone(),
            granularity: self.granularity,
            bucket_start: self.bucket_start,
        }
    }
}
