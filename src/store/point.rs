// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Storage points and their mapping from domain records.

use crate::models::{AggregateBucket, MetricSample, Workout, WorkoutSample};
use chrono::{DateTime, Utc};

pub const RAW_MEASUREMENT: &str = "health_metrics";
pub const WORKOUT_MEASUREMENT: &str = "workouts";
pub const WORKOUT_SAMPLE_MEASUREMENT: &str = "workout_samples";

/// A typed field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Int(i64),
    Str(String),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Float(v) => Some(*v),
            FieldValue::Int(v) => Some(*v as f64),
            FieldValue::Str(_) => None,
        }
    }
}

/// One row in the time-series store.
///
/// Identity is `(measurement, tags, timestamp)`; writing the same identity
/// twice replaces the fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub measurement: &'static str,
    /// Kept sorted by key so identity comparison is order independent.
    pub tags: Vec<(&'static str, String)>,
    pub fields: Vec<(&'static str, FieldValue)>,
    pub timestamp: DateTime<Utc>,
}

impl Point {
    pub fn new(measurement: &'static str, timestamp: DateTime<Utc>) -> Self {
        Self {
            measurement,
            tags: Vec::new(),
            fields: Vec::new(),
            timestamp,
        }
    }

    pub fn tag(mut self, key: &'static str, value: impl Into<String>) -> Self {
        let value = value.into();
        match self.tags.binary_search_by(|(k, _)| k.cmp(&key)) {
            Ok(idx) => self.tags[idx].1 = value,
            Err(idx) => self.tags.insert(idx, (key, value)),
        }
        self
    }

    pub fn field(mut self, key: &'static str, value: FieldValue) -> Self {
        self.fields.push((key, value));
        self
    }

    /// Add a float field only when present.
    pub fn opt_field(self, key: &'static str, value: Option<f64>) -> Self {
        match value {
            Some(v) => self.field(key, FieldValue::Float(v)),
            None => self,
        }
    }

    pub fn tag_value(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn field_f64(&self, key: &str) -> Option<f64> {
        self.fields
            .iter()
            .find(|(k, _)| *k == key)
            .and_then(|(_, v)| v.as_f64())
    }

    pub fn from_sample(sample: &MetricSample) -> Self {
        Point::new(RAW_MEASUREMENT, sample.timestamp)
            .tag("metric_name", sample.metric.as_str())
            .tag("source", sample.source.as_str())
            .field("value", FieldValue::Float(sample.value))
            .field("unit", FieldValue::Str(sample.unit.clone()))
    }

    pub fn from_bucket(bucket: &AggregateBucket) -> Self {
        Point::new(bucket.granularity.measurement(), bucket.bucket_start)
            .tag("metric_name", bucket.metric.as_str())
            .tag("source", bucket.source.as_str())
            .field("avg", FieldValue::Float(bucket.avg))
            .field("min", FieldValue::Float(bucket.min))
            .field("max", FieldValue::Float(bucket.max))
            .field("sum", FieldValue::Float(bucket.sum))
            .field("count", FieldValue::Int(bucket.count as i64))
    }

    pub fn from_workout(workout: &Workout) -> Self {
        let location = if workout.location.is_empty() {
            "unknown"
        } else {
            workout.location.as_str()
        };
        Point::new(WORKOUT_MEASUREMENT, workout.start)
            .tag("workout_id", workout.workout_id.as_str())
            .tag("name", workout.name.as_str())
            .tag("location", location)
            .field("duration", FieldValue::Float(workout.duration_secs))
            .opt_field("distance", workout.distance)
            .opt_field("active_energy", workout.active_energy)
            .opt_field("step_count", workout.step_count)
            .opt_field("avg_heart_rate", workout.avg_heart_rate)
            .opt_field("max_heart_rate", workout.max_heart_rate)
            .opt_field("min_heart_rate", workout.min_heart_rate)
            .opt_field("intensity", workout.intensity)
    }

    pub fn from_workout_sample(sample: &WorkoutSample) -> Self {
        Point::new(WORKOUT_SAMPLE_MEASUREMENT, sample.timestamp)
            .tag("workout_id", sample.workout_id.as_str())
            .opt_field("heart_rate", sample.heart_rate)
            .opt_field("energy", sample.energy)
            .opt_field("distance", sample.distance)
            .opt_field("step_count", sample.step_count)
            .opt_field("recovery_heart_rate", sample.recovery_heart_rate)
    }
}
