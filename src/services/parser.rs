// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Export document parser.
//!
//! Turns a Health Auto Export JSON document into typed samples and workouts.
//! Bad records are skipped and reported; only a document that is not an
//! export at all is an error.

use crate::error::PipelineError;
use crate::models::{
    MetricKind, MetricSample, Workout, WorkoutRecord, WorkoutSample, UNKNOWN_SOURCE,
};
use crate::time_utils::parse_export_local;
use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Why a single record was skipped.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    NotAnObject,
    MissingName,
    MissingData,
    MissingTimestamp,
    BadTimestamp(String),
    MissingValue,
    BadValue(String),
}

/// A skipped record and where it was in the document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationFailure {
    /// Metric name, or `workouts` for workout records
    pub section: String,
    pub index: usize,
    #[serde(flatten)]
    pub reason: FailureReason,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ParseReport {
    pub samples: usize,
    pub workouts: usize,
    pub workout_samples: usize,
    /// Metric names this build has no variant for; still imported.
    pub unknown_metrics: BTreeSet<String>,
    pub failures: Vec<ValidationFailure>,
}

impl ParseReport {
    fn fail(&mut self, section: &str, index: usize, reason: FailureReason) {
        tracing::trace!(section, index, ?reason, "Skipping record");
        self.failures.push(ValidationFailure {
            section: section.to_string(),
            index,
            reason,
        });
    }
}

/// Parsed export document.
#[derive(Debug, Clone, Default)]
pub struct ParsedDocument {
    pub samples: Vec<MetricSample>,
    pub workouts: Vec<WorkoutRecord>,
    pub report: ParseReport,
}

/// Per-metric entry of a document summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSummary {
    pub count: usize,
    pub unit: String,
}

/// Counts for a document, without validating individual records.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentSummary {
    pub total_metric_samples: usize,
    pub metric_types: usize,
    pub metrics: BTreeMap<String, MetricSummary>,
    pub total_workouts: usize,
}

/// Parse raw bytes. Invalid JSON is a schema error.
pub fn parse_bytes(bytes: &[u8]) -> Result<ParsedDocument, PipelineError> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| PipelineError::Schema(format!("invalid JSON: {}", e)))?;
    parse_document(&value)
}

/// Parse an export document, either bare or wrapped in `{"data": {...}}`.
pub fn parse_document(doc: &Value) -> Result<ParsedDocument, PipelineError> {
    let (metrics, workouts) = sections(doc)?;
    let mut out = ParsedDocument::default();

    for (index, metric) in metrics.iter().enumerate() {
        parse_metric(index, metric, &mut out);
    }
    for (index, workout) in workouts.iter().enumerate() {
        match parse_workout(workout) {
            Ok(record) => {
                out.report.workout_samples += record.samples.len();
                out.workouts.push(record);
            }
            Err(reason) => out.report.fail("workouts", index, reason),
        }
    }

    out.report.samples = out.samples.len();
    out.report.workouts = out.workouts.len();
    Ok(out)
}

/// Summarize a document's contents.
pub fn summarize(doc: &Value) -> Result<DocumentSummary, PipelineError> {
    let (metrics, workouts) = sections(doc)?;

    let mut summary = DocumentSummary {
        total_metric_samples: 0,
        metric_types: metrics.len(),
        metrics: BTreeMap::new(),
        total_workouts: workouts.len(),
    };
    for metric in metrics {
        let name = metric
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        let count = metric
            .get("data")
            .and_then(Value::as_array)
            .map_or(0, Vec::len);
        let unit = metric
            .get("units")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        summary.total_metric_samples += count;
        let entry = summary
            .metrics
            .entry(name)
            .or_insert(MetricSummary { count: 0, unit });
        entry.count += count;
    }
    Ok(summary)
}

const EMPTY: &[Value] = &[];

/// Locate the `metrics` and `workouts` arrays.
fn sections(doc: &Value) -> Result<(&[Value], &[Value]), PipelineError> {
    let root = doc
        .as_object()
        .ok_or_else(|| PipelineError::Schema("document is not a JSON object".to_string()))?;

    let body: &Map<String, Value> = match root.get("data").and_then(Value::as_object) {
        Some(inner) if inner.contains_key("metrics") || inner.contains_key("workouts") => inner,
        _ => root,
    };

    let metrics = body.get("metrics");
    let workouts = body.get("workouts");
    if metrics.is_none() && workouts.is_none() {
        return Err(PipelineError::Schema(
            "document has neither `metrics` nor `workouts`".to_string(),
        ));
    }

    Ok((array_field(metrics, "metrics")?, array_field(workouts, "workouts")?))
}

fn array_field<'a>(v: Option<&'a Value>, field: &str) -> Result<&'a [Value], PipelineError> {
    match v {
        None => Ok(EMPTY),
        Some(Value::Array(items)) => Ok(items.as_slice()),
        Some(_) => Err(PipelineError::Schema(format!("`{}` is not an array", field))),
    }
}

fn parse_metric(index: usize, metric: &Value, out: &mut ParsedDocument) {
    let Some(metric) = metric.as_object() else {
        out.report.fail("metrics", index, FailureReason::NotAnObject);
        return;
    };
    let Some(name) = metric
        .get("name")
        .and_then(Value::as_str)
        .filter(|n| !n.is_empty())
    else {
        out.report.fail("metrics", index, FailureReason::MissingName);
        return;
    };
    let Some(records) = metric.get("data").and_then(Value::as_array) else {
        out.report.fail(name, index, FailureReason::MissingData);
        return;
    };

    let kind = MetricKind::from_name(name);
    if !kind.is_known() {
        out.report.unknown_metrics.insert(name.to_string());
    }
    let unit = metric
        .get("units")
        .and_then(Value::as_str)
        .unwrap_or_default();

    for (i, record) in records.iter().enumerate() {
        match parse_sample(&kind, unit, record) {
            Ok(sample) => out.samples.push(sample),
            Err(reason) => out.report.fail(name, i, reason),
        }
    }
}

fn parse_sample(kind: &MetricKind, unit: &str, record: &Value) -> Result<MetricSample, FailureReason> {
    let record = record.as_object().ok_or(FailureReason::NotAnObject)?;

    let local = record_local_timestamp(record, &["date", "start"])?;
    let value = ["qty", "value", "Avg"]
        .iter()
        .find_map(|key| record.get(*key).filter(|v| !v.is_null()))
        .ok_or(FailureReason::MissingValue)?;
    let value = number(value).ok_or_else(|| FailureReason::BadValue(value.to_string()))?;

    Ok(MetricSample {
        metric: kind.clone(),
        source: record_source(record),
        timestamp: local.with_timezone(&Utc),
        value,
        unit: unit.to_string(),
        utc_offset_secs: local.offset().local_minus_utc(),
    })
}

fn record_timestamp(
    record: &Map<String, Value>,
    keys: &[&str],
) -> Result<DateTime<Utc>, FailureReason> {
    record_local_timestamp(record, keys).map(|ts| ts.with_timezone(&Utc))
}

fn record_local_timestamp(
    record: &Map<String, Value>,
    keys: &[&str],
) -> Result<DateTime<FixedOffset>, FailureReason> {
    let raw = keys
        .iter()
        .find_map(|key| record.get(*key).and_then(Value::as_str).filter(|s| !s.is_empty()))
        .ok_or(FailureReason::MissingTimestamp)?;
    parse_export_local(raw).ok_or_else(|| FailureReason::BadTimestamp(raw.to_string()))
}

fn record_source(record: &Map<String, Value>) -> String {
    let source = match record.get("source").or_else(|| record.get("sources")) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join("|"),
        _ => String::new(),
    };
    if source.is_empty() {
        UNKNOWN_SOURCE.to_string()
    } else {
        source
    }
}

/// A finite number, given as a JSON number or a numeric string.
fn number(v: &Value) -> Option<f64> {
    let n = match v {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// `{qty, units}` object or a bare number.
fn quantity(v: Option<&Value>) -> (Option<f64>, Option<String>) {
    match v {
        Some(Value::Object(obj)) => (
            obj.get("qty").and_then(number),
            obj.get("units").and_then(Value::as_str).map(str::to_string),
        ),
        Some(other) => (number(other), None),
        None => (None, None),
    }
}

/// Iterate `(timestamp, value)` over a per-timestamp series like
/// `[{date, qty}]`, skipping unusable entries.
fn series<'a>(
    workout: &'a Map<String, Value>,
    key: &str,
    value_key: &'static str,
) -> impl Iterator<Item = (DateTime<Utc>, f64)> + 'a {
    workout
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(EMPTY)
        .iter()
        .filter_map(move |entry| {
            let entry = entry.as_object()?;
            let ts = record_timestamp(entry, &["date", "start"]).ok()?;
            let v = entry.get(value_key).and_then(number)?;
            Some((ts, v))
        })
}

/// Sample for `ts`, created empty on first use.
fn slot<'m>(
    samples: &'m mut BTreeMap<DateTime<Utc>, WorkoutSample>,
    workout_id: &str,
    ts: DateTime<Utc>,
) -> &'m mut WorkoutSample {
    samples.entry(ts).or_insert_with(|| WorkoutSample {
        workout_id: workout_id.to_string(),
        timestamp: ts,
        heart_rate: None,
        energy: None,
        distance: None,
        step_count: None,
        recovery_heart_rate: None,
    })
}

fn parse_workout(value: &Value) -> Result<WorkoutRecord, FailureReason> {
    let w = value.as_object().ok_or(FailureReason::NotAnObject)?;

    let start = record_timestamp(w, &["start"])?;
    let end = record_timestamp(w, &["end"]).unwrap_or(start);
    let name = w
        .get("name")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or("Unknown")
        .to_string();
    let workout_id = w
        .get("id")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("{}-{}", name.replace(' ', "_"), start.timestamp()));
    let duration_secs = w
        .get("duration")
        .and_then(number)
        .unwrap_or_else(|| (end - start).num_seconds().max(0) as f64);
    let location = w
        .get("location")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let (distance, distance_unit) = quantity(w.get("distance"));
    let (active_energy, energy_unit) = quantity(w.get("activeEnergyBurned"));
    let (intensity, intensity_unit) = quantity(w.get("intensity"));

    let mut samples: BTreeMap<DateTime<Utc>, WorkoutSample> = BTreeMap::new();
    let mut heart_rates = Vec::new();
    for (ts, bpm) in series(w, "heartRateData", "Avg") {
        heart_rates.push(bpm);
        slot(&mut samples, &workout_id, ts).heart_rate = Some(bpm);
    }
    let mut steps: Option<f64> = None;
    for (ts, n) in series(w, "stepCount", "qty") {
        steps = Some(steps.unwrap_or(0.0) + n);
        slot(&mut samples, &workout_id, ts).step_count = Some(n);
    }
    for (ts, kj) in series(w, "activeEnergy", "qty") {
        slot(&mut samples, &workout_id, ts).energy = Some(kj);
    }
    for (ts, d) in series(w, "walkingAndRunningDistance", "qty") {
        slot(&mut samples, &workout_id, ts).distance = Some(d);
    }
    for (ts, bpm) in series(w, "heartRateRecovery", "Avg") {
        slot(&mut samples, &workout_id, ts).recovery_heart_rate = Some(bpm);
    }

    let (avg_heart_rate, max_heart_rate, min_heart_rate) = if heart_rates.is_empty() {
        (None, None, None)
    } else {
        let sum: f64 = heart_rates.iter().sum();
        (
            Some(sum / heart_rates.len() as f64),
            heart_rates.iter().copied().reduce(f64::max),
            heart_rates.iter().copied().reduce(f64::min),
        )
    };

    Ok(WorkoutRecord {
        workout: Workout {
            workout_id,
            name,
            start,
            end,
            duration_secs,
            location,
            distance,
            distance_unit: distance_unit.unwrap_or_else(|| "km".to_string()),
            active_energy,
            energy_unit: energy_unit.unwrap_or_else(|| "kJ".to_string()),
            step_count: steps,
            avg_heart_rate,
            max_heart_rate,
            min_heart_rate,
            intensity,
            intensity_unit: intensity_unit.unwrap_or_default(),
        },
        samples: samples.into_values().collect(),
    })
}
