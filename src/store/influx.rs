// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! InfluxDB 2.x backend: line protocol writes and Flux queries over HTTP.

use super::point::{FieldValue, Point, RAW_MEASUREMENT};
use super::StoreError;
use crate::models::MetricKind;
use crate::time_utils::format_utc_rfc3339;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use std::fmt::Write as _;
use std::time::Duration;

pub struct InfluxStore {
    client: reqwest::Client,
    url: String,
    token: String,
    org: String,
    bucket: String,
}

impl InfluxStore {
    pub fn new(
        url: &str,
        token: &str,
        org: &str,
        bucket: &str,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Fatal(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            org: org.to_string(),
            bucket: bucket.to_string(),
        })
    }

    pub async fn write(&self, points: &[Point]) -> Result<(), StoreError> {
        if points.is_empty() {
            return Ok(());
        }

        let body = encode_lines(points);
        let resp = self
            .client
            .post(format!("{}/api/v2/write", self.url))
            .query(&[
                ("org", self.org.as_str()),
                ("bucket", self.bucket.as_str()),
                ("precision", "s"),
            ])
            .header("Authorization", format!("Token {}", self.token))
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(body)
            .send()
            .await
            .map_err(classify_reqwest)?;

        let status = resp.status();
        if status.is_success() {
            tracing::debug!(points = points.len(), "Wrote batch to InfluxDB");
            return Ok(());
        }

        let text = resp.text().await.unwrap_or_default();
        Err(classify_status(status, &text))
    }

    pub async fn query_raw(
        &self,
        source: &str,
        metric: &MetricKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<(DateTime<Utc>, f64)>, StoreError> {
        let flux = raw_series_query(&self.bucket, source, metric.as_str(), start, end);
        let resp = self
            .client
            .post(format!("{}/api/v2/query", self.url))
            .query(&[("org", self.org.as_str())])
            .header("Authorization", format!("Token {}", self.token))
            .header("Content-Type", "application/vnd.flux")
            .header("Accept", "application/csv")
            .body(flux)
            .send()
            .await
            .map_err(classify_reqwest)?;

        let status = resp.status();
        let text = resp.text().await.map_err(classify_reqwest)?;
        if !status.is_success() {
            return Err(classify_status(status, &text));
        }

        Ok(parse_csv_rows(&text))
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        let resp = self
            .client
            .get(format!("{}/health", self.url))
            .send()
            .await
            .map_err(classify_reqwest)?;

        let status = resp.status();
        // Drain body for connection reuse.
        let _ = resp.bytes().await;
        if status.is_success() {
            Ok(())
        } else {
            Err(classify_status(status, "health check failed"))
        }
    }
}

fn classify_reqwest(e: reqwest::Error) -> StoreError {
    if e.is_decode() || e.is_builder() {
        StoreError::Fatal(e.to_string())
    } else {
        StoreError::Transient(e.to_string())
    }
}

fn classify_status(status: StatusCode, body: &str) -> StoreError {
    let msg = format!("InfluxDB returned {}: {}", status, body.trim());
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        StoreError::Transient(msg)
    } else {
        StoreError::Fatal(msg)
    }
}

// ─── Line protocol ─────────────────────────────────────────────────

fn escape_measurement(s: &str) -> String {
    s.replace(',', "\\,").replace(' ', "\\ ")
}

fn escape_key(s: &str) -> String {
    s.replace(',', "\\,")
        .replace('=', "\\=")
        .replace(' ', "\\ ")
}

fn escape_string_field(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Encode points as newline separated line protocol, second precision.
pub(crate) fn encode_lines(points: &[Point]) -> String {
    let mut out = String::with_capacity(points.len() * 96);
    for point in points {
        if point.fields.is_empty() {
            continue;
        }
        out.push_str(&escape_measurement(point.measurement));
        for (k, v) in &point.tags {
            // Empty tag values are invalid in line protocol.
            if v.is_empty() {
                continue;
            }
            let _ = write!(out, ",{}={}", escape_key(k), escape_key(v));
        }
        out.push(' ');
        for (i, (k, v)) in point.fields.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            let _ = match v {
                FieldValue::Float(f) => write!(out, "{}={}", escape_key(k), f),
                FieldValue::Int(n) => write!(out, "{}={}i", escape_key(k), n),
                FieldValue::Str(s) => {
                    write!(out, "{}=\"{}\"", escape_key(k), escape_string_field(s))
                }
            };
        }
        let _ = writeln!(out, " {}", point.timestamp.timestamp());
    }
    out
}

// ─── Flux ──────────────────────────────────────────────────────────

fn flux_string(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

fn raw_series_query(
    bucket: &str,
    source: &str,
    metric: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> String {
    format!(
        "from(bucket: {bucket})\n  \
         |> range(start: {start}, stop: {stop})\n  \
         |> filter(fn: (r) => r._measurement == {measurement} and r._field == \"value\")\n  \
         |> filter(fn: (r) => r.metric_name == {metric} and r.source == {source})\n  \
         |> keep(columns: [\"_time\", \"_value\"])",
        bucket = flux_string(bucket),
        start = format_utc_rfc3339(start),
        stop = format_utc_rfc3339(end),
        measurement = flux_string(RAW_MEASUREMENT),
        metric = flux_string(metric),
        source = flux_string(source),
    )
}

/// Pull `(_time, _value)` out of an annotated CSV response.
///
/// A response may hold several tables, each starting with its own header row.
pub(crate) fn parse_csv_rows(text: &str) -> Vec<(DateTime<Utc>, f64)> {
    let mut rows = Vec::new();
    let mut columns: Option<(usize, usize)> = None;

    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with('#') {
            if line.is_empty() {
                columns = None;
            }
            continue;
        }
        let cells: Vec<&str> = line.split(',').collect();
        let time_idx = cells.iter().position(|c| *c == "_time");
        let value_idx = cells.iter().position(|c| *c == "_value");
        if let (Some(t), Some(v)) = (time_idx, value_idx) {
            columns = Some((t, v));
            continue;
        }

        let Some((t, v)) = columns else { continue };
        let ts = cells
            .get(t)
            .and_then(|c| DateTime::parse_from_rfc3339(c).ok())
            .map(|d| d.with_timezone(&Utc));
        let value = cells.get(v).and_then(|c| c.parse::<f64>().ok());
        if let (Some(ts), Some(value)) = (ts, value) {
            rows.push((ts, value));
        }
    }

    rows.sort_by_key(|(ts, _)| *ts);
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn encodes_line_protocol_with_escaping() {
        let ts = Utc.with_ymd_and_hms(2025, 12, 8, 10, 15, 0).unwrap();
        let point = Point::new("health_metrics", ts)
            .tag("metric_name", "heart_rate")
            .tag("source", "Roland's Apple Watch")
            .field("value", FieldValue::Float(60.5))
            .field("unit", FieldValue::Str("count/min".to_string()));

        let line = encode_lines(&[point]);
        assert_eq!(
            line,
            format!(
                "health_metrics,metric_name=heart_rate,source=Roland's\\ Apple\\ Watch value=60.5,unit=\"count/min\" {}\n",
                ts.timestamp()
            )
        );
    }

    #[test]
    fn encodes_int_and_skips_empty_tags() {
        let ts = Utc.with_ymd_and_hms(2025, 12, 8, 0, 0, 0).unwrap();
        let point = Point::new("health_metrics_daily", ts)
            .tag("metric_name", "step_count")
            .tag("source", "")
            .field("sum", FieldValue::Float(1000.0))
            .field("count", FieldValue::Int(3));

        let line = encode_lines(&[point]);
        assert!(line.starts_with("health_metrics_daily,metric_name=step_count sum=1000,count=3i "));
    }

    #[test]
    fn parses_multi_table_csv() {
        let csv = ",result,table,_time,_value\r\n\
                   ,_result,0,2025-12-08T10:15:00Z,60\r\n\
                   ,_result,0,2025-12-08T10:45:00Z,70\r\n\
                   \r\n\
                   ,result,table,_time,_value\r\n\
                   ,_result,1,2025-12-08T10:30:00Z,80\r\n";
        let rows = parse_csv_rows(csv);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].1, 60.0);
        assert_eq!(rows[1].1, 80.0);
        assert_eq!(rows[2].1, 70.0);
    }

    #[test]
    fn flux_query_quotes_user_values() {
        let start = Utc.with_ymd_and_hms(2025, 12, 8, 10, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 12, 8, 11, 0, 0).unwrap();
        let q = raw_series_query("apple_health", "a \"b\"", "heart_rate", start, end);
        assert!(q.contains("r.source == \"a \\\"b\\\"\""));
        assert!(q.contains("range(start: 2025-12-08T10:00:00Z, stop: 2025-12-08T11:00:00Z)"));
    }
}
