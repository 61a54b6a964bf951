// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application configuration loaded from environment variables.
//!
//! Built once at startup and handed to each component; nothing reads the
//! environment after that.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use validator::Validate;

/// How staged webhook payloads are processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessingMode {
    /// Hand staged payloads to the background worker queue and respond.
    #[default]
    Queued,
    /// Run the pipeline before responding.
    Inline,
}

impl FromStr for ProcessingMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "queued" => Ok(ProcessingMode::Queued),
            "inline" => Ok(ProcessingMode::Inline),
            _ => Err(ConfigError::Parse {
                key: "PROCESSING_MODE",
                value: s.to_string(),
            }),
        }
    }
}

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone, Validate)]
pub struct Config {
    // --- Server ---
    pub port: u16,
    /// Name reported by the health endpoint
    pub service_name: String,
    /// Bearer token required on webhook pushes (disabled when unset)
    pub webhook_secret: Option<String>,
    /// Staged payloads, watermarks and the failure log live here
    pub data_dir: PathBuf,
    #[validate(range(min = 1024))]
    pub max_body_bytes: usize,

    // --- InfluxDB ---
    /// In-memory store is used when unset
    pub influx_url: Option<String>,
    pub influx_token: Option<String>,
    pub influx_org: Option<String>,
    pub influx_bucket: String,

    // --- Storage writer ---
    #[validate(range(min = 1, max = 100_000))]
    pub batch_size: usize,
    #[validate(range(min = 1, max = 64))]
    pub max_in_flight_batches: usize,
    #[validate(range(min = 1, max = 600))]
    pub write_timeout_secs: u64,
    #[validate(range(min = 1, max = 20))]
    pub max_write_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,

    // --- Pipeline ---
    /// At most a year
    #[validate(range(min = 1, max = 8760))]
    pub duplicate_window_hours: u64,
    #[validate(range(min = 1, max = 8760))]
    pub lateness_tolerance_hours: u64,
    pub write_raw: bool,
    pub write_hourly: bool,
    pub write_daily: bool,

    // --- Deferred processing ---
    pub processing_mode: ProcessingMode,
    #[validate(range(min = 1, max = 64))]
    pub workers: usize,
    #[validate(range(min = 1))]
    pub queue_capacity: usize,
}

impl Config {
    /// Load configuration from environment variables (and `.env` if present).
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let config = Self {
            port: parse_or(&get, "PORT", 8080)?,
            service_name: get("SERVICE_NAME")
                .unwrap_or_else(|| "health-auto-export-webhook".to_string()),
            webhook_secret: get("WEBHOOK_SECRET"),
            data_dir: get("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data")),
            max_body_bytes: parse_or(&get, "MAX_BODY_BYTES", 64 * 1024 * 1024)?,

            influx_url: get("INFLUXDB_URL"),
            influx_token: get("INFLUXDB_TOKEN"),
            influx_org: get("INFLUXDB_ORG"),
            influx_bucket: get("INFLUXDB_BUCKET").unwrap_or_else(|| "apple_health".to_string()),

            batch_size: parse_or(&get, "BATCH_SIZE", 5000)?,
            max_in_flight_batches: parse_or(&get, "MAX_IN_FLIGHT_BATCHES", 4)?,
            write_timeout_secs: parse_or(&get, "WRITE_TIMEOUT_SECS", 10)?,
            max_write_attempts: parse_or(&get, "MAX_WRITE_ATTEMPTS", 4)?,
            retry_base_delay_ms: parse_or(&get, "RETRY_BASE_DELAY_MS", 250)?,
            retry_max_delay_ms: parse_or(&get, "RETRY_MAX_DELAY_MS", 10_000)?,

            duplicate_window_hours: parse_or(&get, "DUPLICATE_WINDOW_HOURS", 48)?,
            lateness_tolerance_hours: parse_or(&get, "LATENESS_TOLERANCE_HOURS", 24)?,
            write_raw: parse_bool_or(&get, "WRITE_RAW", true)?,
            write_hourly: parse_bool_or(&get, "WRITE_HOURLY", true)?,
            write_daily: parse_bool_or(&get, "WRITE_DAILY", true)?,

            processing_mode: get("PROCESSING_MODE")
                .map(|v| v.parse::<ProcessingMode>())
                .transpose()?
                .unwrap_or_default(),
            workers: parse_or(&get, "WORKERS", 2)?,
            queue_capacity: parse_or(&get, "QUEUE_CAPACITY", 64)?,
        };

        config.check()?;
        Ok(config)
    }

    /// Run field rules plus the cross-field checks derive rules can't express.
    pub fn check(&self) -> Result<(), ConfigError> {
        self.validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if self.retry_max_delay_ms < self.retry_base_delay_ms {
            return Err(ConfigError::Invalid(
                "RETRY_MAX_DELAY_MS must be >= RETRY_BASE_DELAY_MS".to_string(),
            ));
        }
        Ok(())
    }

    /// Offline configuration for tests: in-memory store, inline processing,
    /// no retry delays.
    pub fn test_default() -> Self {
        Self {
            port: 8080,
            service_name: "health-auto-export-webhook".to_string(),
            webhook_secret: Some("test_webhook_secret".to_string()),
            data_dir: PathBuf::from("data"),
            max_body_bytes: 64 * 1024 * 1024,
            influx_url: None,
            influx_token: None,
            influx_org: None,
            influx_bucket: "apple_health".to_string(),
            batch_size: 5000,
            max_in_flight_batches: 4,
            write_timeout_secs: 10,
            max_write_attempts: 3,
            retry_base_delay_ms: 0,
            retry_max_delay_ms: 0,
            duplicate_window_hours: 48,
            lateness_tolerance_hours: 24,
            write_raw: true,
            write_hourly: true,
            write_daily: true,
            processing_mode: ProcessingMode::Inline,
            workers: 2,
            queue_capacity: 16,
        }
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.data_dir.join("staged")
    }

    pub fn watermark_path(&self) -> PathBuf {
        self.data_dir.join("watermarks.json")
    }

    pub fn failure_log_path(&self) -> PathBuf {
        self.data_dir.join("failures.jsonl")
    }
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.parse().map_err(|_| ConfigError::Parse { key, value: raw }),
        None => Ok(default),
    }
}

fn parse_bool_or<G>(get: &G, key: &'static str, default: bool) -> Result<bool, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Parse { key, value: raw }),
        },
        None => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    Parse { key: &'static str, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
