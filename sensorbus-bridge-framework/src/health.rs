//! Bridge health monitoring.
//!
//! This module provides:
//! - [`BridgeHealth`] for tracking overall bridge health metrics
//! - [`SensorLiveness`] for per-sensor availability
//! - [`ErrorReport`] for unified error reporting

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::publisher::Publisher;

/// Consecutive failures after which a sensor is reported offline.
pub const OFFLINE_AFTER_FAILURES: u32 = 3;

/// Bridge health metrics.
///
/// Tracks per-sensor status, error counts and published metrics.
#[derive(Debug)]
pub struct BridgeHealth {
    bridge_name: String,
    start_time: Instant,
    sensors_total: AtomicU64,
    metrics_published: AtomicU64,
    errors_total: AtomicU64,
    sensors: RwLock<HashMap<String, SensorState>>,
    publisher: Option<Publisher>,
}

#[derive(Debug, Clone)]
struct SensorState {
    status: SensorStatus,
    /// Last successful live read (millis since epoch).
    last_seen: i64,
    consecutive_failures: u32,
    last_error: Option<String>,
}

impl SensorState {
    fn new() -> Self {
        Self {
            status: SensorStatus::Unknown,
            last_seen: 0,
            consecutive_failures: 0,
            last_error: None,
        }
    }
}

/// Sensor availability status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorStatus {
    /// Sensor is responding normally.
    Online,
    /// Sensor is not responding.
    Offline,
    /// Recent polls failed or were served from cache.
    Degraded,
    /// Never polled.
    #[default]
    Unknown,
}

impl std::fmt::Display for SensorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorStatus::Online => write!(f, "online"),
            SensorStatus::Offline => write!(f, "offline"),
            SensorStatus::Degraded => write!(f, "degraded"),
            SensorStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Health snapshot for serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub bridge: String,
    /// "healthy", "degraded" or "error".
    pub status: String,
    pub uptime_secs: u64,
    pub sensors_total: u64,
    /// Sensors online or degraded.
    pub sensors_responding: u64,
    /// Sensors offline.
    pub sensors_failed: u64,
    pub errors_total: u64,
    pub metrics_published: u64,
}

/// Sensor liveness information for serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorLiveness {
    pub sensor: String,
    pub status: SensorStatus,
    /// Last successful live read (millis since epoch, 0 if never).
    pub last_seen: i64,
    pub consecutive_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Error report for unified error publishing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    /// Timestamp (millis since epoch).
    pub timestamp: i64,
    /// Sensor identifier (if applicable).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sensor: Option<String>,
    pub error_type: ErrorType,
    pub message: String,
    /// Whether the next poll may succeed without intervention.
    pub retryable: bool,
}

/// Error type classification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    /// No complete response before the read timeout.
    Timeout,
    /// Serial port could not be opened or failed.
    PortUnavailable,
    /// Malformed or unexpected frame, or an exception response.
    ProtocolError,
    /// Register payload could not be decoded.
    ParseError,
    /// Sentinel register did not hold its expected value.
    ValidationFailed,
    /// Configuration error.
    ConfigError,
    /// Telemetry could not be published.
    PublishError,
    #[default]
    Other,
}

impl BridgeHealth {
    /// Create a new health tracker.
    pub fn new(bridge_name: impl Into<String>) -> Self {
        Self {
            bridge_name: bridge_name.into(),
            start_time: Instant::now(),
            sensors_total: AtomicU64::new(0),
            metrics_published: AtomicU64::new(0),
            errors_total: AtomicU64::new(0),
            sensors: RwLock::new(HashMap::new()),
            publisher: None,
        }
    }

    /// Set the publisher for health metrics.
    pub fn with_publisher(mut self, publisher: Publisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn set_sensors_total(&self, count: u64) {
        self.sensors_total.store(count, Ordering::SeqCst);
    }

    /// Record a fully live poll.
    pub fn record_sensor_success(&self, sensor_id: &str) {
        let now = chrono::Utc::now().timestamp_millis();

        let mut sensors = self.sensors.write();
        let state = sensors
            .entry(sensor_id.to_string())
            .or_insert_with(SensorState::new);

        state.status = SensorStatus::Online;
        state.last_seen = now;
        state.consecutive_failures = 0;
        state.last_error = None;
    }

    /// Record a failed or cache-served poll.
    ///
    /// The sensor is degraded until [`OFFLINE_AFTER_FAILURES`] consecutive
    /// failures, then offline. Returns the new status.
    pub fn record_sensor_failure(&self, sensor_id: &str, error: &str) -> SensorStatus {
        let mut sensors = self.sensors.write();
        let state = sensors
            .entry(sensor_id.to_string())
            .or_insert_with(SensorState::new);

        state.consecutive_failures += 1;
        state.last_error = Some(error.to_string());
        state.status = if state.consecutive_failures >= OFFLINE_AFTER_FAILURES {
            SensorStatus::Offline
        } else {
            SensorStatus::Degraded
        };

        self.errors_total.fetch_add(1, Ordering::SeqCst);
        state.status
    }

    pub fn record_metrics_published(&self, count: u64) {
        self.metrics_published.fetch_add(count, Ordering::SeqCst);
    }

    /// Get a snapshot of current health metrics.
    pub fn snapshot(&self) -> HealthSnapshot {
        let (responding, failed) = {
            let sensors = self.sensors.read();
            sensors
                .values()
                .fold((0u64, 0u64), |(ok, bad), state| match state.status {
                    SensorStatus::Online | SensorStatus::Degraded => (ok + 1, bad),
                    SensorStatus::Offline => (ok, bad + 1),
                    SensorStatus::Unknown => (ok, bad),
                })
        };
        let total = self.sensors_total.load(Ordering::SeqCst);

        let status = if responding == 0 && failed > 0 {
            "error"
        } else if failed > 0 {
            "degraded"
        } else {
            "healthy"
        };

        HealthSnapshot {
            bridge: self.bridge_name.clone(),
            status: status.to_string(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            sensors_total: total,
            sensors_responding: responding,
            sensors_failed: failed,
            errors_total: self.errors_total.load(Ordering::SeqCst),
            metrics_published: self.metrics_published.load(Ordering::SeqCst),
        }
    }

    /// Liveness of one sensor, if it was ever polled.
    pub fn sensor_liveness(&self, sensor_id: &str) -> Option<SensorLiveness> {
        let sensors = self.sensors.read();
        sensors
            .get(sensor_id)
            .map(|state| liveness(sensor_id, state))
    }

    /// Liveness of every polled sensor, sorted by id.
    pub fn all_sensor_liveness(&self) -> Vec<SensorLiveness> {
        let sensors = self.sensors.read();
        let mut all: Vec<_> = sensors
            .iter()
            .map(|(id, state)| liveness(id, state))
            .collect();
        all.sort_by(|a, b| a.sensor.cmp(&b.sensor));
        all
    }

    /// Publish the health snapshot to `{prefix}/@/health`.
    pub async fn publish_health(&self) -> Result<()> {
        let Some(ref publisher) = self.publisher else {
            return Ok(());
        };

        publisher.publish_report("health", &self.snapshot()).await
    }

    /// Publish sensor liveness to `{prefix}/@/sensors/{id}/liveness`.
    pub async fn publish_sensor_liveness(&self, sensor_id: &str) -> Result<()> {
        let Some(ref publisher) = self.publisher else {
            return Ok(());
        };

        if let Some(liveness) = self.sensor_liveness(sensor_id) {
            publisher
                .publish_report(&format!("sensors/{}/liveness", sensor_id), &liveness)
                .await?;
        }

        Ok(())
    }

    /// Publish an error report to `{prefix}/@/errors`.
    pub async fn publish_error(&self, report: &ErrorReport) -> Result<()> {
        let Some(ref publisher) = self.publisher else {
            return Ok(());
        };

        publisher.publish_report("errors", report).await
    }
}

fn liveness(sensor_id: &str, state: &SensorState) -> SensorLiveness {
    SensorLiveness {
        sensor: sensor_id.to_string(),
        status: state.status,
        last_seen: state.last_seen,
        consecutive_failures: state.consecutive_failures,
        last_error: state.last_error.clone(),
    }
}

impl ErrorReport {
    /// Create a new retryable error report.
    pub fn new(error_type: ErrorType, message: impl Into<String>) -> Self {
        Self {
            timestamp: chrono::Utc::now().timestamp_millis(),
            sensor: None,
            error_type,
            message: message.into(),
            retryable: true,
        }
    }

    /// Set the sensor this error relates to.
    pub fn with_sensor(mut self, sensor: impl Into<String>) -> Self {
        self.sensor = Some(sensor.into());
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Create a configuration error, which never clears on its own.
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorType::ConfigError, message).with_retryable(false)
    }
}
