use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// A single sensor measurement published by a bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryPoint {
    /// Unix epoch milliseconds when the measurement was taken.
    pub timestamp: i64,

    /// Sensor identifier from the bridge configuration (e.g., "tank1").
    pub source: String,

    /// Bus protocol the value was read over.
    pub protocol: Protocol,

    /// Metric name (e.g., "liquid_level", "ph_value").
    pub metric: String,

    /// The measured value.
    pub value: TelemetryValue,

    /// Whether the value was read live or served from the last-known-value cache.
    #[serde(default)]
    pub quality: Quality,

    /// Additional context labels (e.g., device address, sensor type).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
}

impl TelemetryPoint {
    /// Create a new live telemetry point with the current timestamp.
    pub fn new(
        source: impl Into<String>,
        protocol: Protocol,
        metric: impl Into<String>,
        value: TelemetryValue,
    ) -> Self {
        Self {
            timestamp: current_timestamp_millis(),
            source: source.into(),
            protocol,
            metric: metric.into(),
            value,
            quality: Quality::Live,
            labels: HashMap::new(),
        }
    }

    /// Set the quality of this point.
    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = quality;
        self
    }

    /// Add a label to this telemetry point.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Add multiple labels to this telemetry point.
    pub fn with_labels(mut self, labels: HashMap<String, String>) -> Self {
        self.labels.extend(labels);
        self
    }
}

/// Typed telemetry value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum TelemetryValue {
    /// Counter (monotonically increasing).
    Counter(u64),

    /// Gauge (can go up or down).
    Gauge(f64),

    /// Text value.
    Text(String),

    /// Boolean value.
    Boolean(bool),
}

impl TelemetryValue {
    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            TelemetryValue::Counter(v) => Some(*v as f64),
            TelemetryValue::Gauge(v) => Some(*v),
            TelemetryValue::Boolean(v) => Some(if *v { 1.0 } else { 0.0 }),
            TelemetryValue::Text(_) => None,
        }
    }
}

impl From<u64> for TelemetryValue {
    fn from(v: u64) -> Self {
        TelemetryValue::Counter(v)
    }
}

impl From<f64> for TelemetryValue {
    fn from(v: f64) -> Self {
        TelemetryValue::Gauge(v)
    }
}

impl From<String> for TelemetryValue {
    fn from(v: String) -> Self {
        TelemetryValue::Text(v)
    }
}

impl From<&str> for TelemetryValue {
    fn from(v: &str) -> Self {
        TelemetryValue::Text(v.to_string())
    }
}

impl From<bool> for TelemetryValue {
    fn from(v: bool) -> Self {
        TelemetryValue::Boolean(v)
    }
}

/// Where a published value came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    /// Read from the device during this poll.
    #[default]
    Live,
    /// Substituted from the last successful read after a link failure.
    Cached,
}

impl Quality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Live => "live",
            Quality::Cached => "cached",
        }
    }
}

impl std::fmt::Display for Quality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol identifier for telemetry sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Modbus RTU over a serial line.
    Modbus,
}

impl Protocol {
    /// Get the string representation used in key expressions.
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Modbus => "modbus",
        }
    }

    /// Parse the key expression form of a protocol.
    pub fn from_key_segment(segment: &str) -> Option<Self> {
        match segment {
            "modbus" => Some(Protocol::Modbus),
            _ => None,
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Get the current timestamp in milliseconds since Unix epoch.
///
/// Returns 0 if system time is before Unix epoch.
pub fn current_timestamp_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
