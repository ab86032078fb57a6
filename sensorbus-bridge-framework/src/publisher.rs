//! Zenoh publisher for sensor telemetry and bridge reports.
//!
//! Metrics go to `{prefix}/{sensor}/{metric}` in the bridge's payload format.
//! Reports about the bridge itself (status, health, liveness, errors and
//! sensor attributes) live under `{prefix}/@/` and are always JSON.

use std::sync::Arc;

use serde::Serialize;
use sensorbus_common::{Format, TelemetryPoint, encode};

use crate::error::{BridgeError, Result};

/// Publishes telemetry and reports for one bridge.
#[derive(Clone, Debug)]
pub struct Publisher {
    session: Arc<zenoh::Session>,
    key_prefix: String,
    format: Format,
}

impl Publisher {
    pub fn new(
        session: Arc<zenoh::Session>,
        key_prefix: impl Into<String>,
        format: Format,
    ) -> Self {
        Self {
            session,
            key_prefix: key_prefix.into(),
            format,
        }
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    /// Payload format of metrics.
    pub fn format(&self) -> Format {
        self.format
    }

    /// Publish one metric under its sensor (`point.source`).
    pub async fn publish_metric(&self, point: &TelemetryPoint) -> Result<()> {
        let key = metric_key(&self.key_prefix, &point.source, &point.metric);
        let payload =
            encode(point, self.format).map_err(|e| BridgeError::Serialization(e.to_string()))?;
        self.put(key, payload).await
    }

    /// Publish the metrics of one poll, logging and counting failures.
    pub async fn publish_metrics<'a, I>(&self, points: I) -> PublishStats
    where
        I: IntoIterator<Item = &'a TelemetryPoint>,
    {
        let mut stats = PublishStats::default();
        for point in points {
            match self.publish_metric(point).await {
                Ok(()) => stats.success += 1,
                Err(e) => {
                    stats.failed += 1;
                    tracing::warn!(sensor = %point.source, metric = %point.metric, error = %e, "Failed to publish metric");
                }
            }
        }
        stats
    }

    /// Publish a JSON report to `{prefix}/@/{path}`.
    pub async fn publish_report<T: Serialize>(&self, path: &str, report: &T) -> Result<()> {
        let payload = serde_json::to_vec(report)?;
        self.put(report_key(&self.key_prefix, path), payload).await
    }

    async fn put(&self, key: String, payload: Vec<u8>) -> Result<()> {
        let result = self.session.put(&key, payload).await;
        result.map_err(|e| BridgeError::Publish {
            key,
            message: e.to_string(),
        })
    }
}

fn metric_key(prefix: &str, sensor: &str, metric: &str) -> String {
    join_key(prefix, &format!("{}/{}", sensor, metric))
}

fn report_key(prefix: &str, path: &str) -> String {
    join_key(prefix, &format!("@/{}", path))
}

/// Append `suffix` to `prefix` with a `/` separator.
fn join_key(prefix: &str, suffix: &str) -> String {
    match (prefix.is_empty(), suffix.is_empty()) {
        (_, true) => prefix.to_string(),
        (true, false) => suffix.to_string(),
        (false, false) => format!("{}/{}", prefix.trim_end_matches('/'), suffix),
    }
}

/// Outcome of publishing one poll's metrics.
#[derive(Debug, Default, Clone, Copy)]
pub struct PublishStats {
    pub success: usize,
    pub failed: usize,
}

impl PublishStats {
    pub fn total(&self) -> usize {
        self.success + self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_key() {
        assert_eq!(join_key("sensorbus/modbus/", "ph1"), "sensorbus/modbus/ph1");
        assert_eq!(join_key("sensorbus/modbus", ""), "sensorbus/modbus");
        assert_eq!(join_key("", "ph1/ph_value"), "ph1/ph_value");
    }

    #[test]
    fn test_metric_and_report_keys() {
        assert_eq!(
            metric_key("sensorbus/modbus", "tank1", "liquid_level"),
            "sensorbus/modbus/tank1/liquid_level"
        );
        assert_eq!(
            report_key("sensorbus/modbus", "sensors/ph1/liveness"),
            "sensorbus/modbus/@/sensors/ph1/liveness"
        );
        assert_eq!(report_key("sensorbus/modbus/", "health"), "sensorbus/modbus/@/health");
    }

    #[test]
    fn test_publish_stats_total() {
        let stats = PublishStats {
            success: 6,
            failed: 2,
        };
        assert_eq!(stats.total(), 8);
        assert_eq!(PublishStats::default().total(), 0);
    }
}
