//! Zenoh telemetry sink.
//!
//! Publishes each metric as a [`TelemetryPoint`] under
//! `{prefix}/{sensor}/{metric}` and keeps [`BridgeHealth`] in step with the
//! poll outcomes reported by the scheduler.

use std::collections::HashMap;
use std::sync::Arc;

use sensorbus_bridge_framework::{
    BridgeHealth, ErrorReport, ErrorType, Protocol, Publisher, Quality, SensorStatus,
    TelemetryPoint, TelemetryValue,
};
use sensorbus_rtu::error::{ErrorKind, SinkError};
use sensorbus_rtu::profile::{Readings, SensorKind};
use sensorbus_rtu::sink::{Attributes, PollFailure, PollOutcome, TelemetrySink};
use tracing::{debug, info, warn};

/// Attributes that describe the poll schedule rather than the sensor.
const UNLABELED_ATTRIBUTES: &[&str] = &["interval_secs"];

/// Sensor identity learned from its attributes.
#[derive(Debug, Default)]
struct SensorInfo {
    kind: Option<SensorKind>,
    labels: HashMap<String, String>,
}

/// Publishes sensor telemetry and health to Zenoh.
pub struct ZenohSink {
    publisher: Publisher,
    health: Arc<BridgeHealth>,
    sensors: HashMap<String, SensorInfo>,
    /// Metrics of the pending poll that came from the cache.
    pending_cached: HashMap<String, Vec<String>>,
}

impl ZenohSink {
    pub fn new(publisher: Publisher, health: Arc<BridgeHealth>) -> Self {
        Self {
            publisher,
            health,
            sensors: HashMap::new(),
            pending_cached: HashMap::new(),
        }
    }

    pub fn health(&self) -> &Arc<BridgeHealth> {
        &self.health
    }

    fn points(&self, sensor_id: &str, values: &Readings, cached: &[String]) -> Vec<TelemetryPoint> {
        let info = self.sensors.get(sensor_id);
        let kind = info.and_then(|i| i.kind);

        values
            .iter()
            .map(|(metric, value)| {
                let mut point = TelemetryPoint::new(
                    sensor_id,
                    Protocol::Modbus,
                    metric.as_str(),
                    TelemetryValue::Gauge(*value),
                )
                .with_quality(quality_of(metric, cached, kind));
                if let Some(info) = info {
                    point = point.with_labels(info.labels.clone());
                }
                point
            })
            .collect()
    }

    fn report_failure(&self, sensor_id: &str, failure: &PollFailure) {
        let previous = self
            .health
            .sensor_liveness(sensor_id)
            .map(|l| l.status)
            .unwrap_or_default();
        let status = self.health.record_sensor_failure(sensor_id, &failure.message);
        if status == SensorStatus::Offline && previous != SensorStatus::Offline {
            warn!(sensor = %sensor_id, error = %failure.message, "Sensor went offline");
        }

        let report = ErrorReport::new(error_type(failure.kind), failure.message.as_str())
            .with_sensor(sensor_id)
            .with_retryable(failure.retryable);
        let health = self.health.clone();
        let sensor = sensor_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = health.publish_error(&report).await {
                debug!(sensor = %sensor, error = %e, "Failed to publish error report");
            }
            if let Err(e) = health.publish_sensor_liveness(&sensor).await {
                debug!(sensor = %sensor, error = %e, "Failed to publish liveness");
            }
        });
    }

    fn report_success(&self, sensor_id: &str) {
        let previous = self.health.sensor_liveness(sensor_id).map(|l| l.status);
        self.health.record_sensor_success(sensor_id);

        // Liveness is republished on first contact and on recovery only.
        match previous {
            Some(SensorStatus::Online) => return,
            Some(_) => info!(sensor = %sensor_id, "Sensor back online"),
            None => debug!(sensor = %sensor_id, "First successful poll"),
        }

        let health = self.health.clone();
        let sensor = sensor_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = health.publish_sensor_liveness(&sensor).await {
                debug!(sensor = %sensor, error = %e, "Failed to publish liveness");
            }
        });
    }
}

impl TelemetrySink for ZenohSink {
    async fn connect(&mut self) -> Result<(), SinkError> {
        info!(
            prefix = %self.publisher.key_prefix(),
            format = ?self.publisher.format(),
            "Telemetry sink ready"
        );
        self.health
            .publish_health()
            .await
            .map_err(|e| SinkError(e.to_string()))
    }

    async fn send_telemetry(
        &mut self,
        sensor_id: &str,
        values: &Readings,
    ) -> Result<(), SinkError> {
        let cached = self.pending_cached.remove(sensor_id).unwrap_or_default();
        let points = self.points(sensor_id, values, &cached);

        let stats = self.publisher.publish_metrics(&points).await;
        self.health.record_metrics_published(stats.success as u64);

        if stats.failed > 0 {
            return Err(SinkError(format!(
                "{} of {} metrics for '{}' not published",
                stats.failed,
                stats.total(),
                sensor_id
            )));
        }
        Ok(())
    }

    async fn send_attributes(
        &mut self,
        sensor_id: &str,
        attributes: &Attributes,
    ) -> Result<(), SinkError> {
        self.sensors.insert(sensor_id.to_string(), sensor_info(attributes));

        self.publisher
            .publish_report(&format!("sensors/{}/attributes", sensor_id), attributes)
            .await
            .map_err(|e| SinkError(e.to_string()))
    }

    async fn disconnect(&mut self) -> Result<(), SinkError> {
        for liveness in self.health.all_sensor_liveness() {
            if let Err(e) = self.health.publish_sensor_liveness(&liveness.sensor).await {
                warn!(sensor = %liveness.sensor, error = %e, "Failed to publish final liveness");
            }
        }
        self.health
            .publish_health()
            .await
            .map_err(|e| SinkError(e.to_string()))
    }

    fn record_poll(&mut self, sensor_id: &str, outcome: &PollOutcome) {
        match outcome {
            PollOutcome::Success => self.report_success(sensor_id),
            PollOutcome::Degraded { failure, cached } => {
                self.pending_cached.insert(sensor_id.to_string(), cached.clone());
                self.report_failure(sensor_id, failure);
            }
            PollOutcome::Failed { failure } => self.report_failure(sensor_id, failure),
        }
    }
}

/// Quality of one emitted metric.
///
/// Register metrics are cached when listed as such. Derived metrics are
/// cached whenever any input of the cycle came from the cache.
fn quality_of(metric: &str, cached: &[String], kind: Option<SensorKind>) -> Quality {
    if cached.is_empty() {
        return Quality::Live;
    }
    if cached.iter().any(|m| m == metric) {
        return Quality::Cached;
    }
    let is_register =
        kind.is_some_and(|k| k.profile().registers.iter().any(|r| r.name == metric));
    if is_register {
        Quality::Live
    } else {
        Quality::Cached
    }
}

fn error_type(kind: ErrorKind) -> ErrorType {
    match kind {
        ErrorKind::Timeout => ErrorType::Timeout,
        ErrorKind::PortUnavailable => ErrorType::PortUnavailable,
        ErrorKind::Protocol => ErrorType::ProtocolError,
        ErrorKind::Decode => ErrorType::ParseError,
        ErrorKind::Validation => ErrorType::ValidationFailed,
        ErrorKind::Config => ErrorType::ConfigError,
        ErrorKind::Sink => ErrorType::PublishError,
        ErrorKind::Unavailable => ErrorType::Other,
    }
}

fn sensor_info(attributes: &Attributes) -> SensorInfo {
    let kind = attributes
        .get("type")
        .and_then(|t| t.to_string().parse::<SensorKind>().ok());
    let labels = attributes
        .iter()
        .filter(|(key, _)| !UNLABELED_ATTRIBUTES.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.to_string()))
        .collect();
    SensorInfo { kind, labels }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensorbus_rtu::sink::AttributeValue;

    #[test]
    fn test_quality_all_live() {
        assert_eq!(quality_of("ph_value", &[], Some(SensorKind::Ph)), Quality::Live);
    }

    #[test]
    fn test_quality_cached_register() {
        let cached = vec!["temperature".to_string()];
        assert_eq!(
            quality_of("temperature", &cached, Some(SensorKind::Ph)),
            Quality::Cached
        );
        assert_eq!(
            quality_of("ph_value", &cached, Some(SensorKind::Ph)),
            Quality::Live
        );
    }

    #[test]
    fn test_quality_derived_follows_cache() {
        let cached = vec!["liquid_level".to_string()];
        assert_eq!(
            quality_of("volume_percentage", &cached, Some(SensorKind::Radar)),
            Quality::Cached
        );
        // Unknown kind: anything not known to be a register is treated as derived.
        assert_eq!(quality_of("liquid_level", &cached, None), Quality::Cached);
    }

    #[test]
    fn test_error_type_mapping() {
        assert_eq!(error_type(ErrorKind::Timeout), ErrorType::Timeout);
        assert_eq!(error_type(ErrorKind::Protocol), ErrorType::ProtocolError);
        assert_eq!(error_type(ErrorKind::Validation), ErrorType::ValidationFailed);
        assert_eq!(error_type(ErrorKind::Decode), ErrorType::ParseError);
        assert_eq!(error_type(ErrorKind::Sink), ErrorType::PublishError);
    }

    #[test]
    fn test_sensor_info_from_attributes() {
        let mut attributes = Attributes::new();
        attributes.insert("type".into(), "radar".into());
        attributes.insert("device_id".into(), AttributeValue::Number(2.0));
        attributes.insert("interval_secs".into(), AttributeValue::Number(15.0));
        attributes.insert("location".into(), "basin north".into());

        let info = sensor_info(&attributes);
        assert_eq!(info.kind, Some(SensorKind::Radar));
        assert_eq!(info.labels["type"], "radar");
        assert_eq!(info.labels["device_id"], "2");
        assert_eq!(info.labels["location"], "basin north");
        assert!(!info.labels.contains_key("interval_secs"));
    }
}
