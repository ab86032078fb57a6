//! Telemetry sink boundary.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;

use serde::Serialize;

use crate::error::{Error, ErrorKind, SinkError};
use crate::profile::Readings;

/// Static sensor attribute value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Text(String),
    Number(f64),
    Flag(bool),
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Text(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::Text(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Number(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Flag(value)
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Text(s) => f.write_str(s),
            AttributeValue::Number(n) => write!(f, "{}", n),
            AttributeValue::Flag(b) => write!(f, "{}", b),
        }
    }
}

pub type Attributes = BTreeMap<String, AttributeValue>;

/// Summary of the errors met during one failed poll.
#[derive(Debug, Clone, PartialEq)]
pub struct PollFailure {
    /// Kind of the first error.
    pub kind: ErrorKind,
    /// True when every error is retryable.
    pub retryable: bool,
    /// All error messages, joined with "; ".
    pub message: String,
}

impl PollFailure {
    /// Summarize `errors`. Returns `None` when there are none.
    pub fn from_errors(errors: &[Error]) -> Option<Self> {
        let first = errors.first()?;
        Some(Self {
            kind: first.kind(),
            retryable: errors.iter().all(Error::is_retryable),
            message: errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; "),
        })
    }
}

/// Result of one scheduled poll, reported to the sink for health tracking.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// Every metric was read live.
    Success,
    /// The read failed but cached values were emitted for the listed metrics.
    Degraded {
        failure: PollFailure,
        cached: Vec<String>,
    },
    /// The read failed and nothing was emitted.
    Failed { failure: PollFailure },
}

impl PollOutcome {
    pub fn failure(&self) -> Option<&PollFailure> {
        match self {
            PollOutcome::Success => None,
            PollOutcome::Degraded { failure, .. } | PollOutcome::Failed { failure } => {
                Some(failure)
            }
        }
    }
}

/// Where decoded telemetry goes.
pub trait TelemetrySink: Send {
    fn connect(&mut self) -> impl Future<Output = Result<(), SinkError>> + Send;

    /// Publish one sensor's metric values.
    fn send_telemetry(
        &mut self,
        sensor_id: &str,
        values: &Readings,
    ) -> impl Future<Output = Result<(), SinkError>> + Send;

    /// Publish static sensor attributes.
    fn send_attributes(
        &mut self,
        sensor_id: &str,
        attributes: &Attributes,
    ) -> impl Future<Output = Result<(), SinkError>> + Send;

    fn disconnect(&mut self) -> impl Future<Output = Result<(), SinkError>> + Send;

    /// Observe a poll result, before its telemetry (if any) is sent.
    /// Does nothing by default.
    fn record_poll(&mut self, _sensor_id: &str, _outcome: &PollOutcome) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::error::{ConfigError, TransportError};
    use crate::frame::DeviceAddress;

    #[test]
    fn test_poll_failure_summary() {
        assert!(PollFailure::from_errors(&[]).is_none());

        let errors: Vec<Error> = vec![
            TransportError::Timeout(Duration::from_secs(1)).into(),
            Error::Unavailable {
                device: DeviceAddress::new(3).unwrap(),
                register: 0x0003,
            },
        ];
        let failure = PollFailure::from_errors(&errors).unwrap();
        assert_eq!(failure.kind, ErrorKind::Timeout);
        assert!(failure.retryable);
        assert_eq!(
            failure.message,
            "No response within 1s; Device 3: link down and no cached value for register 0x0003"
        );

        let errors: Vec<Error> = vec![
            TransportError::Timeout(Duration::from_secs(1)).into(),
            ConfigError::Invalid("bad".into()).into(),
        ];
        assert!(!PollFailure::from_errors(&errors).unwrap().retryable);
    }

    #[test]
    fn test_attribute_display() {
        assert_eq!(AttributeValue::from("ph").to_string(), "ph");
        assert_eq!(AttributeValue::Number(3.0).to_string(), "3");
        assert_eq!(AttributeValue::from(true).to_string(), "true");
    }
}
