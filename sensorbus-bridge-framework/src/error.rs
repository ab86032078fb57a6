//! Error types for the bridge framework.

use thiserror::Error;

/// Result type alias using [`BridgeError`].
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors raised while starting or running a bridge.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// The file is not valid JSON5 for the bridge's config type.
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(String),

    /// Parsed, but rejected by the bridge (bus settings, sensor list).
    #[error("Configuration validation failed: {0}")]
    ConfigValidation(String),

    #[error("Zenoh connection error: {0}")]
    ZenohConnection(String),

    /// A metric or report could not be encoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Failed to publish to {key}: {message}")]
    Publish { key: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ConfigValidation(msg.into())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<json5::Error> for BridgeError {
    fn from(err: json5::Error) -> Self {
        Self::ConfigParse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            BridgeError::validation("At least one sensor required").to_string(),
            "Configuration validation failed: At least one sensor required"
        );

        let err = BridgeError::Publish {
            key: "sensorbus/modbus/ph1/ph_value".into(),
            message: "session closed".into(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to publish to sensorbus/modbus/ph1/ph_value: session closed"
        );
    }

    #[test]
    fn test_json5_error_is_parse_error() {
        let err: BridgeError = json5::from_str::<serde_json::Value>("{ bus: ")
            .unwrap_err()
            .into();
        assert!(matches!(err, BridgeError::ConfigParse(_)));
    }
}
