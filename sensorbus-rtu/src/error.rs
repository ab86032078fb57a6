//! Error types for the Modbus RTU master.

use std::time::Duration;

use thiserror::Error;

use crate::frame::{DeviceAddress, ExceptionCode};

/// Result type alias using the crate's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Frame-level failures: building a request or validating a response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Invalid device address {0} (expected 1-247)")]
    InvalidAddress(u8),

    #[error("Invalid register quantity {count} (expected 1-{max})")]
    InvalidQuantity { count: usize, max: usize },

    #[error("Response too short: expected {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    #[error("CRC mismatch: computed 0x{computed:04X}, received 0x{received:04X}")]
    CrcMismatch { computed: u16, received: u16 },

    #[error("Function code mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    FunctionCodeMismatch { expected: u8, actual: u8 },

    #[error("Response from device {actual}, expected device {expected}")]
    AddressMismatch { expected: u8, actual: u8 },

    #[error("Write echo mismatch at register 0x{register:04X}")]
    EchoMismatch { register: u16 },

    #[error("Exception response to function 0x{function:02X}: {code}")]
    ExceptionResponse { function: u8, code: ExceptionCode },
}

/// Failures on the serial link itself.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("No response within {0:?}")]
    Timeout(Duration),

    #[error("Short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },

    #[error("Serial port unavailable: {0}")]
    PortUnavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures interpreting register payloads.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("Format mismatch: expected {expected} bytes, got {actual}")]
    FormatMismatch { expected: usize, actual: usize },

    #[error(
        "Sentinel register 0x{register:04X} read {actual}, expected {expected} (word order misconfigured?)"
    )]
    SentinelValidationFailed {
        register: u16,
        expected: f32,
        actual: f32,
    },
}

/// Failures turning sensor configuration into pollable sensors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Unknown sensor type '{0}'")]
    UnknownSensorType(String),

    #[error("Sensor '{sensor}': missing field '{field}'")]
    MissingField { sensor: String, field: String },

    #[error("{0}")]
    Invalid(String),
}

/// A telemetry sink refused or failed an operation.
#[derive(Debug, Error)]
#[error("Telemetry sink error: {0}")]
pub struct SinkError(pub String);

/// Errors returned by the Modbus RTU master.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("Device {0} is not registered on the bus")]
    DeviceNotFound(DeviceAddress),

    #[error("Device {device}: link down and no cached value for register 0x{register:04X}")]
    Unavailable { device: DeviceAddress, register: u16 },
}

/// Coarse classification of an [`Error`], used when reporting failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No complete response in time.
    Timeout,
    /// The serial port failed.
    PortUnavailable,
    /// Corrupt, mismatched or exception frame.
    Protocol,
    /// Register payload could not be interpreted.
    Decode,
    /// Sentinel register held the wrong value.
    Validation,
    Config,
    Sink,
    /// Link down with nothing cached.
    Unavailable,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Transport(TransportError::Timeout(_) | TransportError::ShortRead { .. }) => {
                ErrorKind::Timeout
            }
            Error::Transport(_) => ErrorKind::PortUnavailable,
            Error::Protocol(_) => ErrorKind::Protocol,
            Error::Decode(DecodeError::SentinelValidationFailed { .. }) => ErrorKind::Validation,
            Error::Decode(_) => ErrorKind::Decode,
            Error::Config(_) | Error::DeviceNotFound(_) => ErrorKind::Config,
            Error::Sink(_) => ErrorKind::Sink,
            Error::Unavailable { .. } => ErrorKind::Unavailable,
        }
    }

    /// Whether a later attempt at the same operation could succeed.
    ///
    /// Link and frame corruption are transient; a malformed request, an
    /// unknown device or a configuration problem will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transport(_) => true,
            Error::Protocol(
                ProtocolError::InvalidAddress(_) | ProtocolError::InvalidQuantity { .. },
            ) => false,
            Error::Protocol(_) => true,
            Error::Decode(DecodeError::SentinelValidationFailed { .. }) => false,
            Error::Decode(_) => true,
            Error::Sink(_) | Error::Unavailable { .. } => true,
            Error::Config(_) | Error::DeviceNotFound(_) => false,
        }
    }

    /// Whether the failure happened on the wire (transport or framing).
    ///
    /// Corrupt frames and replies from the wrong device count as link
    /// failures: the bus cannot be trusted for the rest of the cycle. An
    /// exception reply does not, since the device parsed the request.
    pub fn is_link_failure(&self) -> bool {
        match self {
            Error::Transport(_) => true,
            Error::Protocol(
                ProtocolError::InvalidAddress(_)
                | ProtocolError::InvalidQuantity { .. }
                | ProtocolError::ExceptionResponse { .. },
            ) => false,
            Error::Protocol(_) => true,
            Error::Unavailable { .. } => true,
            _ => false,
        }
    }

    /// The device answered with a Modbus exception.
    pub fn is_exception(&self) -> bool {
        matches!(self, Error::Protocol(ProtocolError::ExceptionResponse { .. }))
    }

    /// Whether the last known value may stand in for the failed read: link
    /// failures and exceptions for a single block.
    pub fn allows_fallback(&self) -> bool {
        self.is_link_failure() || self.is_exception()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let timeout: Error = TransportError::Timeout(Duration::from_secs(1)).into();
        assert!(timeout.is_retryable());
        assert!(timeout.is_link_failure());

        let crc: Error = ProtocolError::CrcMismatch {
            computed: 0x0A84,
            received: 0x0000,
        }
        .into();
        assert!(crc.is_retryable());

        let bad_count: Error = ProtocolError::InvalidQuantity { count: 0, max: 125 }.into();
        assert!(!bad_count.is_retryable());
        assert!(!bad_count.is_link_failure());

        let config: Error = ConfigError::UnknownSensorType("sonar".into()).into();
        assert!(!config.is_retryable());
    }

    #[test]
    fn test_link_failure_classification() {
        let crc: Error = ProtocolError::CrcMismatch {
            computed: 0x0A84,
            received: 0x0000,
        }
        .into();
        assert!(crc.is_link_failure());

        let stray: Error = ProtocolError::AddressMismatch {
            expected: 3,
            actual: 4,
        }
        .into();
        assert!(stray.is_link_failure());

        let exception: Error = ProtocolError::ExceptionResponse {
            function: 0x03,
            code: ExceptionCode::IllegalDataAddress,
        }
        .into();
        assert!(!exception.is_link_failure());
        assert!(exception.is_exception());
        assert!(exception.allows_fallback());
        assert_eq!(exception.kind(), ErrorKind::Protocol);
    }

    #[test]
    fn test_error_kind() {
        let timeout: Error = TransportError::Timeout(Duration::from_secs(1)).into();
        assert_eq!(timeout.kind(), ErrorKind::Timeout);

        let io: Error = TransportError::Io(std::io::Error::other("unplugged")).into();
        assert_eq!(io.kind(), ErrorKind::PortUnavailable);

        let sentinel: Error = DecodeError::SentinelValidationFailed {
            register: 0x00F0,
            expected: 1234.0,
            actual: 0.0,
        }
        .into();
        assert_eq!(sentinel.kind(), ErrorKind::Validation);

        let mismatch: Error = DecodeError::FormatMismatch {
            expected: 4,
            actual: 2,
        }
        .into();
        assert_eq!(mismatch.kind(), ErrorKind::Decode);
    }

    #[test]
    fn test_error_messages() {
        let err = ProtocolError::CrcMismatch {
            computed: 0x0A84,
            received: 0x1234,
        };
        assert_eq!(
            err.to_string(),
            "CRC mismatch: computed 0x0A84, received 0x1234"
        );

        let err = ConfigError::MissingField {
            sensor: "tank1".into(),
            field: "container".into(),
        };
        assert_eq!(err.to_string(), "Sensor 'tank1': missing field 'container'");
    }
}
