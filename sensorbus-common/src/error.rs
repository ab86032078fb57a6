//! Errors raised while loading configuration, talking to Zenoh and encoding
//! telemetry payloads.

use thiserror::Error;

use crate::serialization::Format;

/// Error type shared by the sensorbus bridge crates.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Zenoh error: {0}")]
    Zenoh(#[from] zenoh::Error),

    /// A value could not be written in the bridge's payload format.
    #[error("Failed to encode {format} payload: {message}")]
    Encode { format: Format, message: String },

    /// A received payload is not valid in the format it was read as.
    #[error("Failed to decode {format} payload: {message}")]
    Decode { format: Format, message: String },
}

/// Result alias for [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
