//! Serial link boundary.
//!
//! [`Transport`] is the raw byte pipe the bus arbiter drives. The production
//! implementation wraps a `tokio-serial` stream; tests and the simulated bus
//! provide their own.

use std::future::Future;
use std::io;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt, SerialStream};
use tracing::info;

use crate::error::TransportError;

/// Byte-level access to a half-duplex link.
pub trait Transport: Send + 'static {
    /// Write the whole buffer and flush.
    fn write_all(&mut self, data: &[u8]) -> impl Future<Output = io::Result<()>> + Send;

    /// Read whatever is available into `buf`, waiting for at least one byte.
    /// Returns 0 at end of stream.
    fn read(&mut self, buf: &mut [u8]) -> impl Future<Output = io::Result<usize>> + Send;

    /// Discard any bytes received but not yet read.
    fn clear_input(&mut self) -> io::Result<()>;
}

/// Serial parity setting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
}

/// Serial line settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSettings {
    pub port: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: u8,
}

impl SerialSettings {
    /// 9600 8N1 on `port`.
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: 9600,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: 1,
        }
    }
}

/// A [`Transport`] over a local serial port.
pub struct SerialTransport {
    stream: SerialStream,
}

impl SerialTransport {
    /// Open the port described by `settings`.
    pub fn open(settings: &SerialSettings) -> Result<Self, TransportError> {
        let parity = match settings.parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Even => tokio_serial::Parity::Even,
            Parity::Odd => tokio_serial::Parity::Odd,
        };

        let stop_bits = match settings.stop_bits {
            2 => tokio_serial::StopBits::Two,
            _ => tokio_serial::StopBits::One,
        };

        let data_bits = match settings.data_bits {
            5 => tokio_serial::DataBits::Five,
            6 => tokio_serial::DataBits::Six,
            7 => tokio_serial::DataBits::Seven,
            _ => tokio_serial::DataBits::Eight,
        };

        let stream = tokio_serial::new(&settings.port, settings.baud_rate)
            .parity(parity)
            .stop_bits(stop_bits)
            .data_bits(data_bits)
            .open_native_async()
            .map_err(|e| TransportError::PortUnavailable(format!("{}: {}", settings.port, e)))?;

        info!(
            port = %settings.port,
            baud_rate = settings.baud_rate,
            "Opened serial port"
        );

        Ok(Self { stream })
    }
}

impl Transport for SerialTransport {
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        AsyncWriteExt::write_all(&mut self.stream, data).await?;
        self.stream.flush().await
    }

    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        AsyncReadExt::read(&mut self.stream, buf).await
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.stream.clear(ClearBuffer::Input).map_err(io::Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_8n1() {
        let settings = SerialSettings::new("/dev/ttyUSB0");
        assert_eq!(settings.baud_rate, 9600);
        assert_eq!(settings.data_bits, 8);
        assert_eq!(settings.parity, Parity::None);
        assert_eq!(settings.stop_bits, 1);
    }

    #[tokio::test]
    async fn test_open_missing_port_is_unavailable() {
        let settings = SerialSettings::new("/dev/does-not-exist-sensorbus");
        match SerialTransport::open(&settings) {
            Err(TransportError::PortUnavailable(msg)) => {
                assert!(msg.contains("/dev/does-not-exist-sensorbus"))
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("opened a port that does not exist"),
        }
    }
}
