//! Configuration for the sensorbus bridge.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sensorbus_bridge_framework::{BridgeConfig, BridgeError, Format, LoggingConfig, ZenohConfig};
use sensorbus_rtu::arbiter::BusTiming;
use sensorbus_rtu::error::ConfigError;
use sensorbus_rtu::sensor::SensorDefinition;
use sensorbus_rtu::transport::{Parity, SerialSettings};

/// Complete bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorBusBridgeConfig {
    /// Zenoh connection settings
    #[serde(default)]
    pub zenoh: ZenohConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Telemetry serialization format
    #[serde(default)]
    pub serialization: Format,

    /// Key expression prefix (default: "sensorbus/modbus")
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Serial bus settings
    #[serde(default)]
    pub bus: BusConfig,

    /// Sensors on the bus, polled in this order
    pub sensors: Vec<SensorDefinition>,
}

fn default_key_prefix() -> String {
    "sensorbus/modbus".to_string()
}

/// RS-485 line and timing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Serial port path (e.g., "/dev/ttyUSB0" or "COM1")
    #[serde(default = "default_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_data_bits")]
    pub data_bits: u8,

    /// "none", "even" or "odd"
    #[serde(default)]
    pub parity: Parity,

    /// 1 or 2
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,

    /// Response timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Delay between writing a request and reading, in milliseconds
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    /// Minimum idle time between transactions, in milliseconds
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Scheduler tick in milliseconds
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,

    /// Use an in-process simulated bus instead of the serial port
    #[serde(default)]
    pub simulate: bool,
}

fn default_port() -> String {
    "/dev/ttyS0".to_string()
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_settle_ms() -> u64 {
    100
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_tick_ms() -> u64 {
    1000
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            parity: Parity::default(),
            stop_bits: default_stop_bits(),
            timeout_ms: default_timeout_ms(),
            settle_ms: default_settle_ms(),
            debounce_ms: default_debounce_ms(),
            tick_ms: default_tick_ms(),
            simulate: false,
        }
    }
}

impl BusConfig {
    pub fn serial_settings(&self) -> SerialSettings {
        SerialSettings {
            port: self.port.clone(),
            baud_rate: self.baud_rate,
            data_bits: self.data_bits,
            parity: self.parity,
            stop_bits: self.stop_bits,
        }
    }

    pub fn timing(&self) -> BusTiming {
        BusTiming {
            debounce: Duration::from_millis(self.debounce_ms),
            settle: Duration::from_millis(self.settle_ms),
            read_timeout: Duration::from_millis(self.timeout_ms),
        }
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.port.is_empty() && !self.simulate {
            return Err(BridgeError::validation("bus.port cannot be empty"));
        }
        if self.baud_rate == 0 {
            return Err(BridgeError::validation("bus.baud_rate must be positive"));
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(BridgeError::validation(format!(
                "bus.data_bits must be 5-8, got {}",
                self.data_bits
            )));
        }
        if !matches!(self.stop_bits, 1 | 2) {
            return Err(BridgeError::validation(format!(
                "bus.stop_bits must be 1 or 2, got {}",
                self.stop_bits
            )));
        }
        if self.timeout_ms == 0 || self.tick_ms == 0 {
            return Err(BridgeError::validation(
                "bus.timeout_ms and bus.tick_ms must be positive",
            ));
        }
        Ok(())
    }
}

/// The subset of the bridge configuration used for provisioning.
///
/// Reads the same file as the bridge; everything but `logging` and `bus`
/// is ignored, so a file without sensors is accepted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProvisionConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub bus: BusConfig,
}

impl SensorBusBridgeConfig {
    /// Check every sensor definition.
    ///
    /// Unknown sensor types pass here; they are skipped with a warning when
    /// the poll entries are built.
    fn validate_sensors(&self) -> Result<(), ConfigError> {
        if self.sensors.is_empty() {
            return Err(ConfigError::Invalid(
                "At least one sensor must be configured".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for sensor in &self.sensors {
            if !seen.insert(sensor.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "Duplicate sensor id '{}'",
                    sensor.id
                )));
            }
            match sensor.validate() {
                Ok(_) | Err(ConfigError::UnknownSensorType(_)) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }
}

impl BridgeConfig for SensorBusBridgeConfig {
    fn zenoh(&self) -> &ZenohConfig {
        &self.zenoh
    }

    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    fn serialization(&self) -> Format {
        self.serialization
    }

    fn validate(&self) -> Result<(), BridgeError> {
        self.bus.validate()?;
        self.validate_sensors()
            .map_err(|e| BridgeError::validation(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensorbus_rtu::decode::WordOrder;

    fn parse(json: &str) -> Result<SensorBusBridgeConfig, BridgeError> {
        <SensorBusBridgeConfig as BridgeConfig>::parse(json)
    }

    #[test]
    fn test_parse_minimal_config() {
        let config = parse(
            r#"{
                sensors: [
                    { id: "ph1", type: "ph", device_id: 3 },
                ],
            }"#,
        )
        .unwrap();

        assert_eq!(config.key_prefix, "sensorbus/modbus");
        assert_eq!(config.serialization, Format::Json);
        assert_eq!(config.bus.port, "/dev/ttyS0");
        assert_eq!(config.bus.baud_rate, 9600);
        assert_eq!(config.bus.parity, Parity::None);
        assert!(!config.bus.simulate);
        assert_eq!(config.bus.timing(), BusTiming::default());
        assert_eq!(config.bus.tick(), Duration::from_secs(1));

        let sensor = &config.sensors[0];
        assert_eq!(sensor.transmission.interval, 15);
        assert_eq!(sensor.word_order, WordOrder::Swapped);
        assert!(sensor.sentinel.is_none());
    }

    #[test]
    fn test_parse_full_bus_config() {
        let config = parse(
            r#"{
                zenoh: { mode: "client", connect: ["tcp/10.0.0.5:7447"] },
                serialization: "cbor",
                bus: {
                    port: "/dev/ttyUSB0",
                    baud_rate: 19200,
                    parity: "even",
                    stop_bits: 2,
                    timeout_ms: 800,
                    settle_ms: 50,
                    debounce_ms: 250,
                },
                sensors: [
                    {
                        id: "flow1",
                        type: "flow",
                        device_id: 4,
                        word_order: "big_endian",
                        sentinel: { register: 240, expected: 1234.0 },
                        transmission: { interval: 60 },
                    },
                ],
            }"#,
        )
        .unwrap();

        let settings = config.bus.serial_settings();
        assert_eq!(settings.port, "/dev/ttyUSB0");
        assert_eq!(settings.baud_rate, 19200);
        assert_eq!(settings.parity, Parity::Even);
        assert_eq!(settings.stop_bits, 2);

        let timing = config.bus.timing();
        assert_eq!(timing.read_timeout, Duration::from_millis(800));
        assert_eq!(timing.settle, Duration::from_millis(50));
        assert_eq!(timing.debounce, Duration::from_millis(250));

        assert_eq!(config.serialization, Format::Cbor);
        assert_eq!(config.sensors[0].word_order, WordOrder::BigEndian);
        assert_eq!(config.sensors[0].interval(), Duration::from_secs(60));

        let sentinel = config.sensors[0].sentinel.unwrap();
        assert_eq!(sentinel.register, 0x00F0);
        assert_eq!(sentinel.tolerance, 0.01);
    }

    #[test]
    fn test_unknown_type_passes_validation() {
        let config = parse(
            r#"{
                sensors: [
                    { id: "ph1", type: "ph", device_id: 1 },
                    { id: "sonar1", type: "sonar", device_id: 2 },
                ],
            }"#,
        );
        assert!(config.is_ok());
    }

    #[test]
    fn test_radar_without_container_rejected() {
        let err = parse(r#"{ sensors: [{ id: "tank1", type: "radar", device_id: 2 }] }"#)
            .unwrap_err();
        assert!(matches!(err, BridgeError::ConfigValidation(msg) if msg.contains("container")));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let err = parse(
            r#"{
                sensors: [
                    { id: "ph1", type: "ph", device_id: 1 },
                    { id: "ph1", type: "turbidity", device_id: 2 },
                ],
            }"#,
        )
        .unwrap_err();
        assert!(matches!(err, BridgeError::ConfigValidation(msg) if msg.contains("Duplicate")));
    }

    #[test]
    fn test_empty_sensor_list_rejected() {
        assert!(parse("{ sensors: [] }").is_err());
    }

    #[test]
    fn test_provision_config_ignores_sensors() {
        let config: ProvisionConfig = sensorbus_common::parse_config(
            r#"{
                logging: { level: "debug" },
                bus: { port: "/dev/ttyUSB1", baud_rate: 4800 },
                sensors: [{ id: "x", type: "sonar", device_id: 0 }],
            }"#,
        )
        .unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.bus.port, "/dev/ttyUSB1");
        assert_eq!(config.bus.baud_rate, 4800);

        let empty: ProvisionConfig = sensorbus_common::parse_config("{}").unwrap();
        assert_eq!(empty.bus.port, "/dev/ttyS0");
    }

    #[test]
    fn test_invalid_bus_settings_rejected() {
        let err = parse(
            r#"{
                bus: { stop_bits: 3 },
                sensors: [{ id: "ph1", type: "ph", device_id: 1 }],
            }"#,
        )
        .unwrap_err();
        assert!(matches!(err, BridgeError::ConfigValidation(msg) if msg.contains("stop_bits")));

        assert!(
            parse(
                r#"{
                    bus: { parity: "mark" },
                    sensors: [{ id: "ph1", type: "ph", device_id: 1 }],
                }"#,
            )
            .is_err()
        );
    }
}
