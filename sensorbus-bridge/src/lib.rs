//! Zenoh bridge for Modbus RTU sensors on an RS-485 bus.
//!
//! # Key Expressions
//!
//! ```text
//! sensorbus/modbus/<sensor>/<metric>                  telemetry
//! sensorbus/modbus/@/sensors/<sensor>/attributes      static attributes
//! sensorbus/modbus/@/sensors/<sensor>/liveness        per-sensor liveness
//! sensorbus/modbus/@/health                           bridge health
//! sensorbus/modbus/@/errors                           error reports
//! sensorbus/modbus/@/status                           running / offline
//! ```
//!
//! Where:
//! - `<sensor>` - Sensor id from configuration
//! - `<metric>` - Metric name from the sensor profile (e.g. `ph_value`,
//!   `liquid_level`, `volume_percentage`)

pub mod config;
pub mod sink;
pub mod transport;
