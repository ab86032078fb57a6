//! sensorbus bridge framework
//!
//! Common abstractions for bridges that publish sensor telemetry to Zenoh.
//!
//! # Overview
//!
//! This framework provides:
//! - [`BridgeConfig`] trait for configuration loading and validation
//! - [`BridgeRunner`] for managing bridge lifecycle (startup, shutdown, signal handling)
//! - [`Publisher`] for publishing telemetry to Zenoh with automatic serialization
//! - [`BridgeArgs`] for common CLI argument parsing
//! - [`BridgeStatus`] for the running/offline status message
//! - [`BridgeHealth`] for per-sensor liveness and error reports
//!
//! # Example
//!
//! ```ignore
//! use sensorbus_bridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = BridgeArgs::parse_with_default("sensorbus.json5");
//!     let config = MyBridgeConfig::load(&args.config)?;
//!
//!     let mut runner = BridgeRunner::new("modbus", config).await?;
//!
//!     let shutdown = runner.shutdown_signal();
//!     runner.spawn("worker", my_worker(runner.publisher(), shutdown));
//!
//!     // Run until Ctrl+C
//!     runner.run_with_metadata(None).await
//! }
//! ```

mod args;
mod config;
mod error;
mod health;
mod publisher;
mod runner;
mod status;

pub use args::BridgeArgs;
pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
pub use health::{
    BridgeHealth, ErrorReport, ErrorType, HealthSnapshot, OFFLINE_AFTER_FAILURES, SensorLiveness,
    SensorStatus,
};
pub use publisher::{PublishStats, Publisher};
pub use runner::{BridgeRunner, run_bridge};
pub use status::{BridgeState, BridgeStatus, StatusPublisher};

// Re-export commonly used types from sensorbus-common
pub use sensorbus_common::{
    Format, LoggingConfig, Protocol, Quality, TelemetryPoint, TelemetryValue, ZenohConfig,
};
