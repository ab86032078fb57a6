//! Zenoh bridge for Modbus RTU sensors.
//!
//! Polls radar, pH, turbidity and flow sensors on one RS-485 bus and
//! publishes their readings to Zenoh as telemetry.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sensorbus_bridge::config::SensorBusBridgeConfig;
use sensorbus_bridge::sink::ZenohSink;
use sensorbus_bridge::transport::BusTransport;
use sensorbus_bridge_framework::{BridgeHealth, BridgeRunner, ErrorReport, run_bridge};
use sensorbus_rtu::context::BusContext;
use sensorbus_rtu::error::ConfigError;
use sensorbus_rtu::scheduler::{PollingScheduler, shutdown_requested};
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};

/// How often the bridge health snapshot is published.
const HEALTH_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    run_bridge("modbus", "sensorbus.json5", setup).await
}

fn setup(runner: &mut BridgeRunner<SensorBusBridgeConfig>) -> Result<Option<serde_json::Value>> {
    let config = runner.config().clone();
    let bus = &config.bus;

    let transport = BusTransport::open(bus, &config.sensors)
        .with_context(|| format!("Failed to open serial port {}", bus.port))?;
    let simulated = transport.is_simulated();

    let ctx = BusContext::new(transport, bus.timing());
    let entries = ctx
        .build_poll_entries(&config.sensors)
        .context("Failed to configure sensors")?;
    let sensor_ids: Vec<String> = entries
        .iter()
        .map(|e| e.sensor().id().to_string())
        .collect();

    let health = Arc::new(BridgeHealth::new(runner.name()).with_publisher(runner.publisher()));
    health.set_sensors_total(entries.len() as u64);

    tracing::info!(
        port = %bus.port,
        baud_rate = bus.baud_rate,
        simulated,
        sensors = entries.len(),
        "Bus ready"
    );

    let skipped: Vec<ErrorReport> = config
        .sensors
        .iter()
        .filter_map(|definition| match definition.validate() {
            Err(e @ ConfigError::UnknownSensorType(_)) => Some(
                ErrorReport::config(format!("Sensor skipped: {}", e)).with_sensor(&definition.id),
            ),
            _ => None,
        })
        .collect();
    if !skipped.is_empty() {
        let health = health.clone();
        runner.spawn("config-report", async move {
            for report in &skipped {
                if let Err(e) = health.publish_error(report).await {
                    tracing::warn!(error = %e, "Failed to publish error report");
                }
            }
        });
    }

    let sink = ZenohSink::new(runner.publisher(), health.clone());
    let scheduler = PollingScheduler::new(entries, sink).with_tick(bus.tick());
    runner.spawn_with_error("scheduler", scheduler.run(runner.shutdown_signal()));
    runner.spawn("health", publish_health(health, runner.shutdown_signal()));

    Ok(Some(serde_json::json!({
        "port": bus.port,
        "baud_rate": bus.baud_rate,
        "simulated": simulated,
        "sensors": sensor_ids,
    })))
}

async fn publish_health(health: Arc<BridgeHealth>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(HEALTH_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = health.publish_health().await {
                    tracing::warn!(error = %e, "Failed to publish health");
                }
            }
            _ = shutdown_requested(&mut shutdown) => break,
        }
    }
}
