//! Change the bus address of a sensor.
//!
//! Checks the device answers at its current address, writes the new address to the
//! sensor's address register, waits for it to restart and confirms it
//! answers at the new address.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use sensorbus_bridge::config::ProvisionConfig;
use sensorbus_rtu::context::BusContext;
use sensorbus_rtu::frame::DeviceAddress;
use sensorbus_rtu::profile::SensorKind;
use sensorbus_rtu::provision::{AddressChange, DEFAULT_RESET_DELAY, change_address};
use sensorbus_rtu::transport::SerialTransport;

#[derive(Parser, Debug)]
#[command(name = "sensorbus-provision")]
#[command(about = "Changes the Modbus address of an RS-485 sensor")]
#[command(version)]
struct Args {
    /// Bridge configuration file to take bus settings from (JSON5 format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serial port, overriding the configuration
    #[arg(long)]
    port: Option<String>,

    /// Baud rate, overriding the configuration
    #[arg(long)]
    baud_rate: Option<u32>,

    /// Sensor type: radar, ph, turbidity or flow
    #[arg(long = "type")]
    kind: SensorKind,

    /// Current device address
    #[arg(long, value_parser = parse_address)]
    from: DeviceAddress,

    /// New device address
    #[arg(long, value_parser = parse_address)]
    to: DeviceAddress,

    /// Address register, overriding the sensor type's (decimal or 0x-prefixed hex)
    #[arg(long, value_parser = parse_register)]
    register: Option<u16>,

    /// Wait after the address write before checking the new address
    #[arg(long, default_value_t = DEFAULT_RESET_DELAY.as_millis() as u64)]
    reset_delay_ms: u64,

    /// Confirm the change; nothing is written without it
    #[arg(long)]
    yes: bool,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    fn address_change(&self) -> AddressChange {
        let change = AddressChange::for_kind(self.kind, self.from, self.to)
            .with_reset_delay(Duration::from_millis(self.reset_delay_ms));
        match self.register {
            Some(register) => change.with_address_register(register),
            None => change,
        }
    }
}

fn parse_address(s: &str) -> Result<DeviceAddress, String> {
    let raw: u8 = s.parse().map_err(|e| format!("{}", e))?;
    DeviceAddress::new(raw).map_err(|e| e.to_string())
}

fn parse_register(s: &str) -> Result<u16, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid register '{}': {}", s, e))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => sensorbus_common::load_config::<ProvisionConfig>(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => ProvisionConfig::default(),
    };
    if let Some(port) = &args.port {
        config.bus.port = port.clone();
    }
    if let Some(baud_rate) = args.baud_rate {
        config.bus.baud_rate = baud_rate;
    }
    config.bus.validate().map_err(|e| anyhow::anyhow!("{}", e))?;

    let logging = config.logging.with_level_override(args.log_level.as_deref());
    sensorbus_common::init_tracing(&logging)
        .map_err(|e| anyhow::anyhow!("Failed to init tracing: {}", e))?;

    let change = args.address_change();
    tracing::info!(
        port = %config.bus.port,
        kind = %args.kind,
        from = %change.current,
        to = %change.new,
        register = format_args!("0x{:04X}", change.address_register),
        "Address change requested"
    );

    if !args.yes {
        bail!(
            "Refusing to change {} sensor address {} -> {} on {} without --yes",
            args.kind,
            change.current,
            change.new,
            config.bus.port
        );
    }

    let transport = SerialTransport::open(&config.bus.serial_settings())
        .with_context(|| format!("Failed to open serial port {}", config.bus.port))?;
    let ctx = BusContext::new(transport, config.bus.timing());

    change_address(&ctx, &change)
        .await
        .with_context(|| format!("Address change {} -> {} failed", change.current, change.new))?;

    tracing::info!(device = %change.new, "Address change complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("sensorbus-provision").chain(args.iter().copied()))
    }

    #[test]
    fn test_parse_register() {
        assert_eq!(parse_register("0x2000"), Ok(0x2000));
        assert_eq!(parse_register("0X0019"), Ok(0x0019));
        assert_eq!(parse_register("98"), Ok(98));
        assert!(parse_register("0xZZ").is_err());
        assert!(parse_register("70000").is_err());
    }

    #[test]
    fn test_parse_address_range() {
        assert_eq!(parse_address("247").map(DeviceAddress::get), Ok(247));
        assert!(parse_address("0").is_err());
        assert!(parse_address("248").is_err());
        assert!(parse_address("x").is_err());
    }

    #[test]
    fn test_address_change_defaults_to_kind_register() {
        let args = parse(&["--type", "flow", "--from", "1", "--to", "7"]).unwrap();
        assert!(!args.yes);

        let change = args.address_change();
        assert_eq!(change.address_register, 0x0062);
        assert_eq!(change.current.get(), 1);
        assert_eq!(change.new.get(), 7);
        assert_eq!(change.reset_delay, DEFAULT_RESET_DELAY);
    }

    #[test]
    fn test_register_and_delay_override() {
        let args = parse(&[
            "--type",
            "radar",
            "--from",
            "1",
            "--to",
            "2",
            "--register",
            "0x0100",
            "--reset-delay-ms",
            "500",
            "--yes",
        ])
        .unwrap();
        assert!(args.yes);

        let change = args.address_change();
        assert_eq!(change.address_register, 0x0100);
        assert_eq!(change.reset_delay, Duration::from_millis(500));
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(parse(&["--type", "sonar", "--from", "1", "--to", "2"]).is_err());
    }
}
