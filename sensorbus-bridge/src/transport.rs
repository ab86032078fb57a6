//! Serial or simulated bus selection.

use std::io;

use sensorbus_rtu::decode::WordOrder;
use sensorbus_rtu::error::TransportError;
use sensorbus_rtu::frame::DeviceAddress;
use sensorbus_rtu::profile::SensorKind;
use sensorbus_rtu::sensor::SensorDefinition;
use sensorbus_rtu::sim::{SimulatedBus, SimulatedDevice};
use sensorbus_rtu::transport::{SerialTransport, Transport};
use tracing::{info, warn};

use crate::config::BusConfig;

/// The transport the bridge polls over.
pub enum BusTransport {
    Serial(SerialTransport),
    Simulated(SimulatedBus),
}

impl BusTransport {
    /// Open the configured serial port, or build a simulated bus holding one
    /// plausible device per sensor when `bus.simulate` is set.
    pub fn open(bus: &BusConfig, sensors: &[SensorDefinition]) -> Result<Self, TransportError> {
        if bus.simulate {
            let sim = simulated_bus(sensors);
            info!(devices = sensors.len(), "Using simulated bus");
            return Ok(BusTransport::Simulated(sim));
        }

        SerialTransport::open(&bus.serial_settings()).map(BusTransport::Serial)
    }

    pub fn is_simulated(&self) -> bool {
        matches!(self, BusTransport::Simulated(_))
    }
}

impl Transport for BusTransport {
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        match self {
            BusTransport::Serial(port) => port.write_all(data).await,
            BusTransport::Simulated(bus) => bus.write_all(data).await,
        }
    }

    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            BusTransport::Serial(port) => port.read(buf).await,
            BusTransport::Simulated(bus) => bus.read(buf).await,
        }
    }

    fn clear_input(&mut self) -> io::Result<()> {
        match self {
            BusTransport::Serial(port) => port.clear_input(),
            BusTransport::Simulated(bus) => bus.clear_input(),
        }
    }
}

/// A simulated bus answering for every valid sensor definition.
pub fn simulated_bus(sensors: &[SensorDefinition]) -> SimulatedBus {
    let bus = SimulatedBus::new();
    for definition in sensors {
        match simulated_device(definition) {
            Some(device) => bus.add_device(device),
            None => warn!(sensor = %definition.id, "No simulated device for sensor"),
        }
    }
    bus
}

/// Register contents resembling a healthy device of the definition's kind.
///
/// Returns `None` for definitions that do not validate.
pub fn simulated_device(definition: &SensorDefinition) -> Option<SimulatedDevice> {
    let kind = definition.validate().ok()?;
    let address = DeviceAddress::new(definition.device_id).ok()?;
    let order = definition.word_order;

    let device = SimulatedDevice::new(address).with_address_register(kind.address_register());
    let device = match kind {
        SensorKind::Radar => {
            let geometry = definition.container?;
            let level = geometry.max_water_level_mm * 0.6;
            let air = (geometry.air_distance_max_level_mm - level).max(0.0);
            device
                .with_register(0x0000, air.round() as u16)
                .with_register(0x0002, level.round() as u16)
        }
        SensorKind::Ph => device
            .with_f32(0x0001, 7.02, order)
            .with_f32(0x0003, 21.5, order),
        SensorKind::Turbidity => device
            .with_f32(0x0001, 3.4, order)
            .with_f32(0x0003, 19.8, order),
        SensorKind::Flow => flow_registers(device, order),
    };

    Some(match definition.sentinel {
        Some(sentinel) => device.with_f32(sentinel.register, sentinel.expected, order),
        None => device,
    })
}

fn flow_registers(device: SimulatedDevice, order: WordOrder) -> SimulatedDevice {
    device
        .with_f32(0x0001, 12.5, order)
        .with_f32(0x0003, 3.2, order)
        .with_f32(0x0005, 0.84, order)
        .with_i32(0x0009, 4821, order)
        .with_f32(0x000B, 0.375, order)
        .with_register(0x0070, 3)
        .with_register(0x0071, 0)
        .with_i32(0x0011, 912, order)
        .with_f32(0x0013, 0.5, order)
        .with_register(0x0072, 4)
        .with_f32(0x0033, 55.3, order)
        .with_f32(0x0035, 38.9, order)
}
