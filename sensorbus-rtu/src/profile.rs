//! Per-kind register maps and derived quantities.
//!
//! Each [`SensorKind`] maps to a static [`SensorProfile`]: the register blocks
//! to read and how to decode each. Derivations (radar tank geometry) are pure
//! functions over the decoded readings.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::decode::{AccumulatorQuantity, DecodeKind};
use crate::error::{ConfigError, DecodeError};

/// Decoded metric name to engineering value.
pub type Readings = BTreeMap<String, f64>;

/// Supported sensor kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    Radar,
    Ph,
    Turbidity,
    Flow,
}

impl SensorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SensorKind::Radar => "radar",
            SensorKind::Ph => "ph",
            SensorKind::Turbidity => "turbidity",
            SensorKind::Flow => "flow",
        }
    }

    pub fn profile(self) -> &'static SensorProfile {
        match self {
            SensorKind::Radar => &RADAR,
            SensorKind::Ph => &PH,
            SensorKind::Turbidity => &TURBIDITY,
            SensorKind::Flow => &FLOW,
        }
    }

    /// Holding register that stores the device's own bus address.
    pub fn address_register(self) -> u16 {
        match self {
            SensorKind::Radar => 0x2000,
            SensorKind::Ph | SensorKind::Turbidity => 0x0019,
            SensorKind::Flow => 0x0062,
        }
    }
}

impl FromStr for SensorKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "radar" => Ok(SensorKind::Radar),
            "ph" => Ok(SensorKind::Ph),
            "turbidity" => Ok(SensorKind::Turbidity),
            "flow" => Ok(SensorKind::Flow),
            _ => Err(ConfigError::UnknownSensorType(s.to_string())),
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registers that complete a scaled accumulator whose integer part is the
/// block's own register pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccumulatorLayout {
    pub fraction_register: Option<u16>,
    pub decimal_register: u16,
    pub unit_register: Option<u16>,
    pub quantity: AccumulatorQuantity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Scalar(DecodeKind),
    Accumulator(AccumulatorLayout),
}

/// One metric in a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterSpec {
    pub name: &'static str,
    pub register: u16,
    pub kind: ValueKind,
    /// Decimal places kept when publishing.
    pub precision: Option<u32>,
}

impl RegisterSpec {
    /// Registers in the primary block.
    pub fn count(&self) -> u16 {
        match self.kind {
            ValueKind::Scalar(kind) => kind.register_count(),
            ValueKind::Accumulator(_) => 2,
        }
    }

    pub fn round(&self, value: f64) -> f64 {
        match self.precision {
            Some(places) => round_to(value, places),
            None => value,
        }
    }
}

/// A register holding a known constant float, used to confirm the word order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sentinel {
    pub register: u16,
    pub expected: f32,
    #[serde(default = "default_tolerance")]
    pub tolerance: f32,
}

fn default_tolerance() -> f32 {
    0.01
}

impl Sentinel {
    pub fn check(&self, actual: f32) -> Result<(), DecodeError> {
        if (actual - self.expected).abs() <= self.tolerance {
            Ok(())
        } else {
            Err(DecodeError::SentinelValidationFailed {
                register: self.register,
                expected: self.expected,
                actual,
            })
        }
    }
}

/// Static description of a sensor kind.
#[derive(Debug, PartialEq)]
pub struct SensorProfile {
    pub kind: SensorKind,
    pub registers: &'static [RegisterSpec],
}

const fn scalar(name: &'static str, register: u16, kind: DecodeKind) -> RegisterSpec {
    RegisterSpec {
        name,
        register,
        kind: ValueKind::Scalar(kind),
        precision: None,
    }
}

const fn float(name: &'static str, register: u16, precision: u32) -> RegisterSpec {
    RegisterSpec {
        name,
        register,
        kind: ValueKind::Scalar(DecodeKind::Float32),
        precision: Some(precision),
    }
}

static RADAR: SensorProfile = SensorProfile {
    kind: SensorKind::Radar,
    registers: &[
        scalar("measured_air_distance", 0x0000, DecodeKind::UInt16),
        scalar("liquid_level", 0x0002, DecodeKind::UInt16),
    ],
};

static PH: SensorProfile = SensorProfile {
    kind: SensorKind::Ph,
    registers: &[
        scalar("ph_value", 0x0001, DecodeKind::Float32),
        scalar("temperature", 0x0003, DecodeKind::Float32),
    ],
};

static TURBIDITY: SensorProfile = SensorProfile {
    kind: SensorKind::Turbidity,
    registers: &[
        scalar("turbidity", 0x0001, DecodeKind::Float32),
        scalar("temperature", 0x0003, DecodeKind::Float32),
    ],
};

static FLOW: SensorProfile = SensorProfile {
    kind: SensorKind::Flow,
    registers: &[
        float("flow_rate", 0x0001, 3),
        float("energy_flow", 0x0003, 3),
        float("velocity", 0x0005, 3),
        RegisterSpec {
            name: "pos_flow_acc",
            register: 0x0009,
            kind: ValueKind::Accumulator(AccumulatorLayout {
                fraction_register: Some(0x000B),
                decimal_register: 0x0070,
                unit_register: Some(0x0071),
                quantity: AccumulatorQuantity::Flow,
            }),
            precision: Some(3),
        },
        RegisterSpec {
            name: "energy_acc",
            register: 0x0011,
            kind: ValueKind::Accumulator(AccumulatorLayout {
                fraction_register: Some(0x0013),
                decimal_register: 0x0072,
                unit_register: None,
                quantity: AccumulatorQuantity::Energy,
            }),
            precision: Some(3),
        },
        float("temp_supply", 0x0033, 2),
        float("temp_return", 0x0035, 2),
    ],
};

/// Tank geometry for radar level sensors, in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContainerGeometry {
    /// Distance from the sensor to the tank floor.
    pub air_distance_max_level_mm: f64,
    pub width_mm: f64,
    pub length_mm: f64,
    /// Level treated as 100% full.
    pub max_water_level_mm: f64,
    pub normal_water_level_mm: f64,
}

impl ContainerGeometry {
    pub fn water_level(&self, measured_air_distance: f64) -> f64 {
        (self.air_distance_max_level_mm - measured_air_distance).max(0.0)
    }

    /// Water volume in cubic metres.
    pub fn volume(&self, water_level: f64) -> f64 {
        (self.width_mm * self.length_mm * water_level / 1_000_000_000.0).max(0.0)
    }

    /// Fill level relative to `max_water_level_mm`. May exceed 100.
    pub fn fill_percentage(&self, water_level: f64) -> f64 {
        (water_level / self.max_water_level_mm * 100.0).max(0.0)
    }

    pub fn level_alarm(&self, water_level: f64) -> bool {
        water_level > self.max_water_level_mm
    }

    pub fn level_above_normal(&self, water_level: f64) -> f64 {
        water_level - self.normal_water_level_mm
    }
}

impl SensorProfile {
    /// Quantities computed from decoded readings.
    pub fn derive(&self, readings: &Readings, geometry: Option<&ContainerGeometry>) -> Readings {
        let mut derived = Readings::new();

        if self.kind != SensorKind::Radar {
            return derived;
        }
        if let (Some(geometry), Some(&distance)) = (geometry, readings.get("measured_air_distance")) {
            let level = geometry.water_level(distance);
            derived.insert("water_level".into(), level);
            derived.insert("volume".into(), round_to(geometry.volume(level), 3));
            derived.insert(
                "volume_percentage".into(),
                round_to(geometry.fill_percentage(level), 2),
            );
            derived.insert(
                "level_alarm".into(),
                if geometry.level_alarm(level) { 1.0 } else { 0.0 },
            );
            derived.insert("level_above_normal".into(), geometry.level_above_normal(level));
        }

        derived
    }
}

/// Round half away from zero to `places` decimals.
pub fn round_to(value: f64, places: u32) -> f64 {
    let factor = 10f64.powi(places as i32);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tank() -> ContainerGeometry {
        ContainerGeometry {
            air_distance_max_level_mm: 3000.0,
            width_mm: 2000.0,
            length_mm: 5000.0,
            max_water_level_mm: 2500.0,
            normal_water_level_mm: 1500.0,
        }
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!("radar".parse::<SensorKind>().unwrap(), SensorKind::Radar);
        assert_eq!("PH".parse::<SensorKind>().unwrap(), SensorKind::Ph);
        assert_eq!(
            "sonar".parse::<SensorKind>(),
            Err(ConfigError::UnknownSensorType("sonar".into()))
        );
    }

    #[test]
    fn test_profile_register_maps() {
        let radar = SensorKind::Radar.profile();
        assert_eq!(radar.registers.len(), 2);
        assert_eq!(radar.registers[1].register, 0x0002);
        assert_eq!(radar.registers[1].count(), 1);

        let flow = SensorKind::Flow.profile();
        assert_eq!(flow.registers.len(), 7);
        let acc = flow
            .registers
            .iter()
            .find(|spec| spec.name == "pos_flow_acc")
            .unwrap();
        assert_eq!(acc.count(), 2);
        assert!(matches!(acc.kind, ValueKind::Accumulator(layout) if layout.decimal_register == 0x0070));
    }

    #[test]
    fn test_address_registers() {
        assert_eq!(SensorKind::Radar.address_register(), 0x2000);
        assert_eq!(SensorKind::Ph.address_register(), 0x0019);
        assert_eq!(SensorKind::Flow.address_register(), 0x0062);
    }

    #[test]
    fn test_sentinel_tolerance() {
        let sentinel = Sentinel {
            register: 0x00F0,
            expected: 1234.0,
            tolerance: 0.01,
        };
        assert!(sentinel.check(1234.005).is_ok());
        assert!(matches!(
            sentinel.check(1234.5625),
            Err(DecodeError::SentinelValidationFailed {
                register: 0x00F0,
                ..
            })
        ));
    }

    #[test]
    fn test_radar_derivations() {
        let mut readings = Readings::new();
        readings.insert("measured_air_distance".into(), 1000.0);

        let derived = SensorKind::Radar.profile().derive(&readings, Some(&tank()));
        assert_eq!(derived["water_level"], 2000.0);
        assert_eq!(derived["volume"], 20.0);
        assert_eq!(derived["volume_percentage"], 80.0);
        assert_eq!(derived["level_alarm"], 0.0);
        assert_eq!(derived["level_above_normal"], 500.0);
    }

    #[test]
    fn test_radar_overflow_and_empty() {
        let geometry = tank();
        // Above max level: alarm and more than 100%.
        assert_eq!(geometry.water_level(200.0), 2800.0);
        assert!(geometry.level_alarm(2800.0));
        assert!((geometry.fill_percentage(2800.0) - 112.0).abs() < 1e-9);

        // Sensor further than the floor: level clamps to 0.
        assert_eq!(geometry.water_level(3500.0), 0.0);
        assert_eq!(geometry.level_above_normal(0.0), -1500.0);
    }

    #[test]
    fn test_derive_without_geometry_is_empty() {
        let mut readings = Readings::new();
        readings.insert("measured_air_distance".into(), 1000.0);
        assert!(SensorKind::Radar.profile().derive(&readings, None).is_empty());
        assert!(SensorKind::Ph.profile().derive(&readings, Some(&tank())).is_empty());
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(1.23456, 3), 1.235);
        assert_eq!(round_to(21.004, 2), 21.0);
    }
}
