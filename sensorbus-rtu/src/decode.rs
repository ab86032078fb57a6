//! Register payload decoding.
//!
//! Devices on this bus transmit 32-bit quantities low register first, so the
//! default [`WordOrder::Swapped`] exchanges the two 16-bit words before the
//! bytes are read as a big-endian value. Registers `[0x4000, 0x449A]` decode
//! to `1234.0f32`.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::DecodeError;
use crate::frame::words_to_bytes;

/// Order of the two registers that make up a 32-bit value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WordOrder {
    /// Low-order register first on the wire.
    #[default]
    Swapped,
    /// High-order register first (plain big-endian).
    BigEndian,
}

impl WordOrder {
    /// Arrange four payload bytes into big-endian order.
    fn arrange(self, bytes: [u8; 4]) -> [u8; 4] {
        match self {
            WordOrder::Swapped => [bytes[2], bytes[3], bytes[0], bytes[1]],
            WordOrder::BigEndian => bytes,
        }
    }
}

fn exact<const N: usize>(bytes: &[u8]) -> Result<[u8; N], DecodeError> {
    bytes.try_into().map_err(|_| DecodeError::FormatMismatch {
        expected: N,
        actual: bytes.len(),
    })
}

/// Decode one register as an unsigned big-endian integer.
pub fn decode_u16(bytes: &[u8]) -> Result<u16, DecodeError> {
    Ok(u16::from_be_bytes(exact::<2>(bytes)?))
}

/// Decode two word-swapped registers as an IEEE-754 float.
pub fn decode_f32(bytes: &[u8]) -> Result<f32, DecodeError> {
    decode_f32_ordered(bytes, WordOrder::Swapped)
}

/// Decode two word-swapped registers as a signed integer.
pub fn decode_i32(bytes: &[u8]) -> Result<i32, DecodeError> {
    decode_i32_ordered(bytes, WordOrder::Swapped)
}

pub fn decode_f32_ordered(bytes: &[u8], order: WordOrder) -> Result<f32, DecodeError> {
    Ok(f32::from_be_bytes(order.arrange(exact::<4>(bytes)?)))
}

pub fn decode_i32_ordered(bytes: &[u8], order: WordOrder) -> Result<i32, DecodeError> {
    Ok(i32::from_be_bytes(order.arrange(exact::<4>(bytes)?)))
}

/// Volume units reported by flow meters in their unit register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeUnit {
    CubicMeters,
    Liters,
    Gallons,
    CubicFeet,
}

impl VolumeUnit {
    /// Map a unit register value. Unrecognized codes read as cubic meters.
    pub fn from_code(code: u16) -> Self {
        match code {
            0 => VolumeUnit::CubicMeters,
            1 => VolumeUnit::Liters,
            2 => VolumeUnit::Gallons,
            3 => VolumeUnit::CubicFeet,
            other => {
                debug!(code = other, "Unknown volume unit code, assuming m3");
                VolumeUnit::CubicMeters
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            VolumeUnit::CubicMeters => "m3",
            VolumeUnit::Liters => "L",
            VolumeUnit::Gallons => "GAL",
            VolumeUnit::CubicFeet => "CF",
        }
    }
}

impl fmt::Display for VolumeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an accumulator totals. Determines the exponent baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccumulatorQuantity {
    /// Volume total, baseline exponent 3.
    Flow,
    /// Energy total, baseline exponent 4.
    Energy,
}

impl AccumulatorQuantity {
    pub fn baseline(self) -> i32 {
        match self {
            AccumulatorQuantity::Flow => 3,
            AccumulatorQuantity::Energy => 4,
        }
    }
}

/// A vendor fixed-point total split over integer, fraction, exponent and unit
/// registers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaledAccumulator {
    pub integer_part: i32,
    pub fractional_part: f32,
    pub decimal_exponent: i16,
    pub unit_code: u16,
    pub quantity: AccumulatorQuantity,
}

impl ScaledAccumulator {
    /// `(integer + fraction) * 10^(exponent - baseline)`
    pub fn value(&self) -> f64 {
        let mantissa = self.integer_part as f64 + self.fractional_part as f64;
        mantissa * 10f64.powi(self.decimal_exponent as i32 - self.quantity.baseline())
    }

    /// Unit label for this total.
    pub fn unit(&self) -> &'static str {
        match self.quantity {
            AccumulatorQuantity::Flow => VolumeUnit::from_code(self.unit_code).as_str(),
            AccumulatorQuantity::Energy => "kWh",
        }
    }
}

/// Assemble a scaled accumulator from its raw register blocks.
///
/// `integer` is two registers (combined with `order`), `fraction` an optional
/// two-register float, `decimal_point` and `unit` single registers. A missing
/// fraction reads as zero, a missing unit register as code 0.
pub fn decode_scaled_accumulator(
    integer: &[u8],
    fraction: Option<&[u8]>,
    decimal_point: &[u8],
    unit: Option<&[u8]>,
    quantity: AccumulatorQuantity,
    order: WordOrder,
) -> Result<ScaledAccumulator, DecodeError> {
    let integer_part = decode_i32_ordered(integer, order)?;
    let fractional_part = match fraction {
        Some(bytes) => decode_f32_ordered(bytes, order)?,
        None => 0.0,
    };
    let decimal_exponent = decode_u16(decimal_point)? as i16;
    let unit_code = match unit {
        Some(bytes) => decode_u16(bytes)?,
        None => 0,
    };

    Ok(ScaledAccumulator {
        integer_part,
        fractional_part,
        decimal_exponent,
        unit_code,
        quantity,
    })
}

/// How a register block is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeKind {
    UInt16,
    Int32,
    Float32,
}

impl DecodeKind {
    /// Registers occupied by one value of this kind.
    pub fn register_count(self) -> u16 {
        match self {
            DecodeKind::UInt16 => 1,
            DecodeKind::Int32 | DecodeKind::Float32 => 2,
        }
    }
}

/// A typed register value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DecodedValue {
    UInt16(u16),
    Int32(i32),
    Float32(f32),
    ScaledAccumulator(ScaledAccumulator),
}

impl DecodedValue {
    /// Numeric value as `f64`, for telemetry.
    pub fn as_f64(&self) -> f64 {
        match self {
            DecodedValue::UInt16(v) => *v as f64,
            DecodedValue::Int32(v) => *v as f64,
            DecodedValue::Float32(v) => *v as f64,
            DecodedValue::ScaledAccumulator(acc) => acc.value(),
        }
    }
}

/// Decode register words as `kind`.
pub fn decode_words(
    words: &[u16],
    kind: DecodeKind,
    order: WordOrder,
) -> Result<DecodedValue, DecodeError> {
    let bytes = words_to_bytes(words);
    Ok(match kind {
        DecodeKind::UInt16 => DecodedValue::UInt16(decode_u16(&bytes)?),
        DecodeKind::Int32 => DecodedValue::Int32(decode_i32_ordered(&bytes, order)?),
        DecodeKind::Float32 => DecodedValue::Float32(decode_f32_ordered(&bytes, order)?),
    })
}
