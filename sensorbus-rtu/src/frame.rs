//! Modbus RTU frame encoding and decoding.
//!
//! An RTU frame is `[address:1][function:1][payload:N][crc16:2]`. Every
//! multi-byte field in the payload is big-endian; the trailing CRC16/MODBUS
//! is transmitted low byte first.
//!
//! # Example
//!
//! ```
//! use sensorbus_rtu::frame::{build_read_request, crc16};
//!
//! let frame = build_read_request(1, 0x0000, 1).unwrap();
//! assert_eq!(frame, [0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0x84, 0x0A]);
//! assert_eq!(crc16(&frame[..6]), 0x0A84);
//! ```

use std::fmt;

use crc::{CRC_16_MODBUS, Crc};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

const CRC_MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Maximum registers in one read-holding-registers request.
pub const MAX_READ_REGISTERS: usize = 125;

/// Maximum registers in one write-multiple-registers request.
pub const MAX_WRITE_REGISTERS: usize = 123;

/// Length of an exception response: address, function | 0x80, code, crc.
pub const EXCEPTION_FRAME_LEN: usize = 5;

/// Length of a write-single / write-multiple echo response.
pub const WRITE_RESPONSE_LEN: usize = 8;

const MIN_RESPONSE_LEN: usize = EXCEPTION_FRAME_LEN;
const EXCEPTION_BIT: u8 = 0x80;

/// Compute the CRC16/MODBUS checksum (poly 0xA001 reflected, init 0xFFFF).
pub fn crc16(data: &[u8]) -> u16 {
    CRC_MODBUS.checksum(data)
}

/// Format bytes as space-separated hex for frame logging.
pub fn to_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// A logical device address on the bus (1-247).
///
/// Address 0 is the Modbus broadcast address and 248-255 are reserved, so
/// neither can be constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct DeviceAddress(u8);

impl DeviceAddress {
    /// Lowest assignable address.
    pub const MIN: u8 = 1;
    /// Highest assignable address.
    pub const MAX: u8 = 247;

    /// Validate a raw address.
    pub fn new(raw: u8) -> Result<Self, ProtocolError> {
        if (Self::MIN..=Self::MAX).contains(&raw) {
            Ok(Self(raw))
        } else {
            Err(ProtocolError::InvalidAddress(raw))
        }
    }

    /// The raw address byte.
    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for DeviceAddress {
    type Error = ProtocolError;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        Self::new(raw)
    }
}

impl From<DeviceAddress> for u8 {
    fn from(address: DeviceAddress) -> Self {
        address.0
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Supported Modbus function codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionCode {
    /// 0x03 Read Holding Registers
    ReadHoldingRegisters,
    /// 0x06 Write Single Register
    WriteSingleRegister,
    /// 0x10 Write Multiple Registers
    WriteMultipleRegisters,
}

impl FunctionCode {
    /// The wire value of this function code.
    pub fn as_u8(self) -> u8 {
        match self {
            FunctionCode::ReadHoldingRegisters => 0x03,
            FunctionCode::WriteSingleRegister => 0x06,
            FunctionCode::WriteMultipleRegisters => 0x10,
        }
    }

    /// Parse a wire value, if it is one of the supported codes.
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0x03 => Some(FunctionCode::ReadHoldingRegisters),
            0x06 => Some(FunctionCode::WriteSingleRegister),
            0x10 => Some(FunctionCode::WriteMultipleRegisters),
            _ => None,
        }
    }
}

/// Modbus exception codes carried by exception responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionCode {
    IllegalFunction,
    IllegalDataAddress,
    IllegalDataValue,
    SlaveDeviceFailure,
    Acknowledge,
    SlaveDeviceBusy,
    Unknown(u8),
}

impl From<u8> for ExceptionCode {
    fn from(code: u8) -> Self {
        match code {
            0x01 => ExceptionCode::IllegalFunction,
            0x02 => ExceptionCode::IllegalDataAddress,
            0x03 => ExceptionCode::IllegalDataValue,
            0x04 => ExceptionCode::SlaveDeviceFailure,
            0x05 => ExceptionCode::Acknowledge,
            0x06 => ExceptionCode::SlaveDeviceBusy,
            other => ExceptionCode::Unknown(other),
        }
    }
}

impl From<ExceptionCode> for u8 {
    fn from(code: ExceptionCode) -> Self {
        match code {
            ExceptionCode::IllegalFunction => 0x01,
            ExceptionCode::IllegalDataAddress => 0x02,
            ExceptionCode::IllegalDataValue => 0x03,
            ExceptionCode::SlaveDeviceFailure => 0x04,
            ExceptionCode::Acknowledge => 0x05,
            ExceptionCode::SlaveDeviceBusy => 0x06,
            ExceptionCode::Unknown(other) => other,
        }
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExceptionCode::IllegalFunction => write!(f, "illegal function (0x01)"),
            ExceptionCode::IllegalDataAddress => write!(f, "illegal data address (0x02)"),
            ExceptionCode::IllegalDataValue => write!(f, "illegal data value (0x03)"),
            ExceptionCode::SlaveDeviceFailure => write!(f, "slave device failure (0x04)"),
            ExceptionCode::Acknowledge => write!(f, "acknowledge (0x05)"),
            ExceptionCode::SlaveDeviceBusy => write!(f, "slave device busy (0x06)"),
            ExceptionCode::Unknown(code) => write!(f, "unknown exception (0x{:02X})", code),
        }
    }
}

/// Function-specific request payload.
#[derive(Debug, Clone, PartialEq, Eq)]
enum RequestBody {
    Read { count: u16 },
    WriteSingle { value: u16 },
    WriteMultiple { values: Vec<u16> },
}

/// A validated request frame. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFrame {
    address: DeviceAddress,
    register: u16,
    body: RequestBody,
}

impl RequestFrame {
    /// Read `count` holding registers starting at `register`.
    pub fn read_holding(
        address: DeviceAddress,
        register: u16,
        count: u16,
    ) -> Result<Self, ProtocolError> {
        if count == 0 || count as usize > MAX_READ_REGISTERS {
            return Err(ProtocolError::InvalidQuantity {
                count: count as usize,
                max: MAX_READ_REGISTERS,
            });
        }
        Ok(Self {
            address,
            register,
            body: RequestBody::Read { count },
        })
    }

    /// Write one register.
    pub fn write_single(address: DeviceAddress, register: u16, value: u16) -> Self {
        Self {
            address,
            register,
            body: RequestBody::WriteSingle { value },
        }
    }

    /// Write consecutive registers starting at `register`.
    pub fn write_multiple(
        address: DeviceAddress,
        register: u16,
        values: &[u16],
    ) -> Result<Self, ProtocolError> {
        if values.is_empty() || values.len() > MAX_WRITE_REGISTERS {
            return Err(ProtocolError::InvalidQuantity {
                count: values.len(),
                max: MAX_WRITE_REGISTERS,
            });
        }
        Ok(Self {
            address,
            register,
            body: RequestBody::WriteMultiple {
                values: values.to_vec(),
            },
        })
    }

    pub fn address(&self) -> DeviceAddress {
        self.address
    }

    pub fn register(&self) -> u16 {
        self.register
    }

    pub fn function(&self) -> FunctionCode {
        match self.body {
            RequestBody::Read { .. } => FunctionCode::ReadHoldingRegisters,
            RequestBody::WriteSingle { .. } => FunctionCode::WriteSingleRegister,
            RequestBody::WriteMultiple { .. } => FunctionCode::WriteMultipleRegisters,
        }
    }

    /// Number of registers addressed by this request.
    pub fn quantity(&self) -> u16 {
        match &self.body {
            RequestBody::Read { count } => *count,
            RequestBody::WriteSingle { .. } => 1,
            RequestBody::WriteMultiple { values } => values.len() as u16,
        }
    }

    /// Length in bytes of a well-formed, non-exception response.
    pub fn expected_response_len(&self) -> usize {
        match self.body {
            RequestBody::Read { count } => 5 + 2 * count as usize,
            RequestBody::WriteSingle { .. } | RequestBody::WriteMultiple { .. } => {
                WRITE_RESPONSE_LEN
            }
        }
    }

    /// Serialize to wire bytes, including the CRC trailer.
    pub fn encode(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(9 + 2 * self.quantity() as usize);
        frame.push(self.address.get());
        frame.push(self.function().as_u8());
        frame.extend_from_slice(&self.register.to_be_bytes());

        match &self.body {
            RequestBody::Read { count } => {
                frame.extend_from_slice(&count.to_be_bytes());
            }
            RequestBody::WriteSingle { value } => {
                frame.extend_from_slice(&value.to_be_bytes());
            }
            RequestBody::WriteMultiple { values } => {
                frame.extend_from_slice(&(values.len() as u16).to_be_bytes());
                frame.push((values.len() * 2) as u8);
                for value in values {
                    frame.extend_from_slice(&value.to_be_bytes());
                }
            }
        }

        let crc = crc16(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        frame
    }
}

/// Build a read-holding-registers (0x03) request frame.
pub fn build_read_request(address: u8, register: u16, count: u16) -> Result<Vec<u8>, ProtocolError> {
    Ok(RequestFrame::read_holding(DeviceAddress::new(address)?, register, count)?.encode())
}

/// Build a write-single-register (0x06) request frame.
pub fn build_write_single_request(
    address: u8,
    register: u16,
    value: u16,
) -> Result<Vec<u8>, ProtocolError> {
    Ok(RequestFrame::write_single(DeviceAddress::new(address)?, register, value).encode())
}

/// Build a write-multiple-registers (0x10) request frame.
pub fn build_write_multiple_request(
    address: u8,
    register: u16,
    values: &[u16],
) -> Result<Vec<u8>, ProtocolError> {
    Ok(RequestFrame::write_multiple(DeviceAddress::new(address)?, register, values)?.encode())
}

/// Function-specific response payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseBody {
    /// Register data from a read (big-endian bytes, two per register).
    Registers(Vec<u8>),
    /// Echo of a write-single request.
    WriteSingle { register: u16, value: u16 },
    /// Echo of a write-multiple request.
    WriteMultiple { register: u16, count: u16 },
}

/// A CRC-validated response frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    /// Address of the responding device.
    pub address: u8,
    pub function: FunctionCode,
    pub body: ResponseBody,
}

impl ResponseFrame {
    /// Raw register bytes of a read response (empty for write echoes).
    pub fn payload(&self) -> &[u8] {
        match &self.body {
            ResponseBody::Registers(data) => data,
            _ => &[],
        }
    }

    /// Register data as 16-bit words.
    pub fn registers(&self) -> Vec<u16> {
        bytes_to_words(self.payload())
    }
}

/// Convert big-endian register bytes to words. A trailing odd byte is dropped.
pub fn bytes_to_words(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect()
}

/// Convert register words to big-endian bytes.
pub fn words_to_bytes(words: &[u16]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_be_bytes()).collect()
}

fn check_crc(frame: &[u8]) -> Result<(), ProtocolError> {
    let split = frame.len() - 2;
    let received = u16::from_le_bytes([frame[split], frame[split + 1]]);
    let computed = crc16(&frame[..split]);
    if received != computed {
        return Err(ProtocolError::CrcMismatch { computed, received });
    }
    Ok(())
}

/// Length of a `function` response, from its byte count for reads.
fn frame_len(function: FunctionCode, bytes: &[u8]) -> usize {
    match function {
        FunctionCode::ReadHoldingRegisters => 5 + bytes[2] as usize,
        FunctionCode::WriteSingleRegister | FunctionCode::WriteMultipleRegisters => {
            WRITE_RESPONSE_LEN
        }
    }
}

/// Validate and parse a response frame.
///
/// The frame is cut to the length implied by its function code (and byte
/// count for reads); the CRC covers exactly that frame.
pub fn parse_response(bytes: &[u8], expected: FunctionCode) -> Result<ResponseFrame, ProtocolError> {
    if bytes.len() < MIN_RESPONSE_LEN {
        return Err(ProtocolError::TooShort {
            expected: MIN_RESPONSE_LEN,
            actual: bytes.len(),
        });
    }

    let address = bytes[0];
    let function = bytes[1];

    if function & EXCEPTION_BIT != 0 {
        check_crc(&bytes[..EXCEPTION_FRAME_LEN])?;
        return Err(ProtocolError::ExceptionResponse {
            function: function & !EXCEPTION_BIT,
            code: ExceptionCode::from(bytes[2]),
        });
    }

    if function != expected.as_u8() {
        // A corrupted function byte should read as corruption, not as a
        // different reply. The CRC covers the frame length of the function
        // actually received; a reply cut short by the expected length can
        // not be checked.
        let received_len = FunctionCode::from_u8(function)
            .map_or(bytes.len(), |received| frame_len(received, bytes));
        if received_len <= bytes.len() {
            check_crc(&bytes[..received_len])?;
        }
        return Err(ProtocolError::FunctionCodeMismatch {
            expected: expected.as_u8(),
            actual: function,
        });
    }

    let frame_len = frame_len(expected, bytes);
    if bytes.len() < frame_len {
        return Err(ProtocolError::TooShort {
            expected: frame_len,
            actual: bytes.len(),
        });
    }
    let frame = &bytes[..frame_len];
    check_crc(frame)?;

    let word_at = |i: usize| u16::from_be_bytes([frame[i], frame[i + 1]]);
    let body = match expected {
        FunctionCode::ReadHoldingRegisters => ResponseBody::Registers(frame[3..frame_len - 2].to_vec()),
        FunctionCode::WriteSingleRegister => ResponseBody::WriteSingle {
            register: word_at(2),
            value: word_at(4),
        },
        FunctionCode::WriteMultipleRegisters => ResponseBody::WriteMultiple {
            register: word_at(2),
            count: word_at(4),
        },
    };

    Ok(ResponseFrame {
        address,
        function: expected,
        body,
    })
}

/// Append a CRC trailer to a frame body. Used by simulated devices.
pub fn seal(mut body: Vec<u8>) -> Vec<u8> {
    let crc = crc16(&body);
    body.extend_from_slice(&crc.to_le_bytes());
    body
}
