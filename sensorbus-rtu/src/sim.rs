//! In-process simulated RS-485 bus.
//!
//! [`SimulatedBus`] implements [`Transport`] by answering requests from the
//! register maps of its [`SimulatedDevice`]s. Clones share state, so a test
//! can keep one clone to steer devices while the arbiter owns another. It
//! also records a timestamp for every write and completed response and flags
//! any request written while a previous response is still unread.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::trace;

use crate::decode::WordOrder;
use crate::frame::{DeviceAddress, ExceptionCode, crc16, seal};
use crate::transport::Transport;

/// A device answering on the simulated bus.
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    address: DeviceAddress,
    registers: HashMap<u16, u16>,
    address_register: Option<u16>,
    silent: bool,
    corrupt_crc: bool,
}

impl SimulatedDevice {
    pub fn new(address: DeviceAddress) -> Self {
        Self {
            address,
            registers: HashMap::new(),
            address_register: None,
            silent: false,
            corrupt_crc: false,
        }
    }

    pub fn with_register(mut self, register: u16, value: u16) -> Self {
        self.registers.insert(register, value);
        self
    }

    pub fn with_f32(self, register: u16, value: f32, order: WordOrder) -> Self {
        self.with_u32(register, value.to_bits(), order)
    }

    pub fn with_i32(self, register: u16, value: i32, order: WordOrder) -> Self {
        self.with_u32(register, value as u32, order)
    }

    fn with_u32(mut self, register: u16, bits: u32, order: WordOrder) -> Self {
        let high = (bits >> 16) as u16;
        let low = bits as u16;
        let (first, second) = match order {
            WordOrder::Swapped => (low, high),
            WordOrder::BigEndian => (high, low),
        };
        self.registers.insert(register, first);
        self.registers.insert(register.wrapping_add(1), second);
        self
    }

    /// Writing a valid address to `register` moves the device to it.
    pub fn with_address_register(mut self, register: u16) -> Self {
        self.address_register = Some(register);
        self.registers.insert(register, self.address.get() as u16);
        self
    }

    pub fn address(&self) -> DeviceAddress {
        self.address
    }

    pub fn register(&self, register: u16) -> Option<u16> {
        self.registers.get(&register).copied()
    }

    fn exception(&self, function: u8, code: ExceptionCode) -> Vec<u8> {
        seal(vec![self.address.get(), function | 0x80, code.into()])
    }

    /// Build the reply to a CRC-valid request addressed to this device.
    fn respond(&mut self, request: &[u8]) -> Vec<u8> {
        let function = request[1];
        let word = |i: usize| u16::from_be_bytes([request[i], request[i + 1]]);

        match function {
            0x03 if request.len() == 8 => {
                let start = word(2);
                let count = word(4);
                if count == 0 || count > 125 {
                    return self.exception(function, ExceptionCode::IllegalDataValue);
                }
                let mut body = vec![self.address.get(), function, (count * 2) as u8];
                for offset in 0..count {
                    match self.registers.get(&start.wrapping_add(offset)) {
                        Some(value) => body.extend_from_slice(&value.to_be_bytes()),
                        None => return self.exception(function, ExceptionCode::IllegalDataAddress),
                    }
                }
                seal(body)
            }
            0x06 if request.len() == 8 => {
                let register = word(2);
                let value = word(4);
                self.registers.insert(register, value);
                request.to_vec()
            }
            0x10 if request.len() >= 9 => {
                let start = word(2);
                let count = word(4);
                if count == 0 || count > 123 || request.len() != 9 + 2 * count as usize {
                    return self.exception(function, ExceptionCode::IllegalDataValue);
                }
                for offset in 0..count {
                    self.registers
                        .insert(start.wrapping_add(offset), word(7 + 2 * offset as usize));
                }
                seal(request[..6].to_vec())
            }
            _ => self.exception(function, ExceptionCode::IllegalFunction),
        }
    }

    /// New address requested through the address register, if any.
    fn pending_address(&self) -> Option<DeviceAddress> {
        let register = self.address_register?;
        let value = *self.registers.get(&register)?;
        let value = u8::try_from(value).ok()?;
        DeviceAddress::new(value)
            .ok()
            .filter(|addr| *addr != self.address)
    }
}

/// Timestamps of one transaction on the simulated bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionRecord {
    /// Addressed device (0 for broadcast).
    pub address: u8,
    pub written_at: Instant,
    /// When the last response byte was read.
    pub completed_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct BusInner {
    devices: BTreeMap<DeviceAddress, SimulatedDevice>,
    pending: Vec<u8>,
    in_flight: bool,
    overlaps: usize,
    transactions: Vec<TransactionRecord>,
}

/// Shared simulated bus. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct SimulatedBus {
    inner: Arc<Mutex<BusInner>>,
}

impl SimulatedBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a device, replacing any device at the same address.
    pub fn add_device(&self, device: SimulatedDevice) {
        self.inner.lock().devices.insert(device.address, device);
    }

    pub fn device(&self, address: DeviceAddress) -> Option<SimulatedDevice> {
        self.inner.lock().devices.get(&address).cloned()
    }

    /// Set a register on an attached device.
    pub fn set_register(&self, address: DeviceAddress, register: u16, value: u16) {
        if let Some(device) = self.inner.lock().devices.get_mut(&address) {
            device.registers.insert(register, value);
        }
    }

    /// Stop (or resume) answering requests.
    pub fn set_silent(&self, address: DeviceAddress, silent: bool) {
        if let Some(device) = self.inner.lock().devices.get_mut(&address) {
            device.silent = silent;
        }
    }

    /// Flip the CRC of every response from this device.
    pub fn set_corrupt_crc(&self, address: DeviceAddress, corrupt: bool) {
        if let Some(device) = self.inner.lock().devices.get_mut(&address) {
            device.corrupt_crc = corrupt;
        }
    }

    pub fn transactions(&self) -> Vec<TransactionRecord> {
        self.inner.lock().transactions.clone()
    }

    /// Requests written while an earlier response was still being read.
    pub fn overlaps(&self) -> usize {
        self.inner.lock().overlaps
    }
}

impl BusInner {
    fn handle_request(&mut self, request: &[u8]) {
        let now = Instant::now();
        let address = request.first().copied().unwrap_or(0);

        if self.in_flight {
            self.overlaps += 1;
        }
        self.transactions.push(TransactionRecord {
            address,
            written_at: now,
            completed_at: None,
        });

        if request.len() < 4 {
            return;
        }
        let split = request.len() - 2;
        let received = u16::from_le_bytes([request[split], request[split + 1]]);
        if crc16(&request[..split]) != received {
            trace!("Simulated bus dropped request with bad CRC");
            return;
        }
        let Ok(address) = DeviceAddress::new(address) else {
            return;
        };
        let Some(device) = self.devices.get_mut(&address) else {
            return;
        };
        if device.silent {
            return;
        }

        let mut response = device.respond(&request[..split + 2]);
        if device.corrupt_crc {
            let last = response.len() - 1;
            response[last] ^= 0xFF;
        }

        if let Some(new_address) = device.pending_address() {
            if let Some(mut moved) = self.devices.remove(&address) {
                moved.address = new_address;
                self.devices.insert(new_address, moved);
            }
        }

        self.pending = response;
        self.in_flight = true;
    }

    fn take(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);

        if self.pending.is_empty() && self.in_flight {
            self.in_flight = false;
            if let Some(record) = self.transactions.last_mut() {
                record.completed_at = Some(Instant::now());
            }
        }
        n
    }
}

impl Transport for SimulatedBus {
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.inner.lock().handle_request(data);
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.lock().take(buf);
        if n == 0 {
            // Nothing on the wire: wait for the caller's timeout.
            std::future::pending::<()>().await;
        }
        Ok(n)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.inner.lock().pending.clear();
        Ok(())
    }
}
