//! Logical devices sharing the bus.
//!
//! A [`DeviceHandle`] binds a device address to the bus arbiter and the
//! value cache. Reads fall back to the last known value when the link fails;
//! writes never do.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::arbiter::BusArbiter;
use crate::cache::LastKnownValueCache;
use crate::decode::{DecodeKind, DecodedValue, WordOrder, decode_words};
use crate::error::{Error, ProtocolError, Result};
use crate::frame::{DeviceAddress, RequestFrame, ResponseBody, ResponseFrame, parse_response};
use crate::transport::Transport;

/// Where a sample came from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleSource {
    Live,
    /// Served from the cache after a failed read.
    Cached { age: Duration },
}

/// Register words read from a device.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub words: Vec<u16>,
    pub source: SampleSource,
}

impl Sample {
    pub fn is_cached(&self) -> bool {
        matches!(self.source, SampleSource::Cached { .. })
    }

    pub fn decode(&self, kind: DecodeKind, order: WordOrder) -> Result<DecodedValue> {
        Ok(decode_words(&self.words, kind, order)?)
    }
}

/// Read/write access to one device on the bus.
pub struct DeviceHandle<T> {
    address: DeviceAddress,
    arbiter: Arc<BusArbiter<T>>,
    cache: Arc<LastKnownValueCache>,
}

impl<T> Clone for DeviceHandle<T> {
    fn clone(&self) -> Self {
        Self {
            address: self.address,
            arbiter: Arc::clone(&self.arbiter),
            cache: Arc::clone(&self.cache),
        }
    }
}

impl<T: Transport> DeviceHandle<T> {
    /// A handle that is not tracked by any registry. Used for provisioning,
    /// where the device address is about to change.
    pub fn new(
        address: DeviceAddress,
        arbiter: Arc<BusArbiter<T>>,
        cache: Arc<LastKnownValueCache>,
    ) -> Self {
        Self {
            address,
            arbiter,
            cache,
        }
    }

    pub fn address(&self) -> DeviceAddress {
        self.address
    }

    async fn execute(&self, request: RequestFrame) -> Result<ResponseFrame> {
        let raw = self
            .arbiter
            .transact(&request.encode(), request.expected_response_len())
            .await?;
        let response = parse_response(&raw, request.function())?;

        if response.address != self.address.get() {
            return Err(ProtocolError::AddressMismatch {
                expected: self.address.get(),
                actual: response.address,
            }
            .into());
        }
        Ok(response)
    }

    /// Read `count` holding registers straight from the device.
    ///
    /// Success refreshes the cache entry for `register`.
    pub async fn read_registers_live(&self, register: u16, count: u16) -> Result<Vec<u16>> {
        let request = RequestFrame::read_holding(self.address, register, count)?;
        let response = self.execute(request).await?;

        let payload = response.payload();
        if payload.len() != 2 * count as usize {
            return Err(ProtocolError::TooShort {
                expected: 2 * count as usize,
                actual: payload.len(),
            }
            .into());
        }

        let words = response.registers();
        self.cache.put(self.address, register, words.clone());
        Ok(words)
    }

    /// The last known words for a block, if the cache holds exactly `count`.
    pub fn cached(&self, register: u16, count: u16) -> Option<Sample> {
        self.cache
            .get(self.address, register)
            .filter(|entry| entry.words.len() == count as usize)
            .map(|entry| Sample {
                source: SampleSource::Cached { age: entry.age() },
                words: entry.words,
            })
    }

    /// Read `count` registers, substituting the cached words if the link
    /// fails or the device rejects the block and a matching entry exists.
    pub async fn read_registers(&self, register: u16, count: u16) -> Result<Sample> {
        match self.read_registers_live(register, count).await {
            Ok(words) => Ok(Sample {
                words,
                source: SampleSource::Live,
            }),
            Err(e) if e.allows_fallback() => match self.cached(register, count) {
                Some(sample) => {
                    debug!(
                        device = %self.address,
                        register,
                        error = %e,
                        "Read failed, using last known value"
                    );
                    Ok(sample)
                }
                None => Err(e),
            },
            Err(e) => Err(e),
        }
    }

    /// Read and decode one value, with cache fallback.
    pub async fn read_value(
        &self,
        register: u16,
        kind: DecodeKind,
        order: WordOrder,
    ) -> Result<DecodedValue> {
        self.read_registers(register, kind.register_count())
            .await?
            .decode(kind, order)
    }

    /// Write one register. Failures are always returned to the caller.
    pub async fn write_single(&self, register: u16, value: u16) -> Result<()> {
        let request = RequestFrame::write_single(self.address, register, value);
        let response = self.execute(request).await?;

        match response.body {
            ResponseBody::WriteSingle {
                register: r,
                value: v,
            } if r == register && v == value => Ok(()),
            _ => Err(ProtocolError::EchoMismatch { register }.into()),
        }
    }

    /// Write consecutive registers. Failures are always returned to the caller.
    pub async fn write_multiple(&self, register: u16, values: &[u16]) -> Result<()> {
        let request = RequestFrame::write_multiple(self.address, register, values)?;
        let count = request.quantity();
        let response = self.execute(request).await?;

        match response.body {
            ResponseBody::WriteMultiple {
                register: r,
                count: c,
            } if r == register && c == count => Ok(()),
            _ => Err(ProtocolError::EchoMismatch { register }.into()),
        }
    }
}

/// The set of logical devices on one bus.
pub struct DeviceRegistry<T> {
    arbiter: Arc<BusArbiter<T>>,
    cache: Arc<LastKnownValueCache>,
    devices: RwLock<BTreeMap<DeviceAddress, DeviceHandle<T>>>,
}

impl<T: Transport> DeviceRegistry<T> {
    pub fn new(arbiter: Arc<BusArbiter<T>>, cache: Arc<LastKnownValueCache>) -> Self {
        Self {
            arbiter,
            cache,
            devices: RwLock::new(BTreeMap::new()),
        }
    }

    /// Register `address`, replacing any existing handle for it.
    pub fn add_device(&self, address: DeviceAddress) -> DeviceHandle<T> {
        let handle = DeviceHandle::new(address, Arc::clone(&self.arbiter), Arc::clone(&self.cache));
        if self.devices.write().insert(address, handle.clone()).is_none() {
            info!(device = %address, "Registered device");
        }
        handle
    }

    /// Deregister `address` and purge its cached values.
    pub fn remove_device(&self, address: DeviceAddress) -> bool {
        let removed = self.devices.write().remove(&address).is_some();
        if removed {
            let purged = self.cache.purge_device(address);
            info!(device = %address, purged, "Removed device");
        }
        removed
    }

    pub fn get_device(&self, address: DeviceAddress) -> Result<DeviceHandle<T>> {
        self.devices
            .read()
            .get(&address)
            .cloned()
            .ok_or(Error::DeviceNotFound(address))
    }

    /// Registered addresses, ascending.
    pub fn addresses(&self) -> Vec<DeviceAddress> {
        self.devices.read().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }
}
