//! Changing a device's bus address.
//!
//! Every step is a hard failure: a half-finished address change leaves the
//! device at an unknown address, so nothing here falls back to the cache.

use std::time::Duration;

use tokio::time::sleep;
use tracing::info;

use crate::context::BusContext;
use crate::error::{ConfigError, Result};
use crate::frame::DeviceAddress;
use crate::profile::SensorKind;
use crate::transport::Transport;

/// Default wait for a device to come back after an address write.
pub const DEFAULT_RESET_DELAY: Duration = Duration::from_secs(2);

/// One address change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressChange {
    pub current: DeviceAddress,
    pub new: DeviceAddress,
    /// Holding register that stores the device address.
    pub address_register: u16,
    /// Register read to confirm the device answers.
    pub check_register: u16,
    pub reset_delay: Duration,
}

impl AddressChange {
    /// Address and check registers for a known sensor kind.
    pub fn for_kind(kind: SensorKind, current: DeviceAddress, new: DeviceAddress) -> Self {
        let check_register = kind
            .profile()
            .registers
            .first()
            .map(|spec| spec.register)
            .unwrap_or(0);
        Self {
            current,
            new,
            address_register: kind.address_register(),
            check_register,
            reset_delay: DEFAULT_RESET_DELAY,
        }
    }

    pub fn with_address_register(mut self, register: u16) -> Self {
        self.address_register = register;
        self
    }

    pub fn with_reset_delay(mut self, delay: Duration) -> Self {
        self.reset_delay = delay;
        self
    }
}

/// Check the device answers, write its new address, wait, and confirm it answers
/// at the new address.
pub async fn change_address<T: Transport>(ctx: &BusContext<T>, change: &AddressChange) -> Result<()> {
    if change.current == change.new {
        return Err(ConfigError::Invalid(format!(
            "Device already uses address {}",
            change.new
        ))
        .into());
    }

    let old = ctx.detached_handle(change.current);
    old.read_registers_live(change.check_register, 1).await?;
    info!(device = %change.current, "Device answered at current address");

    old.write_single(change.address_register, change.new.get() as u16)
        .await?;
    info!(
        from = %change.current,
        to = %change.new,
        register = change.address_register,
        "Address written"
    );

    sleep(change.reset_delay).await;

    let new = ctx.detached_handle(change.new);
    new.read_registers_live(change.check_register, 1).await?;

    ctx.registry().remove_device(change.current);
    ctx.cache().purge_device(change.current);
    info!(device = %change.new, "Device answered at new address");

    Ok(())
}
