//! Bus-wide state, built once at startup.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn};

use crate::arbiter::{BusArbiter, BusTiming};
use crate::cache::LastKnownValueCache;
use crate::error::ConfigError;
use crate::frame::DeviceAddress;
use crate::registry::{DeviceHandle, DeviceRegistry};
use crate::scheduler::PollEntry;
use crate::sensor::{Sensor, SensorDefinition};
use crate::transport::Transport;

/// The arbiter, device registry and value cache of one bus.
pub struct BusContext<T> {
    arbiter: Arc<BusArbiter<T>>,
    cache: Arc<LastKnownValueCache>,
    registry: DeviceRegistry<T>,
}

impl<T: Transport> BusContext<T> {
    pub fn new(transport: T, timing: BusTiming) -> Self {
        let arbiter = Arc::new(BusArbiter::new(transport, timing));
        let cache = Arc::new(LastKnownValueCache::new());
        let registry = DeviceRegistry::new(Arc::clone(&arbiter), Arc::clone(&cache));
        Self {
            arbiter,
            cache,
            registry,
        }
    }

    pub fn arbiter(&self) -> &Arc<BusArbiter<T>> {
        &self.arbiter
    }

    pub fn cache(&self) -> &Arc<LastKnownValueCache> {
        &self.cache
    }

    pub fn registry(&self) -> &DeviceRegistry<T> {
        &self.registry
    }

    /// A handle for `address` that is not added to the registry.
    pub fn detached_handle(&self, address: DeviceAddress) -> DeviceHandle<T> {
        DeviceHandle::new(address, Arc::clone(&self.arbiter), Arc::clone(&self.cache))
    }

    /// Validate `definition` and bind it to its device.
    pub fn build_sensor(&self, definition: &SensorDefinition) -> Result<Sensor<T>, ConfigError> {
        let kind = definition.validate()?;
        let address = DeviceAddress::new(definition.device_id)
            .map_err(|e| ConfigError::Invalid(format!("Sensor '{}': {}", definition.id, e)))?;
        let handle = match self.registry.get_device(address) {
            Ok(handle) => handle,
            Err(_) => self.registry.add_device(address),
        };
        Ok(Sensor::from_definition(definition, kind, handle))
    }

    /// Build poll entries in configuration order.
    ///
    /// Sensors of an unknown type are skipped with a warning. Any other
    /// problem, duplicate ids, or an empty result is an error.
    pub fn build_poll_entries(
        &self,
        definitions: &[SensorDefinition],
    ) -> Result<Vec<PollEntry<T>>, ConfigError> {
        if definitions.is_empty() {
            return Err(ConfigError::Invalid(
                "At least one sensor must be configured".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        let mut entries = Vec::with_capacity(definitions.len());

        for definition in definitions {
            if !seen.insert(definition.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "Duplicate sensor id '{}'",
                    definition.id
                )));
            }

            match self.build_sensor(definition) {
                Ok(sensor) => {
                    info!(
                        sensor = %definition.id,
                        kind = %sensor.kind(),
                        device = %sensor.address(),
                        interval_secs = definition.transmission.interval,
                        "Configured sensor"
                    );
                    entries.push(PollEntry::new(sensor, definition.interval()));
                }
                Err(ConfigError::UnknownSensorType(kind)) => {
                    warn!(sensor = %definition.id, kind = %kind, "Skipping sensor of unknown type");
                }
                Err(e) => return Err(e),
            }
        }

        if entries.is_empty() {
            return Err(ConfigError::Invalid(
                "No sensor with a supported type is configured".to_string(),
            ));
        }

        Ok(entries)
    }
}
