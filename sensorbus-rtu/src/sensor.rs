//! Configured sensors and their read cycle.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::decode::{DecodeKind, WordOrder, decode_f32_ordered, decode_scaled_accumulator};
use crate::error::{ConfigError, Error, Result};
use crate::frame::{DeviceAddress, words_to_bytes};
use crate::profile::{
    AccumulatorLayout, ContainerGeometry, Readings, RegisterSpec, SensorKind, SensorProfile,
    Sentinel, ValueKind,
};
use crate::registry::{DeviceHandle, Sample, SampleSource};
use crate::transport::Transport;

/// One entry of the sensor list, as configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorDefinition {
    /// Unique sensor id (used in telemetry keys)
    pub id: String,

    /// Sensor type: "radar", "ph", "turbidity" or "flow"
    #[serde(rename = "type")]
    pub kind: String,

    /// Modbus device address (1-247)
    pub device_id: u8,

    /// Human readable name
    #[serde(default)]
    pub name: Option<String>,

    /// Installation location
    #[serde(default)]
    pub location: Option<String>,

    /// Poll interval and output formats
    #[serde(default)]
    pub transmission: Transmission,

    /// Register order of 32-bit values (default: "swapped")
    #[serde(default)]
    pub word_order: WordOrder,

    /// Register read before each cycle to confirm the word order (default: none)
    #[serde(default)]
    pub sentinel: Option<Sentinel>,

    /// Tank geometry (required for radar sensors)
    #[serde(default)]
    pub container: Option<ContainerGeometry>,
}

/// Poll interval and output formats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transmission {
    /// Seconds between reads (default: 15)
    #[serde(default = "default_interval")]
    pub interval: u64,

    /// Output formats requested by the sink
    #[serde(default)]
    pub formats: Vec<String>,
}

fn default_interval() -> u64 {
    15
}

impl Default for Transmission {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            formats: Vec::new(),
        }
    }
}

impl SensorDefinition {
    /// Resolve and check the definition.
    ///
    /// Fails with `UnknownSensorType` for an unsupported `type`, which
    /// callers may choose to skip; every other failure is a hard
    /// configuration error.
    pub fn validate(&self) -> std::result::Result<SensorKind, ConfigError> {
        let kind: SensorKind = self.kind.parse()?;

        if self.id.trim().is_empty() {
            return Err(ConfigError::Invalid("Sensor id cannot be empty".to_string()));
        }
        DeviceAddress::new(self.device_id).map_err(|_| {
            ConfigError::Invalid(format!(
                "Sensor '{}': device_id {} must be 1-247",
                self.id, self.device_id
            ))
        })?;
        if self.transmission.interval == 0 {
            return Err(ConfigError::Invalid(format!(
                "Sensor '{}': transmission.interval must be at least 1 second",
                self.id
            )));
        }
        if kind == SensorKind::Radar && self.container.is_none() {
            return Err(ConfigError::MissingField {
                sensor: self.id.clone(),
                field: "container".to_string(),
            });
        }
        if let Some(geometry) = &self.container {
            if geometry.max_water_level_mm <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "Sensor '{}': container.max_water_level_mm must be positive",
                    self.id
                )));
            }
        }

        Ok(kind)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.transmission.interval)
    }
}

/// Link status within one read cycle.
#[derive(Default)]
struct LinkState {
    down: bool,
    /// Failures hidden by cache hits, reported with the cycle's errors.
    masked: Vec<Error>,
}

/// The outcome of one read cycle.
#[derive(Debug, Default)]
pub struct SensorReading {
    /// Metric values, live or cached, plus derived quantities.
    pub values: Readings,
    /// Metrics served from the cache.
    pub cached: Vec<String>,
    /// Failures met during the cycle.
    pub errors: Vec<Error>,
}

impl SensorReading {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// A sensor bound to its device on the bus.
pub struct Sensor<T> {
    id: String,
    kind: SensorKind,
    name: Option<String>,
    location: Option<String>,
    handle: DeviceHandle<T>,
    geometry: Option<ContainerGeometry>,
    word_order: WordOrder,
    sentinel: Option<Sentinel>,
}

impl<T: Transport> Sensor<T> {
    pub fn new(id: impl Into<String>, kind: SensorKind, handle: DeviceHandle<T>) -> Self {
        Self {
            id: id.into(),
            kind,
            name: None,
            location: None,
            handle,
            geometry: None,
            word_order: WordOrder::default(),
            sentinel: None,
        }
    }

    /// Bind a validated definition to `handle`.
    pub fn from_definition(
        definition: &SensorDefinition,
        kind: SensorKind,
        handle: DeviceHandle<T>,
    ) -> Self {
        Self {
            id: definition.id.clone(),
            kind,
            name: definition.name.clone(),
            location: definition.location.clone(),
            handle,
            geometry: definition.container,
            word_order: definition.word_order,
            sentinel: definition.sentinel,
        }
    }

    pub fn with_geometry(mut self, geometry: ContainerGeometry) -> Self {
        self.geometry = Some(geometry);
        self
    }

    pub fn with_word_order(mut self, order: WordOrder) -> Self {
        self.word_order = order;
        self
    }

    pub fn with_sentinel(mut self, sentinel: Option<Sentinel>) -> Self {
        self.sentinel = sentinel;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> SensorKind {
        self.kind
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    pub fn address(&self) -> DeviceAddress {
        self.handle.address()
    }

    pub fn profile(&self) -> &'static SensorProfile {
        self.kind.profile()
    }

    /// Run one read cycle.
    ///
    /// The sentinel, when configured, is read live first. A wrong sentinel
    /// value rejects the whole cycle; an exception reply to it is reported
    /// and the cycle goes on unverified. If the link fails on the sentinel or
    /// on any later block, the remaining blocks are served from the cache
    /// without touching the bus again. A block the device rejects with an
    /// exception falls back to the cache on its own.
    pub async fn read(&self) -> SensorReading {
        let mut reading = SensorReading::default();
        let mut link = LinkState::default();

        if let Some(sentinel) = self.sentinel {
            match self.check_sentinel(&sentinel).await {
                Ok(()) => {}
                Err(e) if e.is_link_failure() => {
                    warn!(sensor = %self.id, device = %self.address(), error = %e, "Sentinel read failed");
                    reading.errors.push(e);
                    link.down = true;
                }
                Err(e) if e.is_exception() => {
                    warn!(sensor = %self.id, device = %self.address(), error = %e, "Sentinel register rejected, word order unverified");
                    reading.errors.push(e);
                }
                Err(e) => {
                    warn!(sensor = %self.id, device = %self.address(), error = %e, "Rejecting read cycle");
                    reading.errors.push(e);
                    return reading;
                }
            }
        }

        for spec in self.profile().registers {
            match self.read_metric(spec, &mut link).await {
                Ok((value, cached)) => {
                    reading.values.insert(spec.name.to_string(), spec.round(value));
                    if cached {
                        reading.cached.push(spec.name.to_string());
                    }
                }
                Err(e) => {
                    warn!(
                        sensor = %self.id,
                        device = %self.address(),
                        metric = spec.name,
                        error = %e,
                        "Failed to read metric"
                    );
                    reading.errors.push(e);
                }
            }
        }

        let mut errors = std::mem::take(&mut link.masked);
        errors.append(&mut reading.errors);
        reading.errors = errors;

        let derived = self
            .profile()
            .derive(&reading.values, self.geometry.as_ref());
        reading.values.extend(derived);

        reading
    }

    async fn check_sentinel(&self, sentinel: &Sentinel) -> Result<()> {
        let words = self.handle.read_registers_live(sentinel.register, 2).await?;
        let value = decode_f32_ordered(&words_to_bytes(&words), self.word_order)?;
        sentinel.check(value)?;
        debug!(sensor = %self.id, value, "Sentinel verified");
        Ok(())
    }

    /// Fetch a block, live unless the link already failed this cycle.
    async fn fetch(&self, register: u16, count: u16, link: &mut LinkState) -> Result<Sample> {
        if !link.down {
            match self.handle.read_registers_live(register, count).await {
                Ok(words) => {
                    return Ok(Sample {
                        words,
                        source: SampleSource::Live,
                    });
                }
                Err(e) if e.allows_fallback() => {
                    if e.is_link_failure() {
                        link.down = true;
                    }
                    return match self.handle.cached(register, count) {
                        Some(sample) => {
                            link.masked.push(e);
                            Ok(sample)
                        }
                        None => Err(e),
                    };
                }
                Err(e) => return Err(e),
            }
        }

        self.handle.cached(register, count).ok_or(Error::Unavailable {
            device: self.address(),
            register,
        })
    }

    async fn read_metric(&self, spec: &RegisterSpec, link: &mut LinkState) -> Result<(f64, bool)> {
        match spec.kind {
            ValueKind::Scalar(kind) => {
                let sample = self.fetch(spec.register, kind.register_count(), link).await?;
                let value = sample.decode(kind, self.word_order)?.as_f64();
                Ok((value, sample.is_cached()))
            }
            ValueKind::Accumulator(layout) => self.read_accumulator(spec.register, &layout, link).await,
        }
    }

    async fn read_accumulator(
        &self,
        register: u16,
        layout: &AccumulatorLayout,
        link: &mut LinkState,
    ) -> Result<(f64, bool)> {
        let integer = self.fetch(register, 2, link).await?;
        let fraction = match layout.fraction_register {
            Some(r) => Some(self.fetch(r, 2, link).await?),
            None => None,
        };
        let decimal = self
            .fetch(layout.decimal_register, DecodeKind::UInt16.register_count(), link)
            .await?;
        let unit = match layout.unit_register {
            Some(r) => Some(self.fetch(r, 1, link).await?),
            None => None,
        };

        let cached = integer.is_cached()
            || decimal.is_cached()
            || fraction.as_ref().is_some_and(Sample::is_cached)
            || unit.as_ref().is_some_and(Sample::is_cached);

        let fraction_bytes = fraction.map(|s| words_to_bytes(&s.words));
        let unit_bytes = unit.map(|s| words_to_bytes(&s.words));
        let accumulator = decode_scaled_accumulator(
            &words_to_bytes(&integer.words),
            fraction_bytes.as_deref(),
            &words_to_bytes(&decimal.words),
            unit_bytes.as_deref(),
            layout.quantity,
            self.word_order,
        )?;

        debug!(
            sensor = %self.id,
            register,
            unit = accumulator.unit(),
            "Decoded accumulator"
        );
        Ok((accumulator.value(), cached))
    }
}
