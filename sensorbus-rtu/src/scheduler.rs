//! Per-sensor polling on a fixed tick.
//!
//! Every tick the scheduler walks its entries in configuration order and
//! reads each one whose interval has elapsed. Reads go through the shared
//! bus arbiter, so at most one entry is ever in [`PollState::Reading`].

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::error::SinkError;
use crate::sensor::{Sensor, SensorReading};
use crate::sink::{Attributes, AttributeValue, PollFailure, PollOutcome, TelemetrySink};
use crate::transport::Transport;

/// Default scheduling tick.
pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// Lifecycle of a poll entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Due,
    Reading,
    Success,
    Failed,
    /// Terminal, after shutdown.
    Stopped,
}

/// A sensor with its polling schedule.
pub struct PollEntry<T> {
    sensor: Sensor<T>,
    interval: Duration,
    last_read: Option<Instant>,
    state: PollState,
}

impl<T: Transport> PollEntry<T> {
    pub fn new(sensor: Sensor<T>, interval: Duration) -> Self {
        Self {
            sensor,
            interval,
            last_read: None,
            state: PollState::Idle,
        }
    }

    pub fn sensor(&self) -> &Sensor<T> {
        &self.sensor
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    pub fn last_read(&self) -> Option<Instant> {
        self.last_read
    }

    /// Never-read entries are due immediately.
    pub fn is_due(&self, now: Instant) -> bool {
        match self.last_read {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        }
    }

    fn attributes(&self) -> Attributes {
        let sensor = &self.sensor;
        let mut attributes = Attributes::new();
        attributes.insert("type".into(), sensor.kind().as_str().into());
        attributes.insert(
            "device_id".into(),
            AttributeValue::Number(sensor.address().get() as f64),
        );
        attributes.insert(
            "interval_secs".into(),
            AttributeValue::Number(self.interval.as_secs_f64()),
        );
        if let Some(name) = sensor.name() {
            attributes.insert("name".into(), name.into());
        }
        if let Some(location) = sensor.location() {
            attributes.insert("location".into(), location.into());
        }
        attributes
    }
}

/// Drives all poll entries against one sink.
pub struct PollingScheduler<T, S> {
    entries: Vec<PollEntry<T>>,
    sink: S,
    tick: Duration,
}

impl<T: Transport, S: TelemetrySink> PollingScheduler<T, S> {
    pub fn new(entries: Vec<PollEntry<T>>, sink: S) -> Self {
        Self {
            entries,
            sink,
            tick: DEFAULT_TICK,
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn entries(&self) -> &[PollEntry<T>] {
        &self.entries
    }

    /// Poll until `shutdown` turns true (or its sender is dropped).
    ///
    /// A read in progress is abandoned on shutdown. The sink is connected
    /// before the first tick and disconnected after the last.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), SinkError> {
        self.sink.connect().await?;

        for entry in &self.entries {
            if let Err(e) = self
                .sink
                .send_attributes(entry.sensor.id(), &entry.attributes())
                .await
            {
                warn!(sensor = %entry.sensor.id(), error = %e, "Failed to send attributes");
            }
        }

        info!(sensors = self.entries.len(), tick = ?self.tick, "Polling started");

        let mut ticker = interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown_requested(&mut shutdown) => break,
            }
            if !self.poll_due(&mut shutdown).await {
                break;
            }
        }

        for entry in &mut self.entries {
            entry.state = PollState::Stopped;
        }
        info!("Polling stopped");

        self.sink.disconnect().await
    }

    /// Read every due entry once. Returns false if shutdown interrupted.
    async fn poll_due(&mut self, shutdown: &mut watch::Receiver<bool>) -> bool {
        let Self { entries, sink, .. } = self;

        let now = Instant::now();
        for entry in entries.iter_mut() {
            if entry.is_due(now) {
                entry.state = PollState::Due;
            }
        }

        for entry in entries.iter_mut().filter(|e| e.state == PollState::Due) {
            if *shutdown.borrow() {
                return false;
            }

            entry.state = PollState::Reading;
            let started = Instant::now();
            let reading = tokio::select! {
                reading = entry.sensor.read() => reading,
                _ = shutdown_requested(shutdown) => return false,
            };
            entry.last_read = Some(started);

            emit(entry, sink, reading).await;
        }

        true
    }
}

/// Resolves once `shutdown` holds true or its sender is dropped.
///
/// Sends of `false` are ignored.
pub async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn emit<T: Transport, S: TelemetrySink>(
    entry: &mut PollEntry<T>,
    sink: &mut S,
    reading: SensorReading,
) {
    let id = entry.sensor.id();

    let outcome = match PollFailure::from_errors(&reading.errors) {
        None => {
            entry.state = PollState::Success;
            PollOutcome::Success
        }
        Some(failure) => {
            entry.state = PollState::Failed;
            warn!(
                sensor = %id,
                device = %entry.sensor.address(),
                errors = reading.errors.len(),
                cached = reading.cached.len(),
                error = %failure.message,
                "Poll failed"
            );
            if reading.values.is_empty() {
                PollOutcome::Failed { failure }
            } else {
                PollOutcome::Degraded {
                    failure,
                    cached: reading.cached.clone(),
                }
            }
        }
    };

    sink.record_poll(id, &outcome);

    if !reading.values.is_empty() {
        debug!(sensor = %id, metrics = reading.values.len(), "Emitting telemetry");
        if let Err(e) = sink.send_telemetry(id, &reading.values).await {
            warn!(sensor = %id, error = %e, "Failed to send telemetry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::arbiter::{BusArbiter, BusTiming};
    use crate::cache::LastKnownValueCache;
    use crate::decode::WordOrder;
    use crate::frame::DeviceAddress;
    use crate::profile::{Readings, SensorKind};
    use crate::registry::DeviceRegistry;
    use crate::sim::{SimulatedBus, SimulatedDevice};

    #[derive(Default)]
    struct Recorded {
        connected: bool,
        disconnected: bool,
        telemetry: Vec<(String, Readings, Instant)>,
        attributes: Vec<(String, Attributes)>,
        outcomes: Vec<(String, PollOutcome)>,
    }

    #[derive(Clone, Default)]
    struct MemorySink(Arc<parking_lot::Mutex<Recorded>>);

    impl TelemetrySink for MemorySink {
        async fn connect(&mut self) -> Result<(), SinkError> {
            self.0.lock().connected = true;
            Ok(())
        }

        async fn send_telemetry(&mut self, sensor_id: &str, values: &Readings) -> Result<(), SinkError> {
            self.0
                .lock()
                .telemetry
                .push((sensor_id.to_string(), values.clone(), Instant::now()));
            Ok(())
        }

        async fn send_attributes(
            &mut self,
            sensor_id: &str,
            attributes: &Attributes,
        ) -> Result<(), SinkError> {
            self.0
                .lock()
                .attributes
                .push((sensor_id.to_string(), attributes.clone()));
            Ok(())
        }

        async fn disconnect(&mut self) -> Result<(), SinkError> {
            self.0.lock().disconnected = true;
            Ok(())
        }

        fn record_poll(&mut self, sensor_id: &str, outcome: &PollOutcome) {
            self.0
                .lock()
                .outcomes
                .push((sensor_id.to_string(), outcome.clone()));
        }
    }

    fn addr(raw: u8) -> DeviceAddress {
        DeviceAddress::new(raw).unwrap()
    }

    fn registry(bus: &SimulatedBus) -> DeviceRegistry<SimulatedBus> {
        let timing = BusTiming {
            debounce: Duration::from_millis(50),
            settle: Duration::from_millis(5),
            read_timeout: Duration::from_millis(100),
        };
        DeviceRegistry::new(
            Arc::new(BusArbiter::new(bus.clone(), timing)),
            Arc::new(LastKnownValueCache::new()),
        )
    }

    fn ph_device(address: u8, ph: f32) -> SimulatedDevice {
        SimulatedDevice::new(addr(address))
            .with_f32(0x0001, ph, WordOrder::Swapped)
            .with_f32(0x0003, 21.5, WordOrder::Swapped)
    }

    #[tokio::test(start_paused = true)]
    async fn test_emits_and_respects_intervals() {
        let bus = SimulatedBus::new();
        bus.add_device(ph_device(1, 7.0));
        bus.add_device(ph_device(2, 6.5));
        let registry = registry(&bus);

        let entries = vec![
            PollEntry::new(
                Sensor::new("ph1", SensorKind::Ph, registry.add_device(addr(1))),
                Duration::from_secs(5),
            ),
            PollEntry::new(
                Sensor::new("ph2", SensorKind::Ph, registry.add_device(addr(2))),
                Duration::from_secs(9),
            ),
        ];
        let sink = MemorySink::default();
        let (tx, rx) = watch::channel(false);
        let scheduler = PollingScheduler::new(entries, sink.clone()).with_tick(Duration::from_secs(1));
        let task = tokio::spawn(scheduler.run(rx));

        tokio::time::sleep(Duration::from_millis(10_500)).await;
        tx.send(true).unwrap();
        task.await.unwrap().unwrap();

        let recorded = sink.0.lock();
        assert!(recorded.connected);
        assert!(recorded.disconnected);
        assert_eq!(recorded.attributes.len(), 2);
        assert_eq!(recorded.attributes[0].1["type"], AttributeValue::Text("ph".into()));

        let ph1 = recorded.telemetry.iter().filter(|(id, ..)| id == "ph1").count();
        let ph2 = recorded.telemetry.iter().filter(|(id, ..)| id == "ph2").count();
        assert_eq!(ph1, 3);
        assert_eq!(ph2, 2);

        // Config order within a tick.
        assert_eq!(recorded.telemetry[0].0, "ph1");
        assert_eq!(recorded.telemetry[1].0, "ph2");
        assert_eq!(recorded.telemetry[0].1["ph_value"], 7.0);
        assert_eq!(recorded.telemetry[0].1["temperature"], 21.5);
        assert!(
            recorded
                .outcomes
                .iter()
                .all(|(_, outcome)| *outcome == PollOutcome::Success)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_emits_cached_and_advances_schedule() {
        let bus = SimulatedBus::new();
        bus.add_device(ph_device(3, 7.25));
        let registry = registry(&bus);

        let entries = vec![PollEntry::new(
            Sensor::new("ph3", SensorKind::Ph, registry.add_device(addr(3))),
            Duration::from_secs(2),
        )];
        let sink = MemorySink::default();
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(PollingScheduler::new(entries, sink.clone()).run(rx));

        tokio::time::sleep(Duration::from_millis(500)).await;
        bus.set_silent(addr(3), true);
        tokio::time::sleep(Duration::from_millis(4_000)).await;
        tx.send(true).unwrap();
        task.await.unwrap().unwrap();

        let recorded = sink.0.lock();
        // One live read, then two failed cycles served from the cache.
        assert_eq!(recorded.telemetry.len(), 3);
        assert!(recorded.telemetry.iter().all(|(_, v, _)| v["ph_value"] == 7.25));
        assert_eq!(recorded.outcomes[0].1, PollOutcome::Success);
        for (_, outcome) in &recorded.outcomes[1..] {
            match outcome {
                PollOutcome::Degraded { cached, .. } => {
                    assert_eq!(cached, &["ph_value".to_string(), "temperature".to_string()]);
                }
                other => panic!("expected degraded outcome, got {other:?}"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_without_cache_emits_nothing() {
        let bus = SimulatedBus::new();
        bus.add_device(ph_device(4, 7.0));
        bus.set_silent(addr(4), true);
        let registry = registry(&bus);

        let entries = vec![PollEntry::new(
            Sensor::new("ph4", SensorKind::Ph, registry.add_device(addr(4))),
            Duration::from_secs(15),
        )];
        let sink = MemorySink::default();
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(PollingScheduler::new(entries, sink.clone()).run(rx));

        tokio::time::sleep(Duration::from_secs(2)).await;
        tx.send(true).unwrap();
        task.await.unwrap().unwrap();

        let recorded = sink.0.lock();
        assert!(recorded.telemetry.is_empty());
        assert_eq!(recorded.outcomes.len(), 1);
        let failure = recorded.outcomes[0].1.failure().unwrap();
        assert!(matches!(recorded.outcomes[0].1, PollOutcome::Failed { .. }));
        assert_eq!(failure.kind, crate::error::ErrorKind::Timeout);
        assert!(failure.retryable);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_read() {
        let bus = SimulatedBus::new();
        bus.add_device(ph_device(5, 7.0));
        bus.set_silent(addr(5), true);
        let timing = BusTiming {
            debounce: Duration::from_millis(50),
            settle: Duration::from_millis(5),
            read_timeout: Duration::from_secs(30),
        };
        let registry = DeviceRegistry::new(
            Arc::new(BusArbiter::new(bus.clone(), timing)),
            Arc::new(LastKnownValueCache::new()),
        );

        let entries = vec![PollEntry::new(
            Sensor::new("ph5", SensorKind::Ph, registry.add_device(addr(5))),
            Duration::from_secs(15),
        )];
        let sink = MemorySink::default();
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(PollingScheduler::new(entries, sink.clone()).run(rx));

        tokio::time::sleep(Duration::from_secs(1)).await;
        let stop_requested = Instant::now();
        tx.send(true).unwrap();
        task.await.unwrap().unwrap();

        assert!(Instant::now() - stop_requested < Duration::from_secs(1));
        assert!(sink.0.lock().disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_false_send_keeps_polling() {
        let bus = SimulatedBus::new();
        bus.add_device(ph_device(6, 7.0));
        let registry = registry(&bus);

        let entries = vec![PollEntry::new(
            Sensor::new("ph6", SensorKind::Ph, registry.add_device(addr(6))),
            Duration::from_secs(2),
        )];
        let sink = MemorySink::default();
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(PollingScheduler::new(entries, sink.clone()).run(rx));

        tokio::time::sleep(Duration::from_millis(500)).await;
        tx.send(false).unwrap();
        tokio::time::sleep(Duration::from_millis(4_000)).await;
        assert!(!task.is_finished());
        assert_eq!(sink.0.lock().telemetry.len(), 3);

        tx.send(true).unwrap();
        task.await.unwrap().unwrap();
        assert!(sink.0.lock().disconnected);
    }

    #[tokio::test]
    async fn test_shutdown_requested_waits_for_true() {
        let (tx, mut rx) = watch::channel(false);
        tx.send(false).unwrap();
        let pending = tokio::time::timeout(Duration::from_millis(20), shutdown_requested(&mut rx)).await;
        assert!(pending.is_err());

        tx.send(true).unwrap();
        shutdown_requested(&mut rx).await;
    }

    #[test]
    fn test_is_due() {
        let bus = SimulatedBus::new();
        let registry = registry(&bus);
        let mut entry = PollEntry::new(
            Sensor::new("ph", SensorKind::Ph, registry.add_device(addr(1))),
            Duration::from_secs(15),
        );

        let now = Instant::now();
        assert!(entry.is_due(now));
        entry.last_read = Some(now);
        assert!(!entry.is_due(now + Duration::from_secs(14)));
        assert!(entry.is_due(now + Duration::from_secs(15)));
        assert_eq!(entry.state(), PollState::Idle);
    }
}
