//! In-memory collaborators for host runs and tests.
//!
//! Every type here is a cheap [`Clone`] handle over shared state, so a test can
//! hand one clone to the runtime and keep another to script inputs and inspect
//! what the runtime did.

use bytes::Bytes;
use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
};

use crate::{
    ble::{Characteristic, LinkEvent, PeripheralLink},
    config::ConfigStorage,
    device::Hardware,
    error::{Result, TrackerError},
    platform::{Clock, Indicator, NetworkLink, SystemClock, SystemControl, UserInput},
    telemetry::{BatterySensor, MotionReading, MotionSensor, PositionSource},
    types::{Acceleration, AlertPattern, Position, WakeSources},
};

fn lock<T>(shared: &Arc<Mutex<T>>) -> MutexGuard<'_, T> {
    shared.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct StorageState {
    record: Option<Vec<u8>>,
    fail_writes: bool,
    writes: usize,
}

/// Configuration storage held in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    state: Arc<Mutex<StorageState>>,
}

impl MemoryStorage {
    /// Storage preloaded with a raw record
    #[must_use]
    pub fn with_record(record: Vec<u8>) -> Self {
        let storage = Self::default();
        lock(&storage.state).record = Some(record);
        storage
    }

    /// Make subsequent writes fail
    pub fn fail_writes(&self, fail: bool) {
        lock(&self.state).fail_writes = fail;
    }

    /// Number of successful writes
    #[must_use]
    pub fn writes(&self) -> usize {
        lock(&self.state).writes
    }
}

impl ConfigStorage for MemoryStorage {
    fn read_record(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(lock(&self.state).record.clone())
    }

    fn write_record(&mut self, record: &[u8]) -> Result<()> {
        let mut state = lock(&self.state);
        if state.fail_writes {
            return Err(TrackerError::Storage("Simulated flash write failure".to_string()));
        }
        state.record = Some(record.to_vec());
        state.writes += 1;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct LinkState {
    events: VecDeque<LinkEvent>,
    values: HashMap<Characteristic, Vec<u8>>,
    notifications: Vec<(Characteristic, Vec<u8>)>,
    advertise_calls: usize,
    fail_advertising: bool,
    flushes: usize,
}

/// Peripheral link driven by a scripted event queue
#[derive(Debug, Clone, Default)]
pub struct ScriptedLink {
    state: Arc<Mutex<LinkState>>,
}

impl ScriptedLink {
    /// Empty link
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an event for the runtime
    pub fn push(&self, event: LinkEvent) {
        lock(&self.state).events.push_back(event);
    }

    /// Queue a config write
    pub fn write_config(&self, payload: &[u8]) {
        self.push(LinkEvent::ConfigWrite(Bytes::copy_from_slice(payload)));
    }

    /// Queue a command write
    pub fn write_command(&self, payload: &[u8]) {
        self.push(LinkEvent::CommandWrite(Bytes::copy_from_slice(payload)));
    }

    /// Events not yet consumed
    #[must_use]
    pub fn pending_events(&self) -> usize {
        lock(&self.state).events.len()
    }

    /// Make advertising requests fail
    pub fn fail_advertising(&self, fail: bool) {
        lock(&self.state).fail_advertising = fail;
    }

    /// Advertising requests seen, failed ones included
    #[must_use]
    pub fn advertise_calls(&self) -> usize {
        lock(&self.state).advertise_calls
    }

    /// Payloads notified on a characteristic, oldest first
    #[must_use]
    pub fn notifications(&self, characteristic: Characteristic) -> Vec<Vec<u8>> {
        lock(&self.state)
            .notifications
            .iter()
            .filter(|(c, _)| *c == characteristic)
            .map(|(_, value)| value.clone())
            .collect()
    }

    /// Current readable value of a characteristic
    #[must_use]
    pub fn value(&self, characteristic: Characteristic) -> Option<Vec<u8>> {
        lock(&self.state).values.get(&characteristic).cloned()
    }

    /// Number of flushes requested
    #[must_use]
    pub fn flushes(&self) -> usize {
        lock(&self.state).flushes
    }
}

impl PeripheralLink for ScriptedLink {
    fn start_advertising(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        state.advertise_calls += 1;
        if state.fail_advertising {
            return Err(TrackerError::HardwareUnavailable {
                subsystem: "ble",
                reason: "advertising refused".to_string(),
            });
        }
        Ok(())
    }

    fn poll_event(&mut self) -> Option<LinkEvent> {
        lock(&self.state).events.pop_front()
    }

    fn set_value(&mut self, characteristic: Characteristic, value: &[u8]) -> Result<()> {
        lock(&self.state).values.insert(characteristic, value.to_vec());
        Ok(())
    }

    fn notify(&mut self, characteristic: Characteristic, value: &[u8]) -> Result<()> {
        let mut state = lock(&self.state);
        state.values.insert(characteristic, value.to_vec());
        state.notifications.push((characteristic, value.to_vec()));
        Ok(())
    }

    fn flush(&mut self) {
        lock(&self.state).flushes += 1;
    }
}

#[derive(Debug)]
struct MotionState {
    acceleration: Acceleration,
    interrupt: bool,
    available: bool,
}

impl Default for MotionState {
    fn default() -> Self {
        Self {
            acceleration: Acceleration { x: 0.0, y: 0.0, z: 1.0 },
            interrupt: false,
            available: true,
        }
    }
}

/// Accelerometer at rest (1 g on Z) until told otherwise
#[derive(Debug, Clone, Default)]
pub struct SimMotion {
    state: Arc<Mutex<MotionState>>,
}

impl SimMotion {
    /// Set the acceleration returned by subsequent reads
    pub fn set_acceleration(&self, acceleration: Acceleration) {
        lock(&self.state).acceleration = acceleration;
    }

    /// Latch the motion interrupt until the next read
    pub fn trigger_interrupt(&self) {
        lock(&self.state).interrupt = true;
    }

    /// Toggle sensor availability
    pub fn set_available(&self, available: bool) {
        lock(&self.state).available = available;
    }
}

impl MotionSensor for SimMotion {
    fn read_motion_event(&mut self) -> Result<MotionReading> {
        let mut state = lock(&self.state);
        if !state.available {
            return Err(TrackerError::HardwareUnavailable {
                subsystem: "accelerometer",
                reason: "no response on I2C".to_string(),
            });
        }
        Ok(MotionReading {
            acceleration: state.acceleration,
            interrupt: std::mem::take(&mut state.interrupt),
        })
    }
}

#[derive(Debug)]
struct BatteryState {
    raw: u16,
    available: bool,
}

/// Battery ADC returning a settable raw count
#[derive(Debug, Clone)]
pub struct SimBattery {
    state: Arc<Mutex<BatteryState>>,
}

impl SimBattery {
    /// ADC reading `raw`
    #[must_use]
    pub fn new(raw: u16) -> Self {
        Self {
            state: Arc::new(Mutex::new(BatteryState {
                raw,
                available: true,
            })),
        }
    }

    /// Change the raw count
    pub fn set_raw(&self, raw: u16) {
        lock(&self.state).raw = raw;
    }

    /// Toggle ADC availability
    pub fn set_available(&self, available: bool) {
        lock(&self.state).available = available;
    }
}

impl BatterySensor for SimBattery {
    fn read_battery_raw(&mut self) -> Result<u16> {
        let state = lock(&self.state);
        if state.available {
            Ok(state.raw)
        } else {
            Err(TrackerError::HardwareUnavailable {
                subsystem: "battery",
                reason: "ADC not calibrated".to_string(),
            })
        }
    }
}

/// Position source with a fixed (or absent) fix
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedPosition {
    fix: Option<Position>,
}

impl FixedPosition {
    /// No fix available
    #[must_use]
    pub const fn none() -> Self {
        Self { fix: None }
    }

    /// Always at the given coordinates
    #[must_use]
    pub const fn at(latitude: f64, longitude: f64) -> Self {
        Self {
            fix: Some(Position {
                latitude,
                longitude,
            }),
        }
    }
}

impl PositionSource for FixedPosition {
    fn latest_position(&mut self) -> Option<Position> {
        self.fix
    }
}

#[derive(Debug)]
struct NetworkState {
    available: bool,
    connected: bool,
    join_after_polls: Option<u32>,
    polls: u32,
    disconnects: usize,
    joins: Vec<String>,
}

/// Station interface that joins after a scripted number of polls
#[derive(Debug, Clone)]
pub struct SimNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl Default for SimNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl SimNetwork {
    /// Interface that never joins unless scripted
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(NetworkState {
                available: true,
                connected: false,
                join_after_polls: None,
                polls: 0,
                disconnects: 0,
                joins: Vec::new(),
            })),
        }
    }

    /// Report connected on the `polls`-th status check after `begin`
    pub fn join_after_polls(&self, polls: u32) {
        lock(&self.state).join_after_polls = Some(polls);
    }

    /// Make `begin` fail
    pub fn set_available(&self, available: bool) {
        lock(&self.state).available = available;
    }

    /// Number of `disconnect` calls
    #[must_use]
    pub fn disconnects(&self) -> usize {
        lock(&self.state).disconnects
    }

    /// SSIDs passed to `begin`, oldest first
    #[must_use]
    pub fn joins(&self) -> Vec<String> {
        lock(&self.state).joins.clone()
    }
}

impl NetworkLink for SimNetwork {
    fn disconnect(&mut self) {
        let mut state = lock(&self.state);
        state.connected = false;
        state.disconnects += 1;
    }

    fn begin(&mut self, ssid: &str, _password: &str) -> Result<()> {
        let mut state = lock(&self.state);
        if !state.available {
            return Err(TrackerError::HardwareUnavailable {
                subsystem: "wifi",
                reason: "radio off".to_string(),
            });
        }
        state.joins.push(ssid.to_string());
        state.polls = 0;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        let mut state = lock(&self.state);
        if !state.connected {
            state.polls += 1;
            if state.join_after_polls.is_some_and(|n| state.polls >= n) {
                state.connected = true;
            }
        }
        state.connected
    }
}

/// Clock advanced by hand
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<u64>>,
}

impl ManualClock {
    /// Clock reading `start_ms`
    #[must_use]
    pub fn starting_at(start_ms: u64) -> Self {
        Self {
            now: Arc::new(Mutex::new(start_ms)),
        }
    }

    /// Move forward by `ms`
    pub fn advance(&self, ms: u64) {
        let mut now = lock(&self.now);
        *now = now.saturating_add(ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        *lock(&self.now)
    }
}

#[derive(Debug, Default)]
struct IndicatorState {
    led: bool,
    patterns: Vec<AlertPattern>,
}

/// Indicator that records what it was asked to show
#[derive(Debug, Clone, Default)]
pub struct RecordingIndicator {
    state: Arc<Mutex<IndicatorState>>,
}

impl RecordingIndicator {
    /// LED level
    #[must_use]
    pub fn led(&self) -> bool {
        lock(&self.state).led
    }

    /// Patterns played, oldest first
    #[must_use]
    pub fn patterns(&self) -> Vec<AlertPattern> {
        lock(&self.state).patterns.clone()
    }

    /// How many times `pattern` was played
    #[must_use]
    pub fn count(&self, pattern: AlertPattern) -> usize {
        lock(&self.state)
            .patterns
            .iter()
            .filter(|p| **p == pattern)
            .count()
    }
}

impl Indicator for RecordingIndicator {
    fn set_led(&mut self, on: bool) {
        lock(&self.state).led = on;
    }

    fn play(&mut self, pattern: AlertPattern) {
        lock(&self.state).patterns.push(pattern);
    }
}

#[derive(Debug, Default)]
struct SystemState {
    restarts: usize,
    sleeps: Vec<WakeSources>,
}

/// System control that records restarts and sleeps instead of performing them
#[derive(Debug, Clone, Default)]
pub struct RecordingSystem {
    state: Arc<Mutex<SystemState>>,
}

impl RecordingSystem {
    /// Number of restarts requested
    #[must_use]
    pub fn restarts(&self) -> usize {
        lock(&self.state).restarts
    }

    /// Wake sources of each sleep entry
    #[must_use]
    pub fn sleeps(&self) -> Vec<WakeSources> {
        lock(&self.state).sleeps.clone()
    }
}

impl SystemControl for RecordingSystem {
    fn restart(&mut self) {
        lock(&self.state).restarts += 1;
    }

    fn enter_low_power(&mut self, wake: WakeSources) {
        lock(&self.state).sleeps.push(wake);
    }
}

/// Button with a latched press
#[derive(Debug, Clone, Default)]
pub struct SimButton {
    pressed: Arc<Mutex<bool>>,
}

impl SimButton {
    /// Latch a press
    pub fn press(&self) {
        *lock(&self.pressed) = true;
    }
}

impl UserInput for SimButton {
    fn take_button_press(&mut self) -> bool {
        std::mem::take(&mut *lock(&self.pressed))
    }
}

/// A complete simulated board: one handle per collaborator
///
/// [`SimBoard::hardware`] hands clones to the runtime while the fields stay
/// available for scripting and inspection.
#[derive(Debug, Clone)]
pub struct SimBoard {
    /// Peripheral link
    pub link: ScriptedLink,
    /// Configuration storage
    pub storage: MemoryStorage,
    /// Accelerometer
    pub motion: SimMotion,
    /// Battery ADC, full by default
    pub battery: SimBattery,
    /// Position source
    pub position: FixedPosition,
    /// Network interface
    pub network: SimNetwork,
    /// LED and buzzer
    pub indicator: RecordingIndicator,
    /// Restart and sleep recorder
    pub system: RecordingSystem,
    /// Button
    pub button: SimButton,
    /// Manual clock starting at zero
    pub clock: ManualClock,
}

impl Default for SimBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl SimBoard {
    /// Board at rest with a full battery and no position fix
    #[must_use]
    pub fn new() -> Self {
        Self {
            link: ScriptedLink::new(),
            storage: MemoryStorage::default(),
            motion: SimMotion::default(),
            battery: SimBattery::new(3000),
            position: FixedPosition::none(),
            network: SimNetwork::new(),
            indicator: RecordingIndicator::default(),
            system: RecordingSystem::default(),
            button: SimButton::default(),
            clock: ManualClock::default(),
        }
    }

    /// Collaborators for the runtime, driven by the manual clock
    #[must_use]
    pub fn hardware(&self) -> Hardware {
        self.hardware_with_clock(Box::new(self.clock.clone()))
    }

    /// Collaborators for the runtime, driven by wall time
    #[must_use]
    pub fn hardware_with_system_clock(&self) -> Hardware {
        self.hardware_with_clock(Box::new(SystemClock::new()))
    }

    fn hardware_with_clock(&self, clock: Box<dyn Clock>) -> Hardware {
        Hardware {
            link: Box::new(self.link.clone()),
            storage: Box::new(self.storage.clone()),
            motion: Box::new(self.motion.clone()),
            battery: Box::new(self.battery.clone()),
            position: Box::new(self.position),
            network: Box::new(self.network.clone()),
            indicator: Box::new(self.indicator.clone()),
            system: Box::new(self.system.clone()),
            input: Box::new(self.button.clone()),
            clock,
        }
    }
}
