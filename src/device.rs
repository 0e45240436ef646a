use tracing::{debug, info, warn};

use crate::{
    ble::{LinkEvent, PeripheralLink},
    config::{ConfigStorage, ConfigStore, DeviceConfig},
    connection::{ConnectionTracker, ConnectionTransition},
    platform::{Clock, Indicator, JoinAttempt, JoinStatus, NetworkLink, SystemControl, UserInput},
    power::{ActivityKind, BatteryAlert, PowerController},
    protocol::{Effect, ProtocolService},
    telemetry::{BatterySensor, MotionSensor, PositionSource, TelemetrySampler},
    types::{AlertPattern, ConnectionState, PowerState, RuntimeSettings, WakeSources},
    DEVICE_MODEL, DEVICE_NAME, FIRMWARE_VERSION,
};

#[cfg(feature = "tokio")]
use std::time::Duration;

type Sampler =
    TelemetrySampler<Box<dyn MotionSensor>, Box<dyn BatterySensor>, Box<dyn PositionSource>>;

/// Board collaborators handed to the runtime at boot
///
/// Each field is owned by the runtime for the rest of its life; nothing is
/// shared with other writers.
pub struct Hardware {
    /// BLE peripheral
    pub link: Box<dyn PeripheralLink>,
    /// Non-volatile storage for the configuration record
    pub storage: Box<dyn ConfigStorage>,
    /// Accelerometer
    pub motion: Box<dyn MotionSensor>,
    /// Battery ADC
    pub battery: Box<dyn BatterySensor>,
    /// Position fixes
    pub position: Box<dyn PositionSource>,
    /// Station-mode network interface
    pub network: Box<dyn NetworkLink>,
    /// LED and buzzer
    pub indicator: Box<dyn Indicator>,
    /// Restart and low-power control
    pub system: Box<dyn SystemControl>,
    /// Button
    pub input: Box<dyn UserInput>,
    /// Monotonic clock
    pub clock: Box<dyn Clock>,
}

/// Result of one loop iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Keep ticking
    Continue,
    /// The device restarted; this runtime instance is finished
    Restarting,
    /// The device entered low power; this runtime instance is finished
    Sleeping,
}

impl TickOutcome {
    /// Whether the runtime instance has ended
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Continue)
    }
}

/// The tracker's operating loop
///
/// Owns the configuration, connection and power state outright and drives
/// every collaborator from a single control loop. Construct it with
/// [`DeviceRuntime::boot`], then call [`DeviceRuntime::tick`] repeatedly or
/// hand it to [`DeviceRuntime::run`].
///
/// # Examples
///
/// ```
/// use trackerd::{sim::SimBoard, DeviceRuntime, RuntimeSettings, TickOutcome};
///
/// let board = SimBoard::new();
/// let mut runtime = DeviceRuntime::boot(RuntimeSettings::default(), board.hardware());
///
/// board.clock.advance(1_000);
/// assert_eq!(runtime.tick(), TickOutcome::Continue);
/// assert!(!runtime.config().paired);
/// ```
pub struct DeviceRuntime {
    settings: RuntimeSettings,
    store: ConfigStore<Box<dyn ConfigStorage>>,
    sampler: Sampler,
    protocol: ProtocolService,
    tracker: ConnectionTracker,
    power: PowerController,
    link: Box<dyn PeripheralLink>,
    network: Box<dyn NetworkLink>,
    indicator: Box<dyn Indicator>,
    system: Box<dyn SystemControl>,
    input: Box<dyn UserInput>,
    clock: Box<dyn Clock>,
    join: Option<JoinAttempt>,
    restart_at: Option<u64>,
    outcome: TickOutcome,
}

impl DeviceRuntime {
    /// Load the configuration, start advertising and publish the config view
    ///
    /// Nothing here is fatal: an advertising failure is retried every tick and
    /// an unreadable store falls back to defaults.
    #[must_use]
    pub fn boot(settings: RuntimeSettings, hardware: Hardware) -> Self {
        let Hardware {
            mut link,
            storage,
            motion,
            battery,
            position,
            network,
            mut indicator,
            system,
            input,
            clock,
        } = hardware;

        info!(
            name = DEVICE_NAME,
            model = DEVICE_MODEL,
            firmware = FIRMWARE_VERSION,
            "Starting tracker runtime"
        );

        let now = clock.now_ms();
        let store = ConfigStore::open(storage);
        let config = store.current();
        info!(
            paired = config.paired,
            transmit_interval = config.transmit_interval,
            "Configuration loaded"
        );

        let sampler = TelemetrySampler::new(
            motion,
            battery,
            position,
            settings.battery,
            config.motion_threshold,
        );
        let power = PowerController::new(&settings, config.transmit_interval, now);
        let protocol = ProtocolService::new(settings.capabilities);

        if let Err(e) = protocol.publish_config(&mut *link, config) {
            warn!("Failed to publish configuration view: {}", e);
        }

        let mut tracker = ConnectionTracker::new();
        tracker.resume_advertising(&mut *link);

        if settings.capabilities.has_led {
            indicator.set_led(false);
        }

        info!("BLE service started, waiting for connections...");

        Self {
            settings,
            store,
            sampler,
            protocol,
            tracker,
            power,
            link,
            network,
            indicator,
            system,
            input,
            clock,
            join: None,
            restart_at: None,
            outcome: TickOutcome::Continue,
        }
    }

    /// Current configuration
    #[must_use]
    pub const fn config(&self) -> &DeviceConfig {
        self.store.current()
    }

    /// Peer connection state
    #[must_use]
    pub const fn connection_state(&self) -> ConnectionState {
        self.tracker.state()
    }

    /// Power state
    #[must_use]
    pub const fn power_state(&self) -> PowerState {
        self.power.state()
    }

    /// Whether a network join is in flight
    #[must_use]
    pub const fn is_joining(&self) -> bool {
        self.join.is_some()
    }

    /// Whether a restart has been scheduled
    #[must_use]
    pub const fn restart_pending(&self) -> bool {
        self.restart_at.is_some()
    }

    /// Terminal outcome, or `Continue` while the runtime is live
    #[must_use]
    pub const fn outcome(&self) -> TickOutcome {
        self.outcome
    }

    /// Run one iteration of the control loop
    ///
    /// Order: link events, connection edges, button and motion, power
    /// decision, battery, status report, pending effects, then restart or sleep.
    /// Once a terminal outcome is reached every further call returns it
    /// without touching any collaborator.
    pub fn tick(&mut self) -> TickOutcome {
        if self.outcome.is_terminal() {
            return self.outcome;
        }
        let now = self.clock.now_ms();

        // A scheduled restart runs to completion; no further writes are taken.
        if self.restart_pending() {
            return self.restart_if_due(now);
        }

        self.tracker.retry_advertising(&mut *self.link);

        let effects = self.drain_link_events();
        self.apply_transitions(now);
        self.poll_inputs(now);

        let decision = self.power.tick(now);

        if decision.battery_check_due {
            self.check_battery(now);
        }

        if decision.report_due && self.tracker.is_connected() {
            self.report(now);
        }

        self.poll_join(now);
        for effect in effects {
            self.apply_effect(effect, now);
        }

        if self.restart_pending() {
            return self.restart_if_due(now);
        }

        if decision.enter_sleep {
            self.enter_sleep();
        }

        self.outcome
    }

    /// Tick on a fixed period until the device restarts or sleeps
    #[cfg(feature = "tokio")]
    pub async fn run(&mut self, period: Duration) -> TickOutcome {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            let outcome = self.tick();
            if outcome.is_terminal() {
                info!(?outcome, "Runtime finished");
                return outcome;
            }
        }
    }

    fn drain_link_events(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();

        for _ in 0..self.settings.max_events_per_tick {
            let Some(event) = self.link.poll_event() else {
                break;
            };
            match event {
                LinkEvent::Connected => self.tracker.on_connect(),
                LinkEvent::Disconnected => self.tracker.on_disconnect(&mut *self.link),
                LinkEvent::ConfigWrite(payload) => {
                    if let Ok(mut applied) =
                        self.protocol.handle_config_write(&mut self.store, &payload)
                    {
                        effects.append(&mut applied);
                    }
                }
                LinkEvent::CommandWrite(payload) => {
                    if let Ok(mut requested) =
                        self.protocol.handle_command_write(&mut self.store, &payload)
                    {
                        effects.append(&mut requested);
                    }
                }
            }

            // Writes queued behind a restart are never applied.
            if effects.contains(&Effect::ScheduleRestart) {
                break;
            }
        }

        effects
    }

    fn apply_transitions(&mut self, now: u64) {
        for transition in self.tracker.drain_transitions() {
            let (state, led) = match transition {
                ConnectionTransition::Connected => (ConnectionState::Connected, true),
                ConnectionTransition::Disconnected => (ConnectionState::Disconnected, false),
            };
            self.power.on_connection_changed(state, now);
            if self.settings.capabilities.has_led {
                self.indicator.set_led(led);
            }
        }
    }

    fn poll_inputs(&mut self, now: u64) {
        if self.input.take_button_press() {
            info!("Button pressed");
            self.power.note_activity(ActivityKind::Button, now);
            self.signal(AlertPattern::BUTTON_ACK);
        }

        if self.sampler.sample_motion().detected {
            self.power.note_activity(ActivityKind::Motion, now);
        }
    }

    fn check_battery(&mut self, now: u64) {
        // No reading is not an empty battery; wait for the next check.
        let Some(reading) = self.sampler.sample_battery() else {
            self.power.mark_battery_checked(now);
            return;
        };
        match self.power.record_battery(reading.percent, now) {
            BatteryAlert::Normal => {
                debug!(percent = reading.percent, "Battery level");
            }
            BatteryAlert::Low | BatteryAlert::Critical => {
                self.signal(AlertPattern::LOW_BATTERY);
            }
        }
    }

    fn report(&mut self, now: u64) {
        let motion = self.power.mark_reported(now);
        let sample = self.sampler.snapshot(motion);
        if let Err(e) = self.protocol.publish_status(&mut *self.link, sample) {
            warn!("Failed to push status: {}", e);
        }
    }

    fn poll_join(&mut self, now: u64) {
        let Some(join) = self.join else {
            return;
        };
        let has_led = self.settings.capabilities.has_led;
        match join.poll(&*self.network, now) {
            JoinStatus::Pending => {
                if has_led {
                    self.indicator.set_led(join.blink_on(now));
                }
            }
            JoinStatus::Joined => {
                self.join = None;
                if has_led {
                    let connected = self.tracker.is_connected();
                    self.indicator.set_led(connected);
                }
                self.signal(AlertPattern::NETWORK_JOINED);
            }
            JoinStatus::TimedOut => {
                self.join = None;
                if has_led {
                    self.indicator.set_led(false);
                }
            }
        }
    }

    fn apply_effect(&mut self, effect: Effect, now: u64) {
        match effect {
            Effect::ConfigApplied => {
                self.sync_config();
                self.signal(AlertPattern::CONFIG_SAVED);
            }
            Effect::ConfigReset => self.sync_config(),
            Effect::Reconnect { ssid, password } => {
                self.join = JoinAttempt::start(
                    &mut *self.network,
                    &ssid,
                    &password,
                    now,
                    self.settings.wifi_connect_timeout_ms,
                );
            }
            Effect::Alert(pattern) => self.indicator.play(pattern),
            Effect::ScheduleRestart => {
                if self.restart_at.is_none() {
                    self.link.flush();
                    self.restart_at = Some(now.saturating_add(self.settings.restart_delay_ms));
                    info!(delay_ms = self.settings.restart_delay_ms, "Restart scheduled");
                }
            }
        }
    }

    fn sync_config(&mut self) {
        let config = self.store.current();
        self.sampler.set_motion_threshold(config.motion_threshold);
        self.power.set_transmit_interval(config.transmit_interval);
        if let Err(e) = self.protocol.publish_config(&mut *self.link, config) {
            warn!("Failed to refresh configuration view: {}", e);
        }
    }

    fn restart_if_due(&mut self, now: u64) -> TickOutcome {
        if self.restart_at.is_some_and(|at| now >= at) {
            info!("Restarting");
            self.system.restart();
            self.outcome = TickOutcome::Restarting;
        }
        self.outcome
    }

    fn enter_sleep(&mut self) {
        let wake = WakeSources {
            motion_pin: true,
            button_pin: true,
            timer_ms: Some(self.settings.wake_timer_ms),
        };
        info!(?wake, "Entering deep sleep");
        if self.settings.capabilities.has_led {
            self.indicator.set_led(false);
        }
        self.system.enter_low_power(wake);
        self.outcome = TickOutcome::Sleeping;
    }

    fn signal(&mut self, pattern: AlertPattern) {
        let caps = self.settings.capabilities;
        if (pattern.audible && caps.has_buzzer) || caps.has_led {
            self.indicator.play(pattern);
        } else {
            debug!(?pattern, "No indicator hardware for pattern");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ble::Characteristic,
        config::DEFAULT_TRANSMIT_INTERVAL,
        sim::SimBoard,
        types::{Acceleration, HardwareCapabilities},
    };
    use serde_json::Value;

    fn boot(board: &SimBoard) -> DeviceRuntime {
        DeviceRuntime::boot(RuntimeSettings::default(), board.hardware())
    }

    fn connected(board: &SimBoard) -> DeviceRuntime {
        let mut runtime = boot(board);
        board.link.push(LinkEvent::Connected);
        runtime.tick();
        runtime
    }

    #[test]
    fn test_boot_advertises_and_publishes_config() {
        let board = SimBoard::new();
        let runtime = boot(&board);

        assert_eq!(board.link.advertise_calls(), 1);
        assert_eq!(runtime.connection_state(), ConnectionState::Disconnected);
        assert_eq!(runtime.power_state(), PowerState::Active);

        let view: Value =
            serde_json::from_slice(&board.link.value(Characteristic::Config).unwrap()).unwrap();
        assert_eq!(view["firmware_version"], FIRMWARE_VERSION);
        assert_eq!(view["transmit_interval"], DEFAULT_TRANSMIT_INTERVAL);
        assert!(view.get("wifi_password").is_none());
    }

    #[test]
    fn test_advertising_retried_until_it_succeeds() {
        let board = SimBoard::new();
        board.link.fail_advertising(true);
        let mut runtime = boot(&board);

        runtime.tick();
        assert_eq!(board.link.advertise_calls(), 2);

        board.link.fail_advertising(false);
        runtime.tick();
        runtime.tick();
        assert_eq!(board.link.advertise_calls(), 3);
    }

    #[test]
    fn test_reports_only_while_connected() {
        let board = SimBoard::new();
        let mut runtime = boot(&board);
        for _ in 0..5 {
            board.clock.advance(1_000);
            runtime.tick();
        }
        assert!(board.link.notifications(Characteristic::Status).is_empty());

        board.link.push(LinkEvent::Connected);
        runtime.tick();
        assert!(board.indicator.led());
        assert_eq!(board.link.notifications(Characteristic::Status).len(), 1);

        board.clock.advance(500);
        runtime.tick();
        assert_eq!(board.link.notifications(Characteristic::Status).len(), 1);

        board.clock.advance(500);
        runtime.tick();
        assert_eq!(board.link.notifications(Characteristic::Status).len(), 2);

        board.link.push(LinkEvent::Disconnected);
        board.clock.advance(1_000);
        runtime.tick();
        assert!(!board.indicator.led());
        assert_eq!(board.link.notifications(Characteristic::Status).len(), 2);
        assert_eq!(board.link.advertise_calls(), 2);
    }

    #[test]
    fn test_report_carries_motion_flag() {
        let board = SimBoard::new();
        let mut runtime = connected(&board);

        board.motion.trigger_interrupt();
        board.clock.advance(1_000);
        runtime.tick();

        let reports = board.link.notifications(Characteristic::Status);
        let last: Value = serde_json::from_slice(reports.last().unwrap()).unwrap();
        assert_eq!(last["motion"], true);
        assert_eq!(last["battery"], 100);
    }

    #[test]
    fn test_full_config_write_joins_network_once() {
        let board = SimBoard::new();
        board.network.join_after_polls(2);
        let mut runtime = connected(&board);

        board.link.write_config(
            br#"{"wifi_ssid":"HomeNet","wifi_password":"secret","device_id":"dev-1",
                "transmit_interval":120}"#,
        );
        runtime.tick();

        assert!(runtime.config().paired);
        assert_eq!(runtime.config().transmit_interval, 120);
        assert_eq!(board.network.joins(), vec!["HomeNet".to_string()]);
        assert!(runtime.is_joining());
        assert_eq!(board.indicator.count(AlertPattern::CONFIG_SAVED), 1);

        let view: Value =
            serde_json::from_slice(&board.link.value(Characteristic::Config).unwrap()).unwrap();
        assert_eq!(view["wifi_ssid"], "HomeNet");
        assert_eq!(view["paired"], true);

        runtime.tick();
        runtime.tick();
        assert!(!runtime.is_joining());
        assert_eq!(board.indicator.count(AlertPattern::NETWORK_JOINED), 1);
        assert_eq!(board.network.joins().len(), 1);
    }

    #[test]
    fn test_join_gives_up_after_timeout() {
        let board = SimBoard::new();
        let mut runtime = connected(&board);
        board
            .link
            .write_config(br#"{"wifi_ssid":"HomeNet","wifi_password":"secret"}"#);
        runtime.tick();
        assert!(runtime.is_joining());

        board.clock.advance(20_000);
        runtime.tick();
        assert!(!runtime.is_joining());
        assert_eq!(board.indicator.count(AlertPattern::NETWORK_JOINED), 0);
    }

    #[test]
    fn test_join_blinks_then_turns_led_off_on_failure() {
        let board = SimBoard::new();
        let mut runtime = connected(&board);
        assert!(board.indicator.led());
        board
            .link
            .write_config(br#"{"wifi_ssid":"HomeNet","wifi_password":"secret"}"#);
        runtime.tick();
        assert!(runtime.is_joining());

        board.clock.advance(500);
        runtime.tick();
        assert!(!board.indicator.led());
        board.clock.advance(500);
        runtime.tick();
        assert!(board.indicator.led());

        board.clock.advance(19_000);
        runtime.tick();
        assert!(!runtime.is_joining());
        assert!(!board.indicator.led());
    }

    #[test]
    fn test_malformed_config_is_ignored() {
        let board = SimBoard::new();
        let mut runtime = connected(&board);
        let before = runtime.config().clone();

        board.link.write_config(b"{\"wifi_ssid\": ");
        runtime.tick();

        assert_eq!(runtime.config(), &before);
        assert_eq!(board.storage.writes(), 0);
        assert_eq!(board.indicator.count(AlertPattern::CONFIG_SAVED), 0);
        assert_eq!(runtime.outcome(), TickOutcome::Continue);
    }

    #[test]
    fn test_interval_write_does_not_pair() {
        let board = SimBoard::new();
        let mut runtime = connected(&board);
        board.link.write_config(br#"{"transmit_interval":120}"#);
        runtime.tick();

        assert_eq!(runtime.config().transmit_interval, 120);
        assert!(!runtime.config().paired);
        assert!(!runtime.is_joining());
    }

    #[test]
    fn test_reset_restarts_exactly_once_after_delay() {
        let board = SimBoard::new();
        let mut runtime = connected(&board);

        board.link.write_command(br#"{"command":"reset"}"#);
        board.link.write_config(br#"{"transmit_interval":5}"#);
        runtime.tick();
        assert!(runtime.restart_pending());
        assert_eq!(board.link.flushes(), 1);
        assert_eq!(board.system.restarts(), 0);

        board.clock.advance(500);
        assert_eq!(runtime.tick(), TickOutcome::Continue);
        assert_eq!(board.link.pending_events(), 1);

        board.clock.advance(500);
        assert_eq!(runtime.tick(), TickOutcome::Restarting);
        board.clock.advance(5_000);
        assert_eq!(runtime.tick(), TickOutcome::Restarting);
        assert_eq!(board.system.restarts(), 1);
        assert_eq!(runtime.config().transmit_interval, DEFAULT_TRANSMIT_INTERVAL);
    }

    #[test]
    fn test_factory_reset_persists_then_restarts() {
        let board = SimBoard::new();
        let mut runtime = connected(&board);
        board
            .link
            .write_config(br#"{"wifi_ssid":"HomeNet","wifi_password":"secret"}"#);
        runtime.tick();
        assert!(runtime.config().paired);

        board.link.write_command(br#"{"command":"factory_reset"}"#);
        runtime.tick();
        assert_eq!(runtime.config(), &DeviceConfig::default());

        board.clock.advance(1_000);
        assert_eq!(runtime.tick(), TickOutcome::Restarting);
        assert_eq!(board.system.restarts(), 1);

        let rebooted = boot(&board);
        assert_eq!(rebooted.config(), &DeviceConfig::default());
    }

    #[test]
    fn test_factory_reset_does_not_signal_config_saved() {
        let board = SimBoard::new();
        let mut runtime = connected(&board);
        board.link.write_config(br#"{"transmit_interval":120}"#);
        runtime.tick();
        assert_eq!(board.indicator.count(AlertPattern::CONFIG_SAVED), 1);

        board.link.write_command(br#"{"command":"factory_reset"}"#);
        runtime.tick();
        assert_eq!(board.indicator.count(AlertPattern::CONFIG_SAVED), 1);
        assert!(runtime.restart_pending());

        let view: Value =
            serde_json::from_slice(&board.link.value(Characteristic::Config).unwrap()).unwrap();
        assert_eq!(view["transmit_interval"], DEFAULT_TRANSMIT_INTERVAL);
    }

    #[test]
    fn test_unknown_command_changes_nothing() {
        let board = SimBoard::new();
        let mut runtime = connected(&board);
        board.link.write_command(br#"{"command":"unknown_cmd"}"#);
        runtime.tick();

        assert!(!runtime.restart_pending());
        assert!(board.indicator.patterns().is_empty());
        assert_eq!(board.storage.writes(), 0);
    }

    #[test]
    fn test_locate_plays_alert() {
        let board = SimBoard::new();
        let mut runtime = connected(&board);
        board.link.write_command(br#"{"command":"locate"}"#);
        runtime.tick();
        assert_eq!(board.indicator.count(AlertPattern::LOCATE), 1);
    }

    #[test]
    fn test_sleeps_once_after_inactivity() {
        let board = SimBoard::new();
        let mut runtime = boot(&board);

        board.clock.advance(30_001);
        runtime.tick();
        assert_eq!(runtime.power_state(), PowerState::IdleAwaitingSleep);

        board.clock.advance(270_000);
        assert_eq!(runtime.tick(), TickOutcome::Sleeping);
        assert_eq!(runtime.tick(), TickOutcome::Sleeping);

        assert_eq!(
            board.system.sleeps(),
            vec![WakeSources {
                motion_pin: true,
                button_pin: true,
                timer_ms: Some(600_000),
            }]
        );
    }

    #[test]
    fn test_motion_and_button_keep_device_awake() {
        let board = SimBoard::new();
        let mut runtime = boot(&board);

        board.clock.advance(200_000);
        board.motion.set_acceleration(Acceleration { x: 1.5, y: 0.0, z: 1.0 });
        runtime.tick();
        board.motion.set_acceleration(Acceleration { x: 0.0, y: 0.0, z: 1.0 });

        board.clock.advance(200_000);
        board.button.press();
        runtime.tick();
        assert_eq!(board.indicator.count(AlertPattern::BUTTON_ACK), 1);

        board.clock.advance(300_000);
        assert_eq!(runtime.tick(), TickOutcome::Continue);
        board.clock.advance(1);
        assert_eq!(runtime.tick(), TickOutcome::Sleeping);
    }

    #[test]
    fn test_never_sleeps_while_connected() {
        let board = SimBoard::new();
        let mut runtime = connected(&board);
        for _ in 0..10 {
            board.clock.advance(100_000);
            assert_eq!(runtime.tick(), TickOutcome::Continue);
        }
        assert!(board.system.sleeps().is_empty());
    }

    #[test]
    fn test_low_battery_flashes_without_sleeping() {
        let board = SimBoard::new();
        board.battery.set_raw(2130);
        let mut runtime = boot(&board);

        runtime.tick();
        assert_eq!(board.indicator.count(AlertPattern::LOW_BATTERY), 1);
        assert_eq!(runtime.power_state(), PowerState::Active);

        board.clock.advance(30_000);
        runtime.tick();
        assert_eq!(board.indicator.count(AlertPattern::LOW_BATTERY), 1);

        board.clock.advance(30_000);
        runtime.tick();
        assert_eq!(board.indicator.count(AlertPattern::LOW_BATTERY), 2);
    }

    #[test]
    fn test_missing_battery_reading_raises_no_alert() {
        let board = SimBoard::new();
        board.battery.set_available(false);
        let mut runtime = connected(&board);
        assert_eq!(board.indicator.count(AlertPattern::LOW_BATTERY), 0);

        board.clock.advance(60_000);
        runtime.tick();
        assert_eq!(board.indicator.count(AlertPattern::LOW_BATTERY), 0);
        assert_eq!(runtime.power_state(), PowerState::Active);

        let reports = board.link.notifications(Characteristic::Status);
        let last: Value = serde_json::from_slice(reports.last().unwrap()).unwrap();
        assert_eq!(last["battery"], 0);
    }

    #[test]
    fn test_event_draining_is_bounded() {
        let board = SimBoard::new();
        let settings = RuntimeSettings {
            max_events_per_tick: 4,
            ..Default::default()
        };
        let mut runtime = DeviceRuntime::boot(settings, board.hardware());
        for _ in 0..10 {
            board.link.write_command(br#"{"command":"unknown_cmd"}"#);
        }

        runtime.tick();
        assert_eq!(board.link.pending_events(), 6);
        runtime.tick();
        runtime.tick();
        assert_eq!(board.link.pending_events(), 0);
    }

    #[test]
    fn test_connection_burst_in_one_tick() {
        let board = SimBoard::new();
        let mut runtime = connected(&board);

        board.link.push(LinkEvent::Disconnected);
        board.link.push(LinkEvent::Connected);
        runtime.tick();

        assert_eq!(runtime.connection_state(), ConnectionState::Connected);
        assert!(board.indicator.led());
        assert_eq!(board.link.advertise_calls(), 2);
    }

    #[test]
    fn test_no_indicator_hardware() {
        let board = SimBoard::new();
        let settings = RuntimeSettings {
            capabilities: HardwareCapabilities {
                has_buzzer: false,
                has_led: false,
            },
            ..Default::default()
        };
        let mut runtime = DeviceRuntime::boot(settings, board.hardware());
        board.link.push(LinkEvent::Connected);
        board.link.write_command(br#"{"command":"locate"}"#);
        board.button.press();
        runtime.tick();

        assert!(board.indicator.patterns().is_empty());
        assert!(!board.indicator.led());
    }

    #[tokio::test]
    async fn test_run_until_sleep() {
        let board = SimBoard::new();
        let settings = RuntimeSettings {
            inactivity_timeout_ms: 40,
            idle_grace_ms: 10,
            ..Default::default()
        };
        let mut runtime = DeviceRuntime::boot(settings, board.hardware_with_system_clock());

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            runtime.run(Duration::from_millis(5)),
        )
        .await
        .unwrap();

        assert_eq!(outcome, TickOutcome::Sleeping);
        assert_eq!(board.system.sleeps().len(), 1);
    }

    #[test]
    fn test_run_until_restart() {
        let board = SimBoard::new();
        let settings = RuntimeSettings {
            restart_delay_ms: 20,
            ..Default::default()
        };
        let mut runtime = DeviceRuntime::boot(settings, board.hardware_with_system_clock());
        board.link.push(LinkEvent::Connected);
        board.link.write_command(br#"{"command":"reset"}"#);

        let outcome = tokio_test::block_on(runtime.run(Duration::from_millis(5)));

        assert_eq!(outcome, TickOutcome::Restarting);
        assert_eq!(board.system.restarts(), 1);
    }
}
