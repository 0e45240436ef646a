//! Sleep, wake and telemetry cadence decisions.
//!
//! The controller owns no hardware. Each tick it is told the time and the
//! connection state, and answers with a [`PowerDecision`] the runtime acts on.
//! Times are monotonic milliseconds since boot.

use tracing::{debug, error, info, warn};

use crate::types::{ConnectionState, PowerState, ReportCadence, RuntimeSettings};

/// Inputs that count as activity and keep the device awake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityKind {
    /// A peer connected
    Connection,
    /// The accelerometer saw motion
    Motion,
    /// The user pressed the button
    Button,
}

/// Outcome of classifying a battery sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatteryAlert {
    /// Above the low threshold
    Normal,
    /// Below the low threshold
    Low,
    /// Below the critical threshold
    Critical,
}

/// What the runtime should do this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PowerDecision {
    /// Push a status report to the connected peer
    pub report_due: bool,
    /// Sample the battery
    pub battery_check_due: bool,
    /// Enter low power; raised exactly once per wake cycle
    pub enter_sleep: bool,
}

/// Power and cadence state machine
#[derive(Debug)]
pub struct PowerController {
    state: PowerState,
    connection: ConnectionState,
    activity_at: u64,
    last_report_at: Option<u64>,
    last_battery_at: Option<u64>,
    motion_observed: bool,
    transmit_interval_s: u32,
    inactivity_timeout_ms: u64,
    idle_grace_ms: u64,
    report_cadence: ReportCadence,
    battery_check_interval_ms: u64,
    low_battery_percent: u8,
    critical_battery_percent: u8,
}

impl PowerController {
    /// Start in `Active` with the activity timestamp at `now`
    #[must_use]
    pub fn new(settings: &RuntimeSettings, transmit_interval_s: u32, now: u64) -> Self {
        Self {
            state: PowerState::Active,
            connection: ConnectionState::Disconnected,
            activity_at: now,
            last_report_at: None,
            last_battery_at: None,
            motion_observed: false,
            transmit_interval_s,
            inactivity_timeout_ms: settings.inactivity_timeout_ms,
            idle_grace_ms: settings.idle_grace_ms,
            report_cadence: settings.report_cadence,
            battery_check_interval_ms: settings.battery_check_interval_ms,
            low_battery_percent: settings.low_battery_percent,
            critical_battery_percent: settings.critical_battery_percent,
        }
    }

    /// Current power state
    #[must_use]
    pub const fn state(&self) -> PowerState {
        self.state
    }

    /// Timestamp of the last activity
    #[must_use]
    pub const fn activity_at(&self) -> u64 {
        self.activity_at
    }

    /// Whether motion was seen since the last report
    #[must_use]
    pub const fn motion_observed(&self) -> bool {
        self.motion_observed
    }

    /// Follow a new `transmit_interval` from the device configuration
    pub fn set_transmit_interval(&mut self, seconds: u32) {
        if seconds > 0 {
            self.transmit_interval_s = seconds;
        }
    }

    /// Interval between status reports while connected
    #[must_use]
    pub fn report_interval_ms(&self) -> u64 {
        match self.report_cadence {
            ReportCadence::Fixed { interval_ms } => interval_ms,
            ReportCadence::ConfigDriven => u64::from(self.transmit_interval_s) * 1000,
        }
    }

    /// Reset the activity timestamp and force `Active`
    pub fn note_activity(&mut self, kind: ActivityKind, now: u64) {
        if self.state == PowerState::Sleeping {
            return;
        }
        if self.state != PowerState::Active {
            debug!(?kind, "Activity, back to active");
        }
        self.activity_at = now;
        self.state = PowerState::Active;
        if kind == ActivityKind::Motion {
            self.motion_observed = true;
        }
    }

    /// Mirror a connection edge
    pub fn on_connection_changed(&mut self, connection: ConnectionState, now: u64) {
        self.connection = connection;
        match connection {
            ConnectionState::Connected => {
                self.note_activity(ActivityKind::Connection, now);
                self.last_report_at = None;
            }
            ConnectionState::Disconnected => {
                if self.state != PowerState::Sleeping {
                    self.activity_at = now;
                }
            }
        }
    }

    /// Advance the state machine
    pub fn tick(&mut self, now: u64) -> PowerDecision {
        let mut decision = PowerDecision::default();
        if self.state == PowerState::Sleeping {
            return decision;
        }

        if self.connection.is_connected() {
            self.activity_at = now;
            self.state = PowerState::Active;
            decision.report_due = self
                .last_report_at
                .is_none_or(|at| now.saturating_sub(at) >= self.report_interval_ms());
        } else {
            let idle = now.saturating_sub(self.activity_at);
            if idle > self.inactivity_timeout_ms {
                info!(idle_ms = idle, "Inactivity timeout reached, entering sleep");
                self.state = PowerState::Sleeping;
                decision.enter_sleep = true;
                return decision;
            }
            let next = if idle > self.idle_grace_ms {
                PowerState::IdleAwaitingSleep
            } else {
                PowerState::Active
            };
            if next != self.state {
                debug!(from = %self.state, to = %next, "Power state changed");
                self.state = next;
            }
        }

        decision.battery_check_due = self
            .last_battery_at
            .is_none_or(|at| now.saturating_sub(at) >= self.battery_check_interval_ms);

        decision
    }

    /// Record a pushed report; returns the motion flag that went into it and clears it
    pub fn mark_reported(&mut self, now: u64) -> bool {
        self.last_report_at = Some(now);
        std::mem::take(&mut self.motion_observed)
    }

    /// Restart the battery cadence without a sample, e.g. when the ADC failed
    pub const fn mark_battery_checked(&mut self, now: u64) {
        self.last_battery_at = Some(now);
    }

    /// Record a battery sample and classify it
    ///
    /// Low levels only raise a warning; they never force sleep.
    pub fn record_battery(&mut self, percent: u8, now: u64) -> BatteryAlert {
        self.mark_battery_checked(now);
        if percent < self.critical_battery_percent {
            error!(percent, "Critical battery level");
            BatteryAlert::Critical
        } else if percent < self.low_battery_percent {
            warn!(percent, "Low battery");
            BatteryAlert::Low
        } else {
            BatteryAlert::Normal
        }
    }
}
