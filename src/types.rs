use serde::{Deserialize, Serialize};
use std::fmt;

/// Peer connection state of the peripheral link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No peer connected; the link should be advertising
    #[default]
    Disconnected,
    /// A peer is connected
    Connected,
}

impl ConnectionState {
    /// Whether a peer is currently connected
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connected => write!(f, "Connected"),
        }
    }
}

/// Power state of the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PowerState {
    /// Connected, or within the grace window after the last activity
    Active,
    /// Disconnected and idle; counting down to sleep
    IdleAwaitingSleep,
    /// Low power requested; terminal for this wake cycle
    Sleeping,
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "Active"),
            Self::IdleAwaitingSleep => write!(f, "Idle (awaiting sleep)"),
            Self::Sleeping => write!(f, "Sleeping"),
        }
    }
}

/// Resolved position fix
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    /// Latitude in decimal degrees
    pub latitude: f64,
    /// Longitude in decimal degrees
    pub longitude: f64,
}

/// Raw acceleration in g
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Acceleration {
    /// X axis
    pub x: f32,
    /// Y axis
    pub y: f32,
    /// Z axis
    pub z: f32,
}

impl Acceleration {
    /// Euclidean norm of the vector
    #[must_use]
    pub fn norm(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// Result of one motion sample
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MotionEvent {
    /// Motion was detected (interrupt latched or threshold exceeded)
    pub detected: bool,
    /// Deviation from 1 g at rest
    pub magnitude: f32,
    /// Acceleration the magnitude was derived from
    pub acceleration: Acceleration,
}

/// Result of one battery sample
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BatteryReading {
    /// Raw ADC count
    pub raw_adc: u16,
    /// Battery voltage after the divider correction
    pub voltage: f32,
    /// Charge estimate, always within 0..=100
    pub percent: u8,
}

/// One telemetry report, serialized as the status characteristic payload
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TelemetrySample {
    /// Latitude in decimal degrees
    #[serde(rename = "lat")]
    pub latitude: f64,
    /// Longitude in decimal degrees
    #[serde(rename = "lng")]
    pub longitude: f64,
    /// X acceleration in g
    #[serde(rename = "acc_x")]
    pub accel_x: f32,
    /// Y acceleration in g
    #[serde(rename = "acc_y")]
    pub accel_y: f32,
    /// Z acceleration in g
    #[serde(rename = "acc_z")]
    pub accel_z: f32,
    /// Motion observed since the previous report
    pub motion: bool,
    /// Battery charge in percent
    #[serde(rename = "battery")]
    pub battery_percent: u8,
}

/// Optional hardware present on the board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareCapabilities {
    /// An audible buzzer is fitted
    pub has_buzzer: bool,
    /// A status LED is fitted
    pub has_led: bool,
}

impl Default for HardwareCapabilities {
    fn default() -> Self {
        Self {
            has_buzzer: false,
            has_led: true,
        }
    }
}

impl HardwareCapabilities {
    /// Whether any local alert output exists at all
    #[must_use]
    pub const fn can_alert(&self) -> bool {
        self.has_buzzer || self.has_led
    }
}

/// Descriptor of an indicator pattern; the indicator collaborator plays it out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertPattern {
    /// Number of on/off pulses
    pub pulses: u8,
    /// On time per pulse in milliseconds
    pub on_ms: u32,
    /// Off time between pulses in milliseconds
    pub off_ms: u32,
    /// Drive the buzzer as well as the LED
    pub audible: bool,
}

impl AlertPattern {
    /// Locate / alert: three 200 ms beeps
    pub const LOCATE: Self = Self::new(3, 200, 200, true);
    /// Configuration accepted: five rapid flashes
    pub const CONFIG_SAVED: Self = Self::new(5, 100, 100, false);
    /// Network joined: three quick flashes
    pub const NETWORK_JOINED: Self = Self::new(3, 50, 50, false);
    /// Low battery warning: five flashes
    pub const LOW_BATTERY: Self = Self::new(5, 100, 100, false);
    /// Button acknowledged: one half-second blink
    pub const BUTTON_ACK: Self = Self::new(1, 500, 0, false);

    /// Create a pattern
    #[must_use]
    pub const fn new(pulses: u8, on_ms: u32, off_ms: u32, audible: bool) -> Self {
        Self {
            pulses,
            on_ms,
            off_ms,
            audible,
        }
    }

    /// Single continuous buzzer tone
    #[must_use]
    pub const fn tone(duration_ms: u32) -> Self {
        Self::new(1, duration_ms, 0, true)
    }

    /// Total time the pattern takes to play
    #[must_use]
    pub const fn total_ms(&self) -> u64 {
        self.pulses as u64 * (self.on_ms as u64 + self.off_ms as u64)
    }
}

/// Sources armed before entering low power
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WakeSources {
    /// Accelerometer interrupt pin edge
    pub motion_pin: bool,
    /// Button pin edge
    pub button_pin: bool,
    /// Backup timer deadline
    pub timer_ms: Option<u64>,
}

/// ADC and voltage curve used to derive battery percentage
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatteryCalibration {
    /// ADC reference voltage
    pub reference_voltage: f32,
    /// Full-scale ADC count
    pub adc_max_value: f32,
    /// Voltage divider correction factor
    pub divider_multiplier: f32,
    /// Voltage mapped to 0 %
    pub min_voltage: f32,
    /// Voltage mapped to 100 %
    pub max_voltage: f32,
}

impl Default for BatteryCalibration {
    fn default() -> Self {
        Self {
            reference_voltage: 3.3,
            adc_max_value: 4095.0,
            divider_multiplier: 2.0,
            min_voltage: 3.3,
            max_voltage: 4.2,
        }
    }
}

/// How often status is pushed while a peer is connected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ReportCadence {
    /// Fixed interval regardless of configuration
    Fixed {
        /// Interval in milliseconds
        interval_ms: u64,
    },
    /// Follow `transmit_interval` from the device configuration
    ConfigDriven,
}

impl Default for ReportCadence {
    fn default() -> Self {
        Self::Fixed { interval_ms: 1000 }
    }
}

/// Board and firmware tuning for the runtime
///
/// Every field has a default, so a board profile can be supplied as partial JSON:
///
/// ```
/// use trackerd::RuntimeSettings;
///
/// let settings: RuntimeSettings =
///     serde_json::from_str(r#"{"inactivity_timeout_ms": 60000}"#).unwrap();
/// assert_eq!(settings.inactivity_timeout_ms, 60_000);
/// assert_eq!(settings.restart_delay_ms, 1000);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Idle time without connection or motion before sleeping
    pub inactivity_timeout_ms: u64,
    /// Idle time after which the controller reports `IdleAwaitingSleep`
    pub idle_grace_ms: u64,
    /// Status push cadence while connected
    pub report_cadence: ReportCadence,
    /// Battery sampling interval, independent of connection state
    pub battery_check_interval_ms: u64,
    /// Below this percentage a low battery warning is raised
    pub low_battery_percent: u8,
    /// Below this percentage the warning is raised at error level
    pub critical_battery_percent: u8,
    /// Delay between scheduling a restart and performing it
    pub restart_delay_ms: u64,
    /// Upper bound for joining a newly configured network
    pub wifi_connect_timeout_ms: u64,
    /// Backup timer wake source while sleeping
    pub wake_timer_ms: u64,
    /// Maximum link events drained per tick
    pub max_events_per_tick: usize,
    /// Battery curve
    pub battery: BatteryCalibration,
    /// Optional hardware
    pub capabilities: HardwareCapabilities,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            inactivity_timeout_ms: 300_000,
            idle_grace_ms: 30_000,
            report_cadence: ReportCadence::default(),
            battery_check_interval_ms: 60_000,
            low_battery_percent: 20,
            critical_battery_percent: 10,
            restart_delay_ms: 1000,
            wifi_connect_timeout_ms: 20_000,
            wake_timer_ms: 600_000,
            max_events_per_tick: 16,
            battery: BatteryCalibration::default(),
            capabilities: HardwareCapabilities::default(),
        }
    }
}
