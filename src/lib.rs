#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

//! # trackerd 📍
//!
//! Device runtime controller for a battery-powered BLE location tracker.
//!
//! The tracker exposes one GATT service with three JSON characteristics:
//!
//! - **Config** (read/write): network credentials, backend identity and tuning.
//!   Writes are validated field by field and persisted as a single record.
//! - **Status** (read/notify): position, acceleration, motion and battery,
//!   pushed to the connected peer on a fixed cadence.
//! - **Command** (write): `reset`, `factory_reset`, `locate` and `buzzer`.
//!
//! Between connections the runtime watches for motion and button presses and
//! puts the device into low power once it has been idle long enough.
//!
//! ## Architecture
//!
//! Hardware lives behind small collaborator traits ([`ble::PeripheralLink`],
//! [`config::ConfigStorage`], [`telemetry::MotionSensor`],
//! [`platform::SystemControl`], ...). [`DeviceRuntime`] owns all mutable state
//! and drives the collaborators from one cooperative loop, so no locking is
//! needed anywhere in the core.
//!
//! ## Security
//!
//! The config characteristic accepts `wifi_password` and `api_key` from any
//! connected peer without pairing or bonding. Secrets are never echoed back
//! over BLE and never logged.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use trackerd::{sim::SimBoard, DeviceRuntime, RuntimeSettings};
//!
//! #[tokio::main]
//! async fn main() {
//!     let board = SimBoard::new();
//!     let mut runtime =
//!         DeviceRuntime::boot(RuntimeSettings::default(), board.hardware_with_system_clock());
//!
//!     // Runs until the device restarts or goes to sleep
//!     let outcome = runtime.run(Duration::from_millis(100)).await;
//!     println!("runtime ended: {outcome:?}");
//! }
//! ```

/// Peripheral link and GATT characteristics
pub mod ble;
/// Device configuration and persistence
pub mod config;
/// Peer connection tracking
pub mod connection;
/// The device runtime loop
pub mod device;
/// Error types and handling
pub mod error;
/// Clock, indicator, system and network collaborators
pub mod platform;
/// Sleep and reporting cadence
pub mod power;
/// Config, status and command payloads
pub mod protocol;
/// In-memory collaborators for host runs and tests
pub mod sim;
/// Sensor sampling
pub mod telemetry;
/// Type definitions and data structures
pub mod types;

// Re-export the main types for convenient usage
pub use config::{ConfigStore, DeviceConfig, PartialConfigUpdate};
pub use device::{DeviceRuntime, Hardware, TickOutcome};
pub use error::{Result, TrackerError};
pub use protocol::{Command, Effect, ProtocolService};
pub use types::{
    AlertPattern, BatteryCalibration, ConnectionState, HardwareCapabilities, PowerState,
    ReportCadence, RuntimeSettings, TelemetrySample, WakeSources,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Firmware version reported in the config view
pub const FIRMWARE_VERSION: &str = "1.0.0";

/// Name the tracker advertises under
pub const DEVICE_NAME: &str = "FIND-Tracker";

/// Hardware model string
pub const DEVICE_MODEL: &str = "ESP32-FIND-TRACKER";

/// Tracker GATT service UUID
pub const SERVICE_UUID: &str = "4fafc201-1fb5-459e-8fcc-c5c9c331914b";

/// Config characteristic UUID (read/write)
pub const CONFIG_CHAR_UUID: &str = "beb5483e-36e1-4688-b7f5-ea07361b26a8";

/// Status characteristic UUID (read/notify)
pub const STATUS_CHAR_UUID: &str = "5ac659d8-2583-4add-b315-902e9aed475d";

/// Command characteristic UUID (write)
pub const COMMAND_CHAR_UUID: &str = "8dd6ce17-8a6b-4cb7-9cab-16edc0578119";
