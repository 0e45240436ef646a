use bytes::Bytes;
use std::fmt;
use uuid::Uuid;

use crate::{
    error::{Result, TrackerError},
    COMMAND_CHAR_UUID, CONFIG_CHAR_UUID, SERVICE_UUID, STATUS_CHAR_UUID,
};

/// GATT characteristics exposed by the tracker service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Characteristic {
    /// Configuration, read/write JSON
    Config,
    /// Telemetry status, read/notify JSON
    Status,
    /// Commands, write-only JSON
    Command,
}

impl Characteristic {
    /// All characteristics in registration order
    pub const ALL: [Self; 3] = [Self::Config, Self::Status, Self::Command];

    /// Stable UUID string
    #[must_use]
    pub const fn uuid_str(self) -> &'static str {
        match self {
            Self::Config => CONFIG_CHAR_UUID,
            Self::Status => STATUS_CHAR_UUID,
            Self::Command => COMMAND_CHAR_UUID,
        }
    }

    /// Parsed UUID
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::Link`] if the constant is not a valid UUID.
    pub fn uuid(self) -> Result<Uuid> {
        Uuid::parse_str(self.uuid_str())
            .map_err(|e| TrackerError::Link(format!("Invalid {self} characteristic UUID: {e}")))
    }

    /// Look up a characteristic by UUID
    #[must_use]
    pub fn from_uuid(uuid: &Uuid) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.uuid().is_ok_and(|u| &u == uuid))
    }

    /// Whether a peer may write this characteristic
    #[must_use]
    pub const fn is_writable(self) -> bool {
        matches!(self, Self::Config | Self::Command)
    }

    /// Whether this characteristic notifies subscribers
    #[must_use]
    pub const fn is_notifiable(self) -> bool {
        matches!(self, Self::Status)
    }
}

impl fmt::Display for Characteristic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config => write!(f, "config"),
            Self::Status => write!(f, "status"),
            Self::Command => write!(f, "command"),
        }
    }
}

/// Parsed service UUID
///
/// # Errors
///
/// Returns [`TrackerError::Link`] if the constant is not a valid UUID.
pub fn service_uuid() -> Result<Uuid> {
    Uuid::parse_str(SERVICE_UUID)
        .map_err(|e| TrackerError::Link(format!("Invalid service UUID: {e}")))
}

/// Events surfaced by the peripheral link, drained once per tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A peer connected
    Connected,
    /// The peer disconnected
    Disconnected,
    /// The peer wrote the config characteristic
    ConfigWrite(Bytes),
    /// The peer wrote the command characteristic
    CommandWrite(Bytes),
}

impl LinkEvent {
    /// Map a raw characteristic write onto an event
    ///
    /// Writes to characteristics that are not writable yield `None`.
    #[must_use]
    pub fn from_write(characteristic: Characteristic, value: Bytes) -> Option<Self> {
        match characteristic {
            Characteristic::Config => Some(Self::ConfigWrite(value)),
            Characteristic::Command => Some(Self::CommandWrite(value)),
            Characteristic::Status => None,
        }
    }
}

/// Peripheral side of the radio stack
///
/// Advertising, connection negotiation, MTU and encryption live behind this
/// trait. Writes serialized by the stack are queued and handed out one at a
/// time through [`PeripheralLink::poll_event`].
pub trait PeripheralLink {
    /// Start (or resume) advertising the tracker service
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::Link`] or [`TrackerError::HardwareUnavailable`]
    /// if the radio refused.
    fn start_advertising(&mut self) -> Result<()>;

    /// Next pending event, non-blocking
    fn poll_event(&mut self) -> Option<LinkEvent>;

    /// Replace the readable value of a characteristic
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::Link`] if the value could not be stored.
    fn set_value(&mut self, characteristic: Characteristic, value: &[u8]) -> Result<()>;

    /// Set the value and notify the subscribed peer
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::Link`] if the notification could not be queued.
    fn notify(&mut self, characteristic: Characteristic, value: &[u8]) -> Result<()>;

    /// Push out any pending write acknowledgments
    fn flush(&mut self) {}
}
