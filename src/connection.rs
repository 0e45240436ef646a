use std::collections::VecDeque;
use tracing::{error, info};

use crate::{ble::PeripheralLink, types::ConnectionState};

/// A connection edge observed on the link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionTransition {
    /// Disconnected -> Connected
    Connected,
    /// Connected -> Disconnected
    Disconnected,
}

/// Tracks peer connection state and latches transitions for consumers
///
/// Every edge is queued once and removed when read, so a burst such as
/// Connected -> Disconnected -> Connected inside one tick is reported as two
/// transitions, neither duplicated nor dropped.
#[derive(Debug, Default)]
pub struct ConnectionTracker {
    state: ConnectionState,
    pending: VecDeque<ConnectionTransition>,
    advertising_pending: bool,
}

impl ConnectionTracker {
    /// Create a tracker in the disconnected state
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether a peer is connected
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    /// Link reported a connection
    pub fn on_connect(&mut self) {
        if self.state.is_connected() {
            return;
        }
        info!("BLE client connected");
        self.state = ConnectionState::Connected;
        self.advertising_pending = false;
        self.pending.push_back(ConnectionTransition::Connected);
    }

    /// Link reported a disconnection; advertising resumes immediately
    pub fn on_disconnect<L: PeripheralLink + ?Sized>(&mut self, link: &mut L) {
        if !self.state.is_connected() {
            return;
        }
        info!("BLE client disconnected");
        self.state = ConnectionState::Disconnected;
        self.pending.push_back(ConnectionTransition::Disconnected);
        self.resume_advertising(link);
    }

    /// Request advertising, leaving a retry pending if the link refuses
    pub fn resume_advertising<L: PeripheralLink + ?Sized>(&mut self, link: &mut L) {
        match link.start_advertising() {
            Ok(()) => {
                self.advertising_pending = false;
                info!("Advertising started");
            }
            Err(e) => {
                self.advertising_pending = true;
                error!("Failed to start advertising, will retry: {}", e);
            }
        }
    }

    /// Retry advertising if a previous attempt failed while disconnected
    pub fn retry_advertising<L: PeripheralLink + ?Sized>(&mut self, link: &mut L) {
        if self.advertising_pending && !self.state.is_connected() {
            self.resume_advertising(link);
        }
    }

    /// Whether an advertising retry is outstanding
    #[must_use]
    pub const fn advertising_pending(&self) -> bool {
        self.advertising_pending
    }

    /// Consume one pending Disconnected -> Connected transition
    pub fn transitioned_to_connected(&mut self) -> bool {
        self.take(ConnectionTransition::Connected)
    }

    /// Consume one pending Connected -> Disconnected transition
    pub fn transitioned_to_disconnected(&mut self) -> bool {
        self.take(ConnectionTransition::Disconnected)
    }

    /// Consume all pending transitions in the order they happened
    pub fn drain_transitions(&mut self) -> Vec<ConnectionTransition> {
        self.pending.drain(..).collect()
    }

    fn take(&mut self, kind: ConnectionTransition) -> bool {
        if let Some(index) = self.pending.iter().position(|t| *t == kind) {
            self.pending.remove(index);
            true
        } else {
            false
        }
    }
}
