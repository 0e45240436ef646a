//! Board collaborators the runtime drives but does not implement.

use std::time::Instant;
use tracing::{info, warn};

use crate::{
    error::Result,
    types::{AlertPattern, WakeSources},
};

/// Monotonic millisecond clock
pub trait Clock {
    /// Milliseconds since boot
    fn now_ms(&self) -> u64;
}

/// Clock backed by [`std::time::Instant`]
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    boot: Instant,
}

impl SystemClock {
    /// Start counting from now
    #[must_use]
    pub fn new() -> Self {
        Self {
            boot: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        u64::try_from(self.boot.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// LED and buzzer outputs
///
/// Patterns are fire-and-forget; implementations play them out without
/// blocking the caller.
pub trait Indicator {
    /// Drive the status LED
    fn set_led(&mut self, on: bool);

    /// Play a pattern
    fn play(&mut self, pattern: AlertPattern);
}

/// Restart and low-power control
pub trait SystemControl {
    /// Reboot the device; the runtime instance ends here
    fn restart(&mut self);

    /// Enter low power with the given wake sources armed; the runtime instance ends here
    fn enter_low_power(&mut self, wake: WakeSources);
}

/// Station-mode network interface used for the backend uplink
pub trait NetworkLink {
    /// Drop the current association
    fn disconnect(&mut self);

    /// Begin joining a network; completion is observed through `is_connected`
    ///
    /// # Errors
    ///
    /// Returns [`crate::TrackerError::HardwareUnavailable`] if the radio refused.
    fn begin(&mut self, ssid: &str, password: &str) -> Result<()>;

    /// Whether the interface is associated and has an address
    fn is_connected(&self) -> bool;
}

/// Edge-latched user inputs
pub trait UserInput {
    /// Whether the button was pressed since the previous call; clears the latch
    fn take_button_press(&mut self) -> bool;
}

/// Progress of a network join
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinStatus {
    /// Still waiting
    Pending,
    /// Joined
    Joined,
    /// Gave up
    TimedOut,
}

/// LED toggle period while a join is in flight
pub const JOIN_BLINK_MS: u64 = 500;

/// A bounded, non-blocking attempt to join a network
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinAttempt {
    started_at: u64,
    deadline: u64,
}

impl JoinAttempt {
    /// Disconnect and start joining; `None` if the radio refused
    pub fn start<N: NetworkLink + ?Sized>(
        network: &mut N,
        ssid: &str,
        password: &str,
        now: u64,
        timeout_ms: u64,
    ) -> Option<Self> {
        network.disconnect();
        info!(ssid, "Attempting connection with new network credentials");
        match network.begin(ssid, password) {
            Ok(()) => Some(Self {
                started_at: now,
                deadline: now.saturating_add(timeout_ms),
            }),
            Err(e) => {
                warn!("Network join could not start: {}", e);
                None
            }
        }
    }

    /// LED level for the join blink: on for the first half of each period
    #[must_use]
    pub const fn blink_on(&self, now: u64) -> bool {
        (now.saturating_sub(self.started_at) / JOIN_BLINK_MS) % 2 == 0
    }

    /// Check progress once
    pub fn poll<N: NetworkLink + ?Sized>(&self, network: &N, now: u64) -> JoinStatus {
        if network.is_connected() {
            info!(
                elapsed_ms = now.saturating_sub(self.started_at),
                "Network connected"
            );
            JoinStatus::Joined
        } else if now >= self.deadline {
            warn!("Network connection failed: timed out");
            JoinStatus::TimedOut
        } else {
            JoinStatus::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimNetwork;

    #[test]
    fn test_join_succeeds_before_deadline() {
        let mut network = SimNetwork::new();
        network.join_after_polls(2);
        let attempt = JoinAttempt::start(&mut network, "HomeNet", "pw", 1_000, 20_000).unwrap();

        assert_eq!(network.disconnects(), 1);
        assert_eq!(attempt.poll(&network, 1_500), JoinStatus::Pending);
        assert_eq!(attempt.poll(&network, 2_000), JoinStatus::Joined);
    }

    #[test]
    fn test_join_times_out() {
        let mut network = SimNetwork::new();
        let attempt = JoinAttempt::start(&mut network, "HomeNet", "pw", 0, 20_000).unwrap();
        assert_eq!(attempt.poll(&network, 19_999), JoinStatus::Pending);
        assert_eq!(attempt.poll(&network, 20_000), JoinStatus::TimedOut);
    }

    #[test]
    fn test_blink_alternates_every_period() {
        let mut network = SimNetwork::new();
        let attempt = JoinAttempt::start(&mut network, "HomeNet", "pw", 1_000, 20_000).unwrap();
        assert!(attempt.blink_on(1_000));
        assert!(attempt.blink_on(1_499));
        assert!(!attempt.blink_on(1_500));
        assert!(attempt.blink_on(2_000));
    }

    #[test]
    fn test_join_refused() {
        let mut network = SimNetwork::new();
        network.set_available(false);
        assert!(JoinAttempt::start(&mut network, "HomeNet", "pw", 0, 20_000).is_none());
    }

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let first = clock.now_ms();
        assert!(clock.now_ms() >= first);
    }
}
