use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Logical clock strategy for a session.
///
/// Both peers must use the same mode; modes are never mixed within one
/// session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ClockMode {
    /// One scalar clock shared by all players: `max(local, remote) + 1`.
    #[default]
    Lamport,
    /// One independent counter per player.
    PerPlayer,
}

/// Tunables for one game session.
///
/// Durations are stored in milliseconds so the config serializes the same
/// way everywhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub clock_mode: ClockMode,
    /// Capacity of the action log ring.
    pub log_capacity: usize,
    /// Period between outbound pings while the connection is open.
    pub heartbeat_interval_ms: u64,
    /// Peer inactivity after which presence degrades to `Idle`.
    pub idle_threshold_ms: u64,
    /// Peer inactivity after which presence degrades to `Away`.
    pub away_threshold_ms: u64,
    /// Minimum spacing between reconnect attempts.
    pub reconnect_debounce_ms: u64,
    /// Reconnect attempts before the session gives up and closes.
    pub max_reconnect_attempts: u32,
    /// Resync requests allowed per `resync_window_ms`.
    pub resync_max_attempts: u32,
    pub resync_window_ms: u64,
    /// Undrained events kept by the session; the oldest are dropped first.
    pub event_buffer_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            clock_mode: ClockMode::Lamport,
            log_capacity: 256,
            heartbeat_interval_ms: 5_000,
            idle_threshold_ms: 30_000,
            away_threshold_ms: 120_000,
            reconnect_debounce_ms: 3_000,
            max_reconnect_attempts: 5,
            resync_max_attempts: 3,
            resync_window_ms: 30_000,
            event_buffer_capacity: 1_024,
        }
    }
}

impl SessionConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn idle_threshold(&self) -> Duration {
        Duration::from_millis(self.idle_threshold_ms)
    }

    pub fn away_threshold(&self) -> Duration {
        Duration::from_millis(self.away_threshold_ms)
    }

    pub fn reconnect_debounce(&self) -> Duration {
        Duration::from_millis(self.reconnect_debounce_ms)
    }

    pub fn resync_window(&self) -> Duration {
        Duration::from_millis(self.resync_window_ms)
    }
}
