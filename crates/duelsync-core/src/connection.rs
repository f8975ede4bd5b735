//! Per-peer connection lifecycle and presence.
//!
//! `Connecting -> Open -> Disconnected -> Reconnecting -> (Open | Closed)`,
//! plus terminal `Closed`. Timers are plain deadlines checked by
//! [`ConnectionSession::poll_timers`]; closing clears all of them, so nothing
//! can fire after `Closed`.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::SessionConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Disconnected,
    Reconnecting,
    Closed,
}

/// Derived peer presence. Never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceLevel {
    Offline,
    Away,
    Idle,
    Online,
}

/// Timer work due at a given instant.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TimerEvents {
    pub send_ping: bool,
    pub reconnect_due: bool,
}

#[derive(Debug)]
pub struct ConnectionSession {
    state: ConnectionState,
    peer_online: bool,
    last_activity_at: Option<Instant>,
    last_heartbeat_at: Option<Instant>,
    next_heartbeat_at: Option<Instant>,
    reconnect_planned_at: Option<Instant>,
    reconnect_attempts: u32,

    heartbeat_interval: Duration,
    reconnect_debounce: Duration,
    idle_threshold: Duration,
    away_threshold: Duration,
    max_reconnect_attempts: u32,
}

impl ConnectionSession {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            state: ConnectionState::Connecting,
            peer_online: false,
            last_activity_at: None,
            last_heartbeat_at: None,
            next_heartbeat_at: None,
            reconnect_planned_at: None,
            reconnect_attempts: 0,
            heartbeat_interval: config.heartbeat_interval(),
            reconnect_debounce: config.reconnect_debounce(),
            idle_threshold: config.idle_threshold(),
            away_threshold: config.away_threshold(),
            max_reconnect_attempts: config.max_reconnect_attempts,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }

    pub fn peer_online(&self) -> bool {
        self.peer_online
    }

    pub fn last_activity_at(&self) -> Option<Instant> {
        self.last_activity_at
    }

    pub fn last_heartbeat_at(&self) -> Option<Instant> {
        self.last_heartbeat_at
    }

    pub fn reconnect_planned_at(&self) -> Option<Instant> {
        self.reconnect_planned_at
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    /// Transport became ready. Starts the heartbeat.
    ///
    /// Returns `false` (and changes nothing) if the session is closed or
    /// already open.
    pub fn open(&mut self, now: Instant) -> bool {
        match self.state {
            ConnectionState::Connecting
            | ConnectionState::Reconnecting
            | ConnectionState::Disconnected => {}
            ConnectionState::Open | ConnectionState::Closed => {
                warn!(state = ?self.state, "Ignoring transport open");
                return false;
            }
        }
        info!(from = ?self.state, "Connection open");
        self.state = ConnectionState::Open;
        self.peer_online = true;
        self.last_activity_at = Some(now);
        self.next_heartbeat_at = Some(now + self.heartbeat_interval);
        self.reconnect_planned_at = None;
        self.reconnect_attempts = 0;
        true
    }

    /// Transport closed. Stops the heartbeat and plans a debounced reconnect.
    pub fn disconnect(&mut self, now: Instant) -> bool {
        match self.state {
            ConnectionState::Open
            | ConnectionState::Connecting
            | ConnectionState::Reconnecting => {}
            ConnectionState::Disconnected => {
                debug!("Already disconnected, keeping reconnect plan");
                return false;
            }
            ConnectionState::Closed => {
                warn!("Ignoring transport close on closed session");
                return false;
            }
        }
        info!(from = ?self.state, "Connection lost");
        self.state = ConnectionState::Disconnected;
        self.peer_online = false;
        self.next_heartbeat_at = None;
        if self.reconnect_planned_at.is_none() {
            self.reconnect_planned_at = Some(now + self.reconnect_debounce);
        }
        true
    }

    /// External renegotiation started.
    ///
    /// Closes the session instead once the attempt budget is exhausted.
    pub fn begin_reconnect(&mut self, now: Instant) -> bool {
        if self.state != ConnectionState::Disconnected {
            warn!(state = ?self.state, "Reconnect requested outside Disconnected");
            return false;
        }
        if let Some(planned) = self.reconnect_planned_at {
            if now < planned {
                debug!("Reconnect attempt debounced");
                return false;
            }
        }
        if self.reconnect_attempts >= self.max_reconnect_attempts {
            warn!(
                attempts = self.reconnect_attempts,
                "Reconnect budget exhausted, closing"
            );
            self.close();
            return false;
        }
        self.reconnect_attempts += 1;
        self.reconnect_planned_at = None;
        self.state = ConnectionState::Reconnecting;
        info!(attempt = self.reconnect_attempts, "Reconnecting");
        true
    }

    /// Terminal. Clears every deadline.
    pub fn close(&mut self) {
        if self.state != ConnectionState::Closed {
            info!(from = ?self.state, "Connection closed");
        }
        self.state = ConnectionState::Closed;
        self.peer_online = false;
        self.next_heartbeat_at = None;
        self.reconnect_planned_at = None;
    }

    /// Any inbound traffic (`ping`, `pong` or otherwise) proves the peer is
    /// alive.
    pub fn record_activity(&mut self, now: Instant) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.peer_online = true;
        self.last_activity_at = Some(now);
    }

    pub fn presence(&self, now: Instant) -> PresenceLevel {
        if !self.peer_online {
            return PresenceLevel::Offline;
        }
        let idle = self
            .last_activity_at
            .map(|at| now.saturating_duration_since(at))
            .unwrap_or(Duration::MAX);
        if idle >= self.away_threshold {
            PresenceLevel::Away
        } else if idle >= self.idle_threshold {
            PresenceLevel::Idle
        } else {
            PresenceLevel::Online
        }
    }

    /// Fire due deadlines. Each deadline fires at most once per arming.
    pub fn poll_timers(&mut self, now: Instant) -> TimerEvents {
        let mut events = TimerEvents::default();
        match self.state {
            ConnectionState::Open => {
                if self.next_heartbeat_at.is_some_and(|at| now >= at) {
                    events.send_ping = true;
                    self.last_heartbeat_at = Some(now);
                    self.next_heartbeat_at = Some(now + self.heartbeat_interval);
                }
            }
            ConnectionState::Disconnected => {
                if self.reconnect_planned_at.is_some_and(|at| now >= at) {
                    self.reconnect_planned_at = None;
                    events.reconnect_due = true;
                }
            }
            _ => {}
        }
        events
    }

    /// Next instant at which `poll_timers` has work, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        match self.state {
            ConnectionState::Open => self.next_heartbeat_at,
            ConnectionState::Disconnected => self.reconnect_planned_at,
            _ => None,
        }
    }
}
