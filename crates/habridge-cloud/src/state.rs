//! Connection state machine, independent of the socket transport

use crate::backoff::Backoff;
use crate::config::BackoffConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Reconnect budget exhausted; terminal until restarted
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The relay closed the socket
    ServerInitiated,
    /// We closed the socket
    ClientInitiated,
    /// Ping timeout or transport close; the transport retries on its own
    Transport(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectAction {
    None,
    Schedule(Duration),
    GiveUp,
}

/// Tracks the session lifecycle and decides when to reconnect
#[derive(Debug)]
pub struct ConnectionStateMachine {
    state: ConnectionState,
    backoff: Backoff,
    max_attempts: Option<u32>,
    attempts: u32,
}

impl ConnectionStateMachine {
    pub fn new(backoff: BackoffConfig, max_attempts: Option<u32>) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            backoff: Backoff::new(backoff),
            max_attempts,
            attempts: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Failed reconnects since the last successful connect
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// A connect attempt starts. Leaving `Failed` restores the full budget.
    pub fn on_connecting(&mut self) {
        match self.state {
            ConnectionState::Connected => {}
            ConnectionState::Failed => {
                self.attempts = 0;
                self.backoff.reset();
                self.state = ConnectionState::Connecting;
            }
            _ => self.state = ConnectionState::Connecting,
        }
    }

    pub fn on_connect(&mut self) -> ReconnectAction {
        info!("connected to relay");
        self.backoff.reset();
        self.attempts = 0;
        self.state = ConnectionState::Connected;
        ReconnectAction::None
    }

    pub fn on_disconnect(&mut self, reason: DisconnectReason) -> ReconnectAction {
        match reason {
            DisconnectReason::ServerInitiated => {
                warn!("relay closed the connection");
                self.state = ConnectionState::Disconnected;
                self.schedule_reconnect()
            }
            DisconnectReason::ClientInitiated => {
                info!("disconnected from relay");
                self.state = ConnectionState::Disconnected;
                ReconnectAction::None
            }
            DisconnectReason::Transport(why) => {
                info!("transport disconnected: {}", why);
                self.state = ConnectionState::Disconnected;
                ReconnectAction::None
            }
        }
    }

    /// Errors while connected are logged only; otherwise they count as a
    /// failed attempt
    pub fn on_error(&mut self, error: &str) -> ReconnectAction {
        if self.state == ConnectionState::Connected {
            warn!("relay error while connected: {}", error);
            return ReconnectAction::None;
        }
        warn!("relay connection error: {}", error);
        self.schedule_reconnect()
    }

    fn schedule_reconnect(&mut self) -> ReconnectAction {
        if self.state == ConnectionState::Failed {
            return ReconnectAction::GiveUp;
        }
        if self.max_attempts.is_some_and(|max| self.attempts >= max) {
            warn!("giving up after {} reconnect attempts", self.attempts);
            self.state = ConnectionState::Failed;
            return ReconnectAction::GiveUp;
        }
        self.attempts += 1;
        self.state = ConnectionState::Reconnecting;
        let delay = self.backoff.next();
        debug!("reconnect attempt {} in {:?}", self.attempts, delay);
        ReconnectAction::Schedule(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine(max: Option<u32>) -> ConnectionStateMachine {
        ConnectionStateMachine::new(
            BackoffConfig {
                jitter: 0.0,
                ..BackoffConfig::default()
            },
            max,
        )
    }

    #[test]
    fn test_connect_cycle() {
        let mut m = machine(None);
        assert_eq!(m.state(), ConnectionState::Disconnected);
        m.on_connecting();
        assert_eq!(m.state(), ConnectionState::Connecting);
        assert_eq!(m.on_connect(), ReconnectAction::None);
        assert_eq!(m.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_server_disconnect_backs_off() {
        let mut m = machine(None);
        m.on_connect();
        assert_eq!(
            m.on_disconnect(DisconnectReason::ServerInitiated),
            ReconnectAction::Schedule(Duration::from_secs(2))
        );
        assert_eq!(m.state(), ConnectionState::Reconnecting);
        assert_eq!(
            m.on_error("refused"),
            ReconnectAction::Schedule(Duration::from_secs(4))
        );
        m.on_connect();
        assert_eq!(
            m.on_disconnect(DisconnectReason::ServerInitiated),
            ReconnectAction::Schedule(Duration::from_secs(2))
        );
    }

    #[test]
    fn test_other_disconnects_do_not_schedule() {
        let mut m = machine(None);
        m.on_connect();
        assert_eq!(
            m.on_disconnect(DisconnectReason::Transport("ping timeout".into())),
            ReconnectAction::None
        );
        assert_eq!(m.state(), ConnectionState::Disconnected);
        m.on_connect();
        assert_eq!(
            m.on_disconnect(DisconnectReason::ClientInitiated),
            ReconnectAction::None
        );
    }

    #[test]
    fn test_error_while_connected_is_logged_only() {
        let mut m = machine(None);
        m.on_connect();
        assert_eq!(m.on_error("bad packet"), ReconnectAction::None);
        assert_eq!(m.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_gives_up_after_max_attempts() {
        let mut m = machine(Some(2));
        m.on_connecting();
        assert!(matches!(m.on_error("x"), ReconnectAction::Schedule(_)));
        assert!(matches!(m.on_error("x"), ReconnectAction::Schedule(_)));
        assert_eq!(m.on_error("x"), ReconnectAction::GiveUp);
        assert_eq!(m.state(), ConnectionState::Failed);
        assert_eq!(m.on_error("x"), ReconnectAction::GiveUp);

        m.on_connecting();
        assert_eq!(m.attempts(), 0);
        assert_eq!(
            m.on_error("x"),
            ReconnectAction::Schedule(Duration::from_secs(2))
        );
    }

    #[test]
    fn test_unlimited_attempts_by_default() {
        let mut m = machine(None);
        for _ in 0..100 {
            assert!(matches!(m.on_error("x"), ReconnectAction::Schedule(_)));
        }
        assert_eq!(m.attempts(), 100);
    }
}
