//! Connection state machine and reconnect backoff.
//!
//! ```text
//! Disconnected ──► Connecting ──► Connected ◄──► Receiving
//!      ▲               │              │              │
//!      └───────────────┴──── drop ────┴──────────────┘
//! ```

use crate::error::SyncError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Transient: an inbound operation is being processed.
    Receiving,
}

impl ConnectionState {
    pub fn can_transition_to(self, to: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, to),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connected, Receiving)
                | (Receiving, Connected)
                | (Connecting | Connected | Receiving, Disconnected)
        )
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    state: ConnectionState,
}

impl Default for ConnectionMachine {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
        }
    }
}

impl ConnectionMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn transition(&mut self, to: ConnectionState) -> Result<(), SyncError> {
        if !self.state.can_transition_to(to) {
            return Err(SyncError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        log::trace!("connection {:?} -> {:?}", self.state, to);
        self.state = to;
        Ok(())
    }

    /// Drop to `Disconnected` from any state.
    pub fn drop_connection(&mut self) {
        self.state = ConnectionState::Disconnected;
    }
}

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

/// Exponential backoff: `min(base * 2^attempt, max)`, for at most
/// `max_attempts` attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
    pub max_attempts: u32,
}

impl Backoff {
    /// Delay before attempt number `attempt` (0-based), or `None` once the
    /// attempt budget is spent.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        Some(self.base.saturating_mul(factor).min(self.max))
    }
}

/// How a reconnect sequence ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconnectOutcome {
    /// Connected again after `attempts` tries.
    Reconnected { attempts: u32, resumed: bool },
    /// The attempt budget ran out; persisted identity and state were cleared
    /// and the client must be reloaded.
    ColdReset { attempts: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let b = Backoff {
            base: Duration::from_millis(100),
            max: Duration::from_millis(1000),
            max_attempts: 6,
        };
        let delays: Vec<_> = (0..6).map(|a| b.delay(a).unwrap().as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1000, 1000]);
        assert_eq!(b.delay(6), None);
    }

    #[test]
    fn backoff_does_not_overflow() {
        let b = Backoff {
            base: Duration::from_secs(1),
            max: Duration::from_secs(60),
            max_attempts: 100,
        };
        assert_eq!(b.delay(64), Some(Duration::from_secs(60)));
    }

    #[test]
    fn happy_path_transitions() {
        let mut m = ConnectionMachine::new();
        m.transition(ConnectionState::Connecting).unwrap();
        m.transition(ConnectionState::Connected).unwrap();
        m.transition(ConnectionState::Receiving).unwrap();
        m.transition(ConnectionState::Connected).unwrap();
        m.transition(ConnectionState::Disconnected).unwrap();
        assert_eq!(m.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn skipping_connecting_is_refused() {
        let mut m = ConnectionMachine::new();
        let err = m.transition(ConnectionState::Receiving).unwrap_err();
        assert!(matches!(
            err,
            SyncError::InvalidTransition {
                from: ConnectionState::Disconnected,
                to: ConnectionState::Receiving
            }
        ));
    }
}
