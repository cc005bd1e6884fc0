//! Session lifecycle.
//!
//! ```text
//! Disconnected → Connecting → Authenticating → Ready → Draining → Disconnected
//!                    │              │            │
//!                    └──────────────┴────────────┴──────────────→ Disconnected
//! ```
//!
//! A session only moves forward. Reconnecting means building a new session,
//! which starts over from `Disconnected`.

use crate::error::{RconError, Result};

/// Lifecycle state of one physical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No connection.
    #[default]
    Disconnected,
    /// Opening the socket (and TLS, when enabled).
    Connecting,
    /// Socket open, login sent, waiting for the token.
    Authenticating,
    /// Logged in; commands may be sent.
    Ready,
    /// Shutting down; outstanding requests are being failed.
    Draining,
}

impl SessionState {
    /// Validates a state transition.
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;

        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Authenticating)
                | (Connecting, Disconnected)
                | (Authenticating, Ready)
                | (Authenticating, Disconnected)
                | (Ready, Draining)
                | (Ready, Disconnected)
                | (Draining, Disconnected)
                | (Disconnected, Disconnected)
        )
    }

    /// Attempts to transition to a new state.
    pub fn transition_to(&mut self, next: SessionState) -> Result<()> {
        if self.can_transition_to(next) {
            *self = next;
            Ok(())
        } else {
            Err(RconError::InvalidState {
                from: *self,
                to: next,
            })
        }
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        matches!(self, SessionState::Ready)
    }

    /// States in which frames may be written (login happens while authenticating).
    #[inline]
    pub fn can_write(&self) -> bool {
        matches!(self, SessionState::Authenticating | SessionState::Ready)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Authenticating => "authenticating",
            SessionState::Ready => "ready",
            SessionState::Draining => "draining",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_moves_forward() {
        let mut state = SessionState::default();
        for next in [
            SessionState::Connecting,
            SessionState::Authenticating,
            SessionState::Ready,
            SessionState::Draining,
            SessionState::Disconnected,
        ] {
            state.transition_to(next).unwrap();
        }
        assert_eq!(state, SessionState::Disconnected);
    }

    #[test]
    fn never_returns_to_connecting_without_disconnecting() {
        for from in [
            SessionState::Authenticating,
            SessionState::Ready,
            SessionState::Draining,
        ] {
            let mut state = from;
            let err = state.transition_to(SessionState::Connecting).unwrap_err();
            assert!(matches!(err, RconError::InvalidState { to: SessionState::Connecting, .. }));
            assert_eq!(state, from);
        }
    }

    #[test]
    fn ready_cannot_be_skipped_to() {
        assert!(!SessionState::Connecting.can_transition_to(SessionState::Ready));
        assert!(!SessionState::Disconnected.can_transition_to(SessionState::Ready));
        assert!(!SessionState::Draining.can_transition_to(SessionState::Ready));
    }

    #[test]
    fn failures_fall_back_to_disconnected() {
        for from in [
            SessionState::Connecting,
            SessionState::Authenticating,
            SessionState::Ready,
            SessionState::Draining,
        ] {
            assert!(from.can_transition_to(SessionState::Disconnected));
        }
    }
}
