//! Session state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Connection state of the platform session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Connecting, or waiting for the platform to report readiness.
    Initializing,
    /// The platform issued an authentication challenge.
    AwaitingAuth,
    /// Send/fetch capabilities are usable.
    Ready,
    /// Connection lost or never established; `connect()` may recover.
    Disconnected,
    /// Unrecoverable. Requires an external restart.
    Fatal,
}

impl SessionState {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: SessionState) -> bool {
        use SessionState::*;

        matches!(
            (self, target),
            // From Initializing
            (Initializing, AwaitingAuth) | (Initializing, Ready) |
            (Initializing, Disconnected) | (Initializing, Fatal) |
            // From AwaitingAuth
            (AwaitingAuth, Ready) | (AwaitingAuth, Disconnected) |
            (AwaitingAuth, Fatal) | (AwaitingAuth, Initializing) |
            // From Ready
            (Ready, Disconnected) | (Ready, Initializing) | (Ready, Fatal) |
            // From Disconnected (reconnect, or the platform recovered on its own)
            (Disconnected, Initializing) | (Disconnected, Ready) | (Disconnected, Fatal)
        )
    }

    /// Fatal is the only terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Fatal)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Initializing => "initializing",
            Self::AwaitingAuth => "awaiting_auth",
            Self::Ready => "ready",
            Self::Disconnected => "disconnected",
            Self::Fatal => "fatal",
        };
        write!(f, "{s}")
    }
}

/// Lifecycle event reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Pairing/authentication challenge issued (e.g. a QR code).
    AuthChallenge { code: Option<String> },
    Authenticated,
    Ready { user: Option<String> },
    AuthFailure { reason: String },
    Disconnected { reason: String },
}

/// The platform session record. Mutated only by `SessionManager`.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub state: SessionState,
    /// Failed attempts in the most recent connect cycle.
    pub retry_count: u32,
    pub last_error: Option<String>,
    /// When the current state was entered.
    pub since: DateTime<Utc>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: SessionState::Initializing,
            retry_count: 0,
            last_error: None,
            since: Utc::now(),
        }
    }

    /// Transition to a new state.
    pub fn transition_to(&mut self, new_state: SessionState) -> Result<(), String> {
        if !self.state.can_transition_to(new_state) {
            return Err(format!(
                "Cannot transition from {} to {}",
                self.state, new_state
            ));
        }
        self.state = new_state;
        self.since = Utc::now();
        Ok(())
    }
}
