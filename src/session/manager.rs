//! Session manager: owns the platform connection lifecycle.
//!
//! All state changes go through [`SessionManager`]. Lifecycle events from the
//! platform arrive via [`SessionManager::apply`]; connect attempts are
//! serialized by a reconnect lock so a live `connect()` and the autonomous
//! recovery in [`SessionManager::handle_error`] never overlap.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::error::{PlatformError, PlatformErrorKind, SessionError};
use crate::events::{BusEvent, ErrorCode, EventBus, ServiceStatus};
use crate::platform::{PlatformClient, SentMessage};
use crate::session::state::{Session, SessionEvent, SessionState};

/// What `handle_error` did with an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// Surfaced only; the error does not warrant a reconnect.
    NotCritical,
    /// The session is already fatal; nothing attempted.
    AlreadyFatal,
    /// Another connect attempt is outstanding; skipped.
    InProgress,
    /// The autonomous reconnect succeeded.
    Reconnected,
    /// The autonomous reconnect failed and the session is now fatal.
    Fatal,
}

pub struct SessionManager {
    client: Arc<dyn PlatformClient>,
    config: SessionConfig,
    bus: EventBus,
    session: Mutex<Session>,
    reconnect_lock: tokio::sync::Mutex<()>,
}

impl SessionManager {
    pub fn new(client: Arc<dyn PlatformClient>, config: SessionConfig, bus: EventBus) -> Self {
        Self {
            client,
            config,
            bus,
            session: Mutex::new(Session::new()),
            reconnect_lock: tokio::sync::Mutex::new(()),
        }
    }

    // ── Queries ─────────────────────────────────────────────────────

    /// Copy of the current session record.
    pub fn snapshot(&self) -> Session {
        self.lock().clone()
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn is_ready(&self) -> bool {
        self.state() == SessionState::Ready
    }

    /// Name of the underlying platform.
    pub fn platform_name(&self) -> &str {
        self.client.name()
    }

    /// The platform capability, available only while `Ready`.
    pub fn ready_client(&self) -> Result<Arc<dyn PlatformClient>, SessionError> {
        match self.state() {
            SessionState::Ready => Ok(Arc::clone(&self.client)),
            state => Err(SessionError::NotReady { state }),
        }
    }

    /// Send a message through the ready-gated client.
    pub async fn send_message(&self, to: &str, text: &str) -> Result<SentMessage, SessionError> {
        let client = self.ready_client()?;
        let sent = client.send_message(to, text).await?;
        debug!(to = %to, message_id = %sent.message_id, "Message sent");
        Ok(sent)
    }

    // ── Connect ─────────────────────────────────────────────────────

    /// Establish the platform session, retrying with a fixed delay.
    ///
    /// Returns immediately when already `Ready`. An authentication rejection
    /// is not retried and leaves the session `Fatal`.
    pub async fn connect(&self) -> Result<(), SessionError> {
        let _guard = self.reconnect_lock.lock().await;

        {
            let session = self.lock();
            match session.state {
                SessionState::Fatal => {
                    return Err(SessionError::Fatal {
                        reason: session
                            .last_error
                            .clone()
                            .unwrap_or_else(|| "session is fatal".to_string()),
                    });
                }
                SessionState::Ready => return Ok(()),
                _ => {}
            }
        }

        self.transition(SessionState::Initializing);
        self.lock().retry_count = 0;

        let attempts = self.config.connect_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            info!(platform = %self.client.name(), attempt, attempts, "Connecting to platform");

            match self.client.connect().await {
                Ok(()) => {
                    self.on_connected();
                    return Ok(());
                }
                Err(e) if e.is_auth_rejection() => {
                    error!(error = %e, "Platform rejected authentication");
                    self.fail_auth(e.to_string());
                    return Err(SessionError::Authentication(e.message));
                }
                Err(e) => {
                    warn!(attempt, attempts, error = %e, "Connect attempt failed");
                    {
                        let mut session = self.lock();
                        session.retry_count = attempt;
                        session.last_error = Some(e.to_string());
                    }
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(self.config.retry_delay).await;
                    }
                }
            }
        }

        let source = last_error.unwrap_or_else(|| {
            PlatformError::new(PlatformErrorKind::Unavailable, "no connect attempt made")
        });
        self.transition(SessionState::Disconnected);
        error!(attempts, error = %source, "Giving up on platform connection");
        self.bus.emit(BusEvent::error(
            ErrorCode::ConnectFailed,
            format!("Failed to connect after {attempts} attempt(s): {source}"),
            None,
        ));
        Err(SessionError::Connection { attempts, source })
    }

    fn on_connected(&self) {
        {
            let mut session = self.lock();
            session.retry_count = 0;
            session.last_error = None;
        }
        // Stored sessions come up ready without a separate lifecycle event.
        if self.client.is_ready() && self.transition(SessionState::Ready) {
            self.bus.emit(BusEvent::Ready { user: None });
        }
        info!(platform = %self.client.name(), state = %self.state(), "Platform connected");
    }

    fn fail_auth(&self, reason: String) {
        self.lock().last_error = Some(reason.clone());
        self.transition(SessionState::Fatal);
        self.bus
            .emit(BusEvent::error(ErrorCode::AuthFailure, reason.clone(), None));
        self.bus.emit(BusEvent::Fatal { error: reason });
    }

    // ── Lifecycle events ────────────────────────────────────────────

    /// Apply a lifecycle event reported by the platform.
    ///
    /// Returns whether the session state changed. Invalid transitions are
    /// logged and ignored.
    pub fn apply(&self, event: SessionEvent) -> bool {
        match event {
            SessionEvent::AuthChallenge { code } => {
                let changed = self.transition(SessionState::AwaitingAuth);
                if changed || self.state() == SessionState::AwaitingAuth {
                    info!("Authentication challenge issued");
                    self.bus.emit(BusEvent::AuthChallenge { code });
                }
                changed
            }
            SessionEvent::Authenticated => {
                if self.state() != SessionState::Fatal {
                    info!("Platform authenticated");
                    self.bus.emit(BusEvent::Authenticated);
                }
                false
            }
            SessionEvent::Ready { user } => {
                let changed = self.transition(SessionState::Ready);
                if changed {
                    self.lock().retry_count = 0;
                    info!(user = ?user, "Platform session ready");
                    self.bus.emit(BusEvent::Ready { user });
                }
                changed
            }
            SessionEvent::AuthFailure { reason } => {
                if self.state() == SessionState::Fatal {
                    return false;
                }
                error!(reason = %reason, "Authentication failed");
                self.fail_auth(reason);
                true
            }
            SessionEvent::Disconnected { reason } => {
                let changed = self.transition(SessionState::Disconnected);
                if changed {
                    warn!(reason = %reason, "Platform disconnected");
                    self.lock().last_error = Some(reason.clone());
                    self.bus.emit(BusEvent::Disconnected { reason });
                }
                changed
            }
        }
    }

    // ── Error recovery ──────────────────────────────────────────────

    /// Surface an error; attempt one reconnect when it is critical.
    pub async fn handle_error(&self, err: &PlatformError) -> RecoveryOutcome {
        self.bus
            .emit(BusEvent::error(ErrorCode::PlatformError, err.to_string(), None));

        if !err.is_critical() {
            debug!(error = %err, "Non-critical platform error");
            return RecoveryOutcome::NotCritical;
        }
        if self.state() == SessionState::Fatal {
            return RecoveryOutcome::AlreadyFatal;
        }

        let Ok(_guard) = self.reconnect_lock.try_lock() else {
            debug!(error = %err, "Reconnect already in progress, skipping recovery");
            return RecoveryOutcome::InProgress;
        };

        warn!(error = %err, "Critical platform error, restarting client");
        self.lock().last_error = Some(err.to_string());
        self.transition(SessionState::Initializing);

        match self.client.connect().await {
            Ok(()) => {
                self.on_connected();
                RecoveryOutcome::Reconnected
            }
            Err(e) => {
                error!(error = %e, "Client restart failed");
                self.lock().last_error = Some(e.to_string());
                self.transition(SessionState::Fatal);
                self.bus.emit(BusEvent::Fatal {
                    error: format!("Client restart failed: {e}"),
                });
                RecoveryOutcome::Fatal
            }
        }
    }

    // ── Shutdown ────────────────────────────────────────────────────

    /// Close the platform session if one is active. Best-effort.
    pub async fn shutdown(&self) {
        let _guard = self.reconnect_lock.lock().await;

        if self.state() != SessionState::Fatal && self.client.is_ready() {
            if let Err(e) = self.client.disconnect().await {
                warn!(error = %e, "Error closing platform session");
            }
        }
        if self.state() == SessionState::Ready {
            self.transition(SessionState::Disconnected);
        }
        info!("Session shut down");
        self.bus.emit(BusEvent::Status {
            status: ServiceStatus::Inactive,
        });
    }

    // ── Internals ───────────────────────────────────────────────────

    fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move to `target`, emitting a status event on change.
    fn transition(&self, target: SessionState) -> bool {
        let changed = {
            let mut session = self.lock();
            if session.state == target {
                false
            } else {
                match session.transition_to(target) {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(error = %e, "Ignoring invalid session transition");
                        false
                    }
                }
            }
        };
        if changed {
            debug!(state = %target, "Session state changed");
            self.bus.emit(BusEvent::Status {
                status: target.into(),
            });
        }
        changed
    }
}
