//! Typed event bus: broadcast fan-out for status, progress, notification,
//! and error events.
//!
//! Every component emits through a cloned [`EventBus`]. Subscribers (the
//! WebSocket stream, log sinks, tests) receive an [`Envelope`] per event.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::pipeline::notify::NotificationPayload;
use crate::pipeline::records::{GroupMetadata, ListingRecord, MessageSummary, RequestRecord};
use crate::session::SessionState;

/// Default broadcast channel capacity.
const DEFAULT_BUS_CAPACITY: usize = 1024;

/// Externally visible service status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Initializing,
    AwaitingAuth,
    Ready,
    Disconnected,
    Fatal,
    /// Service stopped.
    Inactive,
}

impl From<SessionState> for ServiceStatus {
    fn from(state: SessionState) -> Self {
        match state {
            SessionState::Initializing => Self::Initializing,
            SessionState::AwaitingAuth => Self::AwaitingAuth,
            SessionState::Ready => Self::Ready,
            SessionState::Disconnected => Self::Disconnected,
            SessionState::Fatal => Self::Fatal,
        }
    }
}

/// Machine-readable error code on the `error` topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    AuthFailure,
    ConnectFailed,
    MessageProcessing,
    ScanFailed,
    PlatformError,
}

/// Event topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Status,
    AuthChallenge,
    Authenticated,
    Ready,
    Disconnected,
    MessageReceived,
    ListingProcessed,
    RequestProcessed,
    GroupUpdated,
    Notification,
    ScanStarted,
    ScanProgress,
    ScanComplete,
    Error,
    Fatal,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::AuthChallenge => "auth_challenge",
            Self::Authenticated => "authenticated",
            Self::Ready => "ready",
            Self::Disconnected => "disconnected",
            Self::MessageReceived => "message.received",
            Self::ListingProcessed => "listing.processed",
            Self::RequestProcessed => "request.processed",
            Self::GroupUpdated => "group.updated",
            Self::Notification => "notification",
            Self::ScanStarted => "scan.started",
            Self::ScanProgress => "scan.progress",
            Self::ScanComplete => "scan.complete",
            Self::Error => "error",
            Self::Fatal => "fatal",
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event on the bus. Serialized with its topic as the `topic` field.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "topic")]
pub enum BusEvent {
    #[serde(rename = "status")]
    Status { status: ServiceStatus },

    /// The platform wants the operator to complete a pairing challenge.
    #[serde(rename = "auth_challenge")]
    AuthChallenge { code: Option<String> },

    #[serde(rename = "authenticated")]
    Authenticated,

    #[serde(rename = "ready")]
    Ready { user: Option<String> },

    #[serde(rename = "disconnected")]
    Disconnected { reason: String },

    #[serde(rename = "message.received")]
    MessageReceived(MessageSummary),

    #[serde(rename = "listing.processed")]
    ListingProcessed(ListingRecord),

    #[serde(rename = "request.processed")]
    RequestProcessed(RequestRecord),

    #[serde(rename = "group.updated")]
    GroupUpdated(GroupMetadata),

    #[serde(rename = "notification")]
    Notification(NotificationPayload),

    #[serde(rename = "scan.started")]
    ScanStarted { total: usize },

    #[serde(rename = "scan.progress")]
    ScanProgress { current: usize, total: usize },

    #[serde(rename = "scan.complete")]
    ScanComplete {
        scanned_chats: usize,
        found_listings: u64,
        found_requests: u64,
    },

    #[serde(rename = "error")]
    Error {
        code: ErrorCode,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
    },

    #[serde(rename = "fatal")]
    Fatal { error: String },
}

impl BusEvent {
    pub fn topic(&self) -> Topic {
        match self {
            Self::Status { .. } => Topic::Status,
            Self::AuthChallenge { .. } => Topic::AuthChallenge,
            Self::Authenticated => Topic::Authenticated,
            Self::Ready { .. } => Topic::Ready,
            Self::Disconnected { .. } => Topic::Disconnected,
            Self::MessageReceived(_) => Topic::MessageReceived,
            Self::ListingProcessed(_) => Topic::ListingProcessed,
            Self::RequestProcessed(_) => Topic::RequestProcessed,
            Self::GroupUpdated(_) => Topic::GroupUpdated,
            Self::Notification(_) => Topic::Notification,
            Self::ScanStarted { .. } => Topic::ScanStarted,
            Self::ScanProgress { .. } => Topic::ScanProgress,
            Self::ScanComplete { .. } => Topic::ScanComplete,
            Self::Error { .. } => Topic::Error,
            Self::Fatal { .. } => Topic::Fatal,
        }
    }

    /// Shorthand for an `error` event.
    pub fn error(code: ErrorCode, message: impl Into<String>, message_id: Option<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
            message_id,
        }
    }
}

/// What subscribers receive: the event plus identity and time.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub event_id: Uuid,
    pub emitted_at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: BusEvent,
}

impl Envelope {
    /// Stamp an event with a fresh id and the current time.
    pub fn new(event: BusEvent) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            emitted_at: Utc::now(),
            event,
        }
    }
}

/// Broadcast event bus. Cheap to clone; all clones share one channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Envelope>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUS_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Emit an event to every current subscriber.
    pub fn emit(&self, event: BusEvent) {
        let topic = event.topic();
        let envelope = Envelope::new(event);
        // No receivers is fine; nobody is listening yet.
        let delivered = self.tx.send(envelope).unwrap_or(0);
        debug!(topic = %topic, delivered, "Event emitted");
    }

    /// Subscribe to every event.
    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }

    /// Run `handler` for every event on `topic` until the bus closes.
    ///
    /// The subscription is taken before this returns, so events emitted
    /// afterwards are never missed.
    pub fn on<F>(&self, topic: Topic, handler: F) -> JoinHandle<()>
    where
        F: Fn(&Envelope) + Send + 'static,
    {
        let mut rx = self.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(envelope) if envelope.event.topic() == topic => handler(&envelope),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(topic = %topic, missed, "Event handler lagged behind bus");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}
