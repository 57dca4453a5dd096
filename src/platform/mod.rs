//! Messaging-platform capability consumed by the core.
//!
//! The platform client owns the wire protocol. The core only sees:
//! - request/response operations on [`PlatformClient`]
//! - a stream of [`PlatformEvent`]s pushed into an `mpsc` channel that the
//!   client receives at construction time

pub mod bridge;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PlatformError;
use crate::session::SessionEvent;

pub use bridge::BridgeClient;

/// A message as delivered by the platform. Immutable once received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Platform-native message id.
    pub id: String,
    pub conversation_id: String,
    /// Sender's platform id (phone number for most chat platforms).
    pub sender_id: String,
    /// Sender's display name, if the platform knows it.
    pub sender_name: Option<String>,
    pub body: String,
    pub timestamp: DateTime<Utc>,
    pub has_media: bool,
    pub is_group_conversation: bool,
}

/// Member of a group conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub is_admin: bool,
}

/// A conversation as listed by the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub name: String,
    pub is_group: bool,
    #[serde(default)]
    pub description: Option<String>,
    /// Empty for one-to-one conversations.
    #[serde(default)]
    pub participants: Vec<Participant>,
}

/// Receipt for a sent message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentMessage {
    pub message_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Event pushed by the platform client.
#[derive(Debug, Clone)]
pub enum PlatformEvent {
    Lifecycle(SessionEvent),
    Message(InboundMessage),
    /// An asynchronous failure not tied to a request.
    Error(PlatformError),
}

/// Platform client. Pure I/O, no business logic.
///
/// Callers reach these operations through `SessionManager::ready_client()`,
/// which refuses while the session is not `Ready`.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Platform name (e.g. "whatsapp").
    fn name(&self) -> &str;

    /// Whether the client itself believes its transport is up.
    fn is_ready(&self) -> bool;

    /// Establish (or resume) the platform session.
    async fn connect(&self) -> Result<(), PlatformError>;

    /// Close the platform session.
    async fn disconnect(&self) -> Result<(), PlatformError>;

    /// List every conversation visible to the session.
    async fn conversations(&self) -> Result<Vec<Conversation>, PlatformError>;

    /// Fetch up to `limit` most recent messages of a conversation, oldest first.
    async fn fetch_recent_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<InboundMessage>, PlatformError>;

    /// Send a text message to a conversation.
    async fn send_message(
        &self,
        conversation_id: &str,
        text: &str,
    ) -> Result<SentMessage, PlatformError>;
}
