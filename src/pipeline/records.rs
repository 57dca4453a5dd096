//! Persistence-ready records built from classified messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classifier::{ClassifiedSignal, extract_location};
use crate::platform::{Conversation, InboundMessage, Participant};
use crate::store::{Collection, Record};

/// Location reported when none can be extracted.
pub const UNKNOWN_LOCATION: &str = "Unknown";

/// Group name/description terms that mark a real-estate group.
const GROUP_TERMS: &[&str] = &["property", "real estate", "rent", "sale"];

/// Where a record came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMetadata {
    pub platform: String,
    pub message_id: String,
    pub conversation_id: String,
}

impl SourceMetadata {
    fn from_message(platform: &str, message: &InboundMessage) -> Self {
        Self {
            platform: platform.to_string(),
            message_id: message.id.clone(),
            conversation_id: message.conversation_id.clone(),
        }
    }
}

/// Sender contact details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    pub name: String,
    pub number: String,
}

impl ContactInfo {
    /// Display name falls back to the sender id.
    pub fn from_message(message: &InboundMessage) -> Self {
        let name = message
            .sender_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(&message.sender_id)
            .to_string();
        Self {
            name,
            number: message.sender_id.clone(),
        }
    }
}

/// A property offered for rent or sale. Keyed by source message id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingRecord {
    pub id: String,
    pub content: String,
    pub price: Option<f64>,
    pub location: Option<String>,
    pub property_type: Option<String>,
    pub contact: ContactInfo,
    pub confidence: f32,
    pub media_attached: bool,
    pub received_at: DateTime<Utc>,
    pub source: SourceMetadata,
}

impl ListingRecord {
    pub fn new(
        message: &InboundMessage,
        signal: &ClassifiedSignal,
        platform: &str,
        max_content_len: usize,
    ) -> Self {
        Self {
            id: message.id.clone(),
            content: truncate_content(&message.body, max_content_len),
            price: signal.price,
            location: signal.location.clone(),
            property_type: signal.property_type.clone(),
            contact: ContactInfo::from_message(message),
            confidence: signal.confidence,
            media_attached: message.has_media,
            received_at: message.timestamp,
            source: SourceMetadata::from_message(platform, message),
        }
    }
}

impl Record for ListingRecord {
    const COLLECTION: Collection = Collection::Listings;

    fn key(&self) -> &str {
        &self.id
    }
}

/// What a requester is looking for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Requirements {
    pub property_type: Option<String>,
    pub location: Option<String>,
    pub budget: Option<f64>,
}

/// Someone looking for a property. Keyed by source message id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub id: String,
    pub requirements: Requirements,
    pub contact: ContactInfo,
    pub confidence: f32,
    pub content: String,
    pub received_at: DateTime<Utc>,
    pub source: SourceMetadata,
}

impl RequestRecord {
    pub fn new(
        message: &InboundMessage,
        signal: &ClassifiedSignal,
        platform: &str,
        max_content_len: usize,
    ) -> Self {
        Self {
            id: message.id.clone(),
            requirements: Requirements {
                property_type: signal.property_type.clone(),
                location: signal.location.clone(),
                budget: signal.price,
            },
            contact: ContactInfo::from_message(message),
            confidence: signal.confidence,
            content: truncate_content(&message.body, max_content_len),
            received_at: message.timestamp,
            source: SourceMetadata::from_message(platform, message),
        }
    }
}

impl Record for RequestRecord {
    const COLLECTION: Collection = Collection::Requests;

    fn key(&self) -> &str {
        &self.id
    }
}

/// Group conversation metadata, refreshed on every scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMetadata {
    pub id: String,
    pub name: String,
    pub description: String,
    pub participants: Vec<Participant>,
    pub is_real_estate_related: bool,
    pub updated_at: DateTime<Utc>,
}

impl GroupMetadata {
    pub fn from_conversation(conversation: &Conversation) -> Self {
        let description = conversation.description.clone().unwrap_or_default();
        Self {
            id: conversation.id.clone(),
            is_real_estate_related: is_real_estate_group(&conversation.name, &description),
            name: conversation.name.clone(),
            description,
            participants: conversation.participants.clone(),
            updated_at: Utc::now(),
        }
    }
}

impl Record for GroupMetadata {
    const COLLECTION: Collection = Collection::Groups;

    fn key(&self) -> &str {
        &self.id
    }
}

fn is_real_estate_group(name: &str, description: &str) -> bool {
    let haystack = format!("{name} {description}").to_lowercase();
    GROUP_TERMS.iter().any(|t| haystack.contains(t))
}

/// Summary of a live message, emitted before processing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageSummary {
    pub id: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub from: String,
    pub is_group: bool,
    pub has_media: bool,
    pub location: String,
}

impl MessageSummary {
    pub fn from_inbound(message: &InboundMessage, max_content_len: usize) -> Self {
        Self {
            id: message.id.clone(),
            content: truncate_content(&message.body, max_content_len),
            timestamp: message.timestamp,
            from: message.sender_id.clone(),
            is_group: message.is_group_conversation,
            has_media: message.has_media,
            location: extract_location(&message.body)
                .unwrap_or_else(|| UNKNOWN_LOCATION.to_string()),
        }
    }
}

/// Keep the first `max_chars` characters, marking the cut with `...`.
pub fn truncate_content(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}...", &content[..byte_idx]),
        None => content.to_string(),
    }
}
