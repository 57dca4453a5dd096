//! Shared stubs for the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;

use realty_watch::error::{LlmError, PlatformError, PlatformErrorKind};
use realty_watch::llm::provider::{CompletionRequest, CompletionResponse, LlmProvider};
use realty_watch::platform::{Conversation, InboundMessage, PlatformClient, SentMessage};

/// Stub LLM: answers like the real model would for a few known phrasings.
pub struct StubLlm {
    pub calls: AtomicUsize,
}

impl StubLlm {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl LlmProvider for StubLlm {
    fn model_name(&self) -> &str {
        "stub"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = request
            .messages
            .last()
            .map(|m| m.content.to_lowercase())
            .unwrap_or_default();

        let content = if text.contains("looking for") {
            r#"{"is_listing": false, "price": 1500, "location": "Baner", "property_type": "apartment", "confidence_score": 0.8}"#
        } else if text.contains("boston") {
            r#"Sure! {"is_listing": true, "price": "$2,000", "location": "Boston", "property_type": "flat", "confidence_score": 0.95}"#
        } else {
            r#"{"is_listing": true, "price": null, "location": null, "property_type": null, "confidence_score": 0.6}"#
        };

        Ok(CompletionResponse {
            content: content.to_string(),
            input_tokens: 0,
            output_tokens: 0,
        })
    }
}

pub fn inbound(id: &str, conversation_id: &str, body: &str, group: bool) -> InboundMessage {
    InboundMessage {
        id: id.to_string(),
        conversation_id: conversation_id.to_string(),
        sender_id: "15557654321".to_string(),
        sender_name: Some("Asha".to_string()),
        body: body.to_string(),
        timestamp: Utc::now(),
        has_media: false,
        is_group_conversation: group,
    }
}

pub fn conversation(id: &str, name: &str, is_group: bool) -> Conversation {
    Conversation {
        id: id.to_string(),
        name: name.to_string(),
        is_group,
        description: is_group.then(|| "Listings only".to_string()),
        participants: Vec::new(),
    }
}

/// In-memory platform with fixed history. Always connects.
pub struct StubPlatform {
    ready: AtomicBool,
    history: Vec<(Conversation, Vec<InboundMessage>)>,
    pub sent: Mutex<Vec<(String, String)>>,
}

impl StubPlatform {
    pub fn new(history: Vec<(Conversation, Vec<InboundMessage>)>) -> Self {
        Self {
            ready: AtomicBool::new(false),
            history,
            sent: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl PlatformClient for StubPlatform {
    fn name(&self) -> &str {
        "stub"
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> Result<(), PlatformError> {
        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), PlatformError> {
        self.ready.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn conversations(&self) -> Result<Vec<Conversation>, PlatformError> {
        Ok(self.history.iter().map(|(c, _)| c.clone()).collect())
    }

    async fn fetch_recent_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<InboundMessage>, PlatformError> {
        let messages = self
            .history
            .iter()
            .find(|(c, _)| c.id == conversation_id)
            .map(|(_, m)| m.clone())
            .ok_or_else(|| {
                PlatformError::new(PlatformErrorKind::RequestFailed, "unknown conversation")
            })?;
        let skip = messages.len().saturating_sub(limit);
        Ok(messages.into_iter().skip(skip).collect())
    }

    async fn send_message(
        &self,
        conversation_id: &str,
        text: &str,
    ) -> Result<SentMessage, PlatformError> {
        let mut sent = self.sent.lock().unwrap();
        sent.push((conversation_id.to_string(), text.to_string()));
        Ok(SentMessage {
            message_id: format!("stub-{}", sent.len()),
            timestamp: Utc::now(),
        })
    }
}
