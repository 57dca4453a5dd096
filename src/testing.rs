//! Test doubles shared by the unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::classifier::{Classification, ClassificationEngine};
use crate::error::{ClassifierError, DatabaseError, LlmError, PlatformError, PlatformErrorKind};
use crate::platform::{Conversation, InboundMessage, PlatformClient, SentMessage};
use crate::store::{Collection, MemoryStore, SignalStore};

/// A one-to-one text message from a fixed sender.
pub fn message(id: &str, conversation_id: &str, body: &str) -> InboundMessage {
    InboundMessage {
        id: id.to_string(),
        conversation_id: conversation_id.to_string(),
        sender_id: "15557654321".to_string(),
        sender_name: None,
        body: body.to_string(),
        timestamp: Utc::now(),
        has_media: false,
        is_group_conversation: false,
    }
}

pub fn direct_chat(id: &str, name: &str) -> Conversation {
    Conversation {
        id: id.to_string(),
        name: name.to_string(),
        is_group: false,
        description: None,
        participants: Vec::new(),
    }
}

pub fn group_chat(id: &str, name: &str, description: &str) -> Conversation {
    Conversation {
        id: id.to_string(),
        name: name.to_string(),
        is_group: true,
        description: Some(description.to_string()),
        participants: Vec::new(),
    }
}

// ── Platform ────────────────────────────────────────────────────────

/// Scriptable in-process platform.
pub struct MockPlatform {
    connect_results: Mutex<VecDeque<Result<(), PlatformError>>>,
    ready_on_connect: bool,
    ready: AtomicBool,
    connect_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
    conversation_calls: AtomicUsize,
    conversations: Vec<Conversation>,
    messages: HashMap<String, Vec<InboundMessage>>,
    failing_fetch: HashMap<String, PlatformError>,
    failing_conversations: Option<PlatformError>,
    fetch_delay: Option<Duration>,
    fetched: Mutex<Vec<String>>,
    sent: Mutex<Vec<(String, String)>>,
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPlatform {
    pub fn new() -> Self {
        Self {
            connect_results: Mutex::new(VecDeque::new()),
            ready_on_connect: true,
            ready: AtomicBool::new(false),
            connect_calls: AtomicUsize::new(0),
            disconnect_calls: AtomicUsize::new(0),
            conversation_calls: AtomicUsize::new(0),
            conversations: Vec::new(),
            messages: HashMap::new(),
            failing_fetch: HashMap::new(),
            failing_conversations: None,
            fetch_delay: None,
            fetched: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Results returned by successive `connect()` calls; `Ok` once exhausted.
    pub fn with_connect_results(self, results: Vec<Result<(), PlatformError>>) -> Self {
        *self.connect_results.lock().unwrap() = results.into();
        self
    }

    /// Successful connects leave readiness to a lifecycle event.
    pub fn not_ready_on_connect(mut self) -> Self {
        self.ready_on_connect = false;
        self
    }

    pub fn with_conversation(mut self, conversation: Conversation, messages: Vec<InboundMessage>) -> Self {
        self.messages.insert(conversation.id.clone(), messages);
        self.conversations.push(conversation);
        self
    }

    pub fn failing_fetch(mut self, conversation_id: &str, error: PlatformError) -> Self {
        self.failing_fetch.insert(conversation_id.to_string(), error);
        self
    }

    pub fn failing_conversations(mut self, error: PlatformError) -> Self {
        self.failing_conversations = Some(error);
        self
    }

    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = Some(delay);
        self
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    pub fn conversation_calls(&self) -> usize {
        self.conversation_calls.load(Ordering::SeqCst)
    }

    /// Conversation ids fetched, in order.
    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl PlatformClient for MockPlatform {
    fn name(&self) -> &str {
        "mock"
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> Result<(), PlatformError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        let result = self
            .connect_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()));
        if result.is_ok() && self.ready_on_connect {
            self.ready.store(true, Ordering::SeqCst);
        }
        result
    }

    async fn disconnect(&self) -> Result<(), PlatformError> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.ready.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn conversations(&self) -> Result<Vec<Conversation>, PlatformError> {
        self.conversation_calls.fetch_add(1, Ordering::SeqCst);
        match &self.failing_conversations {
            Some(err) => Err(err.clone()),
            None => Ok(self.conversations.clone()),
        }
    }

    async fn fetch_recent_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<InboundMessage>, PlatformError> {
        if let Some(delay) = self.fetch_delay {
            tokio::time::sleep(delay).await;
        }
        self.fetched.lock().unwrap().push(conversation_id.to_string());
        if let Some(err) = self.failing_fetch.get(conversation_id) {
            return Err(err.clone());
        }
        let messages = self.messages.get(conversation_id).cloned().unwrap_or_default();
        let skip = messages.len().saturating_sub(limit);
        Ok(messages.into_iter().skip(skip).collect())
    }

    async fn send_message(
        &self,
        conversation_id: &str,
        text: &str,
    ) -> Result<SentMessage, PlatformError> {
        if !self.is_ready() {
            return Err(PlatformError::new(PlatformErrorKind::Unavailable, "not connected"));
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push((conversation_id.to_string(), text.to_string()));
        Ok(SentMessage {
            message_id: format!("sent-{}", sent.len()),
            timestamp: Utc::now(),
        })
    }
}

// ── Store ───────────────────────────────────────────────────────────

/// In-memory store whose writes to one collection always fail.
pub struct FailingStore {
    inner: MemoryStore,
    broken: Collection,
}

impl FailingStore {
    pub fn new(broken: Collection) -> Self {
        Self {
            inner: MemoryStore::new(),
            broken,
        }
    }

    fn check(&self, collection: Collection) -> Result<(), DatabaseError> {
        if collection == self.broken {
            return Err(DatabaseError::Query(format!("{collection} is read-only")));
        }
        Ok(())
    }
}

#[async_trait]
impl SignalStore for FailingStore {
    async fn create(
        &self,
        collection: Collection,
        key: &str,
        doc: &serde_json::Value,
    ) -> Result<(), DatabaseError> {
        self.check(collection)?;
        self.inner.create(collection, key, doc).await
    }

    async fn upsert(
        &self,
        collection: Collection,
        key: &str,
        doc: &serde_json::Value,
    ) -> Result<(), DatabaseError> {
        self.check(collection)?;
        self.inner.upsert(collection, key, doc).await
    }

    async fn count(&self, collection: Collection) -> Result<u64, DatabaseError> {
        self.inner.count(collection).await
    }

    async fn get(
        &self,
        collection: Collection,
        key: &str,
    ) -> Result<Option<serde_json::Value>, DatabaseError> {
        self.inner.get(collection, key).await
    }
}

// ── Classification engine ───────────────────────────────────────────

/// Engine returning one canned classification, counting calls.
pub struct MockEngine {
    result: Option<Classification>,
    /// Texts that classify as the opposite kind.
    flipped: HashSet<String>,
    calls: AtomicUsize,
}

impl MockEngine {
    pub fn listing(price: Option<f64>, location: Option<&str>) -> Self {
        Self::canned(true, price, location)
    }

    pub fn request(budget: Option<f64>, location: Option<&str>) -> Self {
        Self::canned(false, budget, location)
    }

    pub fn failing() -> Self {
        Self {
            result: None,
            flipped: HashSet::new(),
            calls: AtomicUsize::new(0),
        }
    }

    fn canned(is_listing: bool, price: Option<f64>, location: Option<&str>) -> Self {
        Self {
            result: Some(Classification {
                is_listing,
                price,
                location: location.map(str::to_string),
                property_type: Some("apartment".to_string()),
                confidence_score: 0.9,
            }),
            flipped: HashSet::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_confidence(mut self, score: f32) -> Self {
        if let Some(ref mut c) = self.result {
            c.confidence_score = score;
        }
        self
    }

    /// Classify `text` as the opposite kind.
    pub fn flip_for(mut self, text: &str) -> Self {
        self.flipped.insert(text.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClassificationEngine for MockEngine {
    async fn classify(&self, text: &str) -> Result<Classification, ClassifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut result = self.result.clone().ok_or_else(|| {
            ClassifierError::Engine(LlmError::RequestFailed {
                provider: "mock".into(),
                reason: "engine offline".into(),
            })
        })?;
        if self.flipped.contains(text) {
            result.is_listing = !result.is_listing;
        }
        Ok(result)
    }
}
