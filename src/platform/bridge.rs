//! Bridge client: speaks JSON over HTTP to a local platform bridge.
//!
//! The bridge sidecar owns the messaging protocol and pairing. This client
//! maps its REST surface onto [`PlatformClient`] and long-polls `/events`,
//! forwarding lifecycle and message events into the core's event channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{PlatformError, PlatformErrorKind};
use crate::platform::{Conversation, InboundMessage, PlatformClient, PlatformEvent, SentMessage};
use crate::session::SessionEvent;

/// Seconds the bridge may hold an `/events` request open.
const POLL_TIMEOUT_SECS: u64 = 30;

/// Timeout for ordinary request/response calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Pause after a failed poll before trying again.
const POLL_BACKOFF: Duration = Duration::from_secs(5);

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct StartResponse {
    status: String,
    #[serde(default)]
    user: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventsResponse {
    #[serde(default)]
    cursor: Option<String>,
    #[serde(default)]
    events: Vec<BridgeEvent>,
}

#[derive(Debug, Clone, Deserialize)]
struct BridgeMessage {
    id: String,
    chat_id: String,
    from: String,
    #[serde(default)]
    from_name: Option<String>,
    #[serde(default)]
    body: String,
    /// Unix seconds.
    timestamp: i64,
    #[serde(default)]
    has_media: bool,
    #[serde(default)]
    is_group: bool,
}

impl BridgeMessage {
    fn into_inbound(self) -> InboundMessage {
        InboundMessage {
            id: self.id,
            conversation_id: self.chat_id,
            sender_id: self.from,
            sender_name: self.from_name,
            body: self.body,
            timestamp: unix_to_utc(self.timestamp),
            has_media: self.has_media,
            is_group_conversation: self.is_group,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    id: String,
    timestamp: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BridgeEvent {
    Qr {
        #[serde(default)]
        code: Option<String>,
    },
    Authenticated,
    Ready {
        #[serde(default)]
        user: Option<String>,
    },
    AuthFailure {
        #[serde(default)]
        reason: String,
    },
    Disconnected {
        #[serde(default)]
        reason: String,
    },
    Message {
        message: BridgeMessage,
    },
    Error {
        code: String,
        #[serde(default)]
        message: String,
    },
    #[serde(other)]
    Unknown,
}

impl BridgeEvent {
    fn into_platform_event(self) -> Option<PlatformEvent> {
        let event = match self {
            Self::Qr { code } => PlatformEvent::Lifecycle(SessionEvent::AuthChallenge { code }),
            Self::Authenticated => PlatformEvent::Lifecycle(SessionEvent::Authenticated),
            Self::Ready { user } => PlatformEvent::Lifecycle(SessionEvent::Ready { user }),
            Self::AuthFailure { reason } => {
                PlatformEvent::Lifecycle(SessionEvent::AuthFailure { reason })
            }
            Self::Disconnected { reason } => {
                PlatformEvent::Lifecycle(SessionEvent::Disconnected { reason })
            }
            Self::Message { message } => PlatformEvent::Message(message.into_inbound()),
            Self::Error { code, message } => {
                PlatformEvent::Error(PlatformError::new(error_kind_for_code(&code), message))
            }
            Self::Unknown => return None,
        };
        Some(event)
    }
}

// ── Client ──────────────────────────────────────────────────────────

/// `PlatformClient` backed by an HTTP bridge sidecar.
pub struct BridgeClient {
    name: String,
    base_url: String,
    client: reqwest::Client,
    events: mpsc::Sender<PlatformEvent>,
    ready: Arc<AtomicBool>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl BridgeClient {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        events: mpsc::Sender<PlatformEvent>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            events,
            ready: Arc::new(AtomicBool::new(false)),
            poller: Mutex::new(None),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Start the `/events` long-poll task unless one is already running.
    fn ensure_poller(&self) {
        let mut slot = self.poller.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let client = self.client.clone();
        let url = self.url("/events");
        let events = self.events.clone();
        let ready = Arc::clone(&self.ready);

        *slot = Some(tokio::spawn(async move {
            let mut cursor: Option<String> = None;
            let mut outage_reported = false;

            tracing::info!(url = %url, "Bridge event poller started");

            loop {
                let mut request = client
                    .get(&url)
                    .query(&[("timeout", POLL_TIMEOUT_SECS.to_string())])
                    .timeout(Duration::from_secs(POLL_TIMEOUT_SECS + 5));
                if let Some(ref c) = cursor {
                    request = request.query(&[("cursor", c)]);
                }

                let batch = match request.send().await {
                    Ok(resp) if resp.status().is_success() => {
                        resp.json::<EventsResponse>().await.map_err(transport_error)
                    }
                    Ok(resp) => Err(status_error(resp.status(), String::new(), false)),
                    Err(e) => Err(transport_error(e)),
                };

                let batch = match batch {
                    Ok(b) => {
                        outage_reported = false;
                        b
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Bridge poll error");
                        // A lost feed on a live session is a connection reset.
                        if ready.swap(false, Ordering::SeqCst) && !outage_reported {
                            outage_reported = true;
                            let reset = PlatformError::new(
                                PlatformErrorKind::ConnectionReset,
                                format!("event feed lost: {}", e.message),
                            );
                            if events.send(PlatformEvent::Error(reset)).await.is_err() {
                                break;
                            }
                        }
                        tokio::time::sleep(POLL_BACKOFF).await;
                        continue;
                    }
                };

                if batch.cursor.is_some() {
                    cursor = batch.cursor;
                }

                for raw in batch.events {
                    match &raw {
                        BridgeEvent::Ready { .. } => ready.store(true, Ordering::SeqCst),
                        BridgeEvent::Disconnected { .. } | BridgeEvent::AuthFailure { .. } => {
                            ready.store(false, Ordering::SeqCst)
                        }
                        _ => {}
                    }
                    let Some(event) = raw.into_platform_event() else {
                        tracing::debug!("Ignoring unknown bridge event");
                        continue;
                    };
                    if events.send(event).await.is_err() {
                        tracing::info!("Event channel closed, stopping bridge poller");
                        return;
                    }
                }
            }
        }));
    }

    fn stop_poller(&self) {
        let handle = self
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, PlatformError> {
        let resp = self
            .client
            .get(self.url(path))
            .query(query)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(transport_error)?;
        decode(resp, false).await
    }
}

impl Drop for BridgeClient {
    fn drop(&mut self) {
        self.stop_poller();
    }
}

#[async_trait]
impl PlatformClient for BridgeClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> Result<(), PlatformError> {
        let resp = self
            .client
            .post(self.url("/session/start"))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(transport_error)?;
        let started: StartResponse = decode(resp, true).await?;

        self.ready
            .store(started.status == "ready", Ordering::SeqCst);
        tracing::info!(
            status = %started.status,
            user = ?started.user,
            "Bridge session started"
        );

        self.ensure_poller();
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), PlatformError> {
        self.stop_poller();
        self.ready.store(false, Ordering::SeqCst);

        let resp = self
            .client
            .post(self.url("/session/stop"))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(transport_error)?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(status_error(status, body, false));
        }
        Ok(())
    }

    async fn conversations(&self) -> Result<Vec<Conversation>, PlatformError> {
        self.get_json("/chats", &[]).await
    }

    async fn fetch_recent_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<InboundMessage>, PlatformError> {
        let messages: Vec<BridgeMessage> = self
            .get_json(
                &format!("/chats/{conversation_id}/messages"),
                &[("limit", limit.to_string())],
            )
            .await?;
        Ok(messages.into_iter().map(BridgeMessage::into_inbound).collect())
    }

    async fn send_message(
        &self,
        conversation_id: &str,
        text: &str,
    ) -> Result<SentMessage, PlatformError> {
        let resp = self
            .client
            .post(self.url(&format!("/chats/{conversation_id}/messages")))
            .json(&serde_json::json!({ "text": text }))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(transport_error)?;
        let sent: SendResponse = decode(resp, false).await?;
        Ok(SentMessage {
            message_id: sent.id,
            timestamp: unix_to_utc(sent.timestamp),
        })
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

async fn decode<T: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
    during_connect: bool,
) -> Result<T, PlatformError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(status_error(status, body, during_connect));
    }
    resp.json::<T>().await.map_err(|e| {
        PlatformError::new(PlatformErrorKind::InvalidResponse, e.to_string())
    })
}

fn status_error(status: StatusCode, body: String, during_connect: bool) -> PlatformError {
    let kind = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN if during_connect => {
            PlatformErrorKind::AuthRejected
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PlatformErrorKind::AuthLost,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            PlatformErrorKind::SessionTimeout
        }
        StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY => PlatformErrorKind::Unavailable,
        _ => PlatformErrorKind::RequestFailed,
    };
    let message = if body.is_empty() {
        format!("bridge returned {status}")
    } else {
        format!("bridge returned {status}: {body}")
    };
    PlatformError::new(kind, message)
}

fn transport_error(e: reqwest::Error) -> PlatformError {
    let kind = if e.is_timeout() {
        PlatformErrorKind::SessionTimeout
    } else if e.is_connect() {
        PlatformErrorKind::Unavailable
    } else if e.is_decode() {
        PlatformErrorKind::InvalidResponse
    } else {
        PlatformErrorKind::RequestFailed
    };
    PlatformError::new(kind, e.to_string())
}

fn error_kind_for_code(code: &str) -> PlatformErrorKind {
    match code {
        "ECONNRESET" => PlatformErrorKind::ConnectionReset,
        "UNAUTHENTICATED" => PlatformErrorKind::AuthLost,
        "SESSION_TIMEOUT" => PlatformErrorKind::SessionTimeout,
        _ => PlatformErrorKind::RequestFailed,
    }
}

fn unix_to_utc(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
}
