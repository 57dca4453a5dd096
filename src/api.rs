//! Control API: HTTP status/trigger endpoints plus a WebSocket event stream.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use futures::StreamExt;
use serde::Deserialize;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::events::{BusEvent, Envelope, EventBus};
use crate::scan::ScanScheduler;
use crate::session::SessionManager;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub session: Arc<SessionManager>,
    pub scanner: Arc<ScanScheduler>,
    pub bus: EventBus,
}

/// Build the router with every control route.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/status", get(status))
        .route("/api/scan", post(trigger_scan))
        .route("/api/messages", post(send_message))
        .route("/ws", get(ws_handler))
        .layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
        .with_state(state)
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "realty-watch"
    }))
}

// ── Status & Scan ───────────────────────────────────────────────────────

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "platform": state.session.platform_name(),
        "session": state.session.snapshot(),
        "scan": state.scanner.state(),
    }))
}

async fn trigger_scan(State(state): State<AppState>) -> impl IntoResponse {
    if !state.session.is_ready() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "error": "Client not ready",
                "state": state.session.state(),
            })),
        );
    }

    if !state.scanner.start_scan() {
        return (
            StatusCode::OK,
            Json(serde_json::json!({"status": "already_running"})),
        );
    }
    info!("Scan triggered via API");

    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({"status": "started"})),
    )
}

// ── Messages ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct SendRequest {
    to: String,
    message: String,
}

async fn send_message(
    State(state): State<AppState>,
    Json(body): Json<SendRequest>,
) -> impl IntoResponse {
    if body.to.trim().is_empty() || body.message.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "Both 'to' and 'message' are required"})),
        );
    }

    match state.session.send_message(&body.to, &body.message).await {
        Ok(sent) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "success": true,
                "message_id": sent.message_id,
                "timestamp": sent.timestamp,
            })),
        ),
        Err(e) => {
            warn!(to = %body.to, error = %e, "Send via API failed");
            let status = match e {
                SessionError::NotReady { .. } | SessionError::Fatal { .. } => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                SessionError::Platform(_) => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (
                status,
                Json(serde_json::json!({"success": false, "error": e.to_string()})),
            )
        }
    }
}

// ── WebSocket ───────────────────────────────────────────────────────────

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    info!("WebSocket client connecting");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Current session status as an envelope, sent on connect and after lag.
fn status_sync(session: &SessionManager) -> Option<String> {
    let envelope = Envelope::new(BusEvent::Status {
        status: session.state().into(),
    });
    serde_json::to_string(&envelope).ok()
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    info!("WebSocket client connected");

    // Subscribe before the sync so nothing emitted in between is lost.
    let mut events = BroadcastStream::new(state.bus.subscribe());

    if let Some(json) = status_sync(&state.session)
        && socket.send(Message::Text(json.into())).await.is_err()
    {
        warn!("Failed to send initial status, client disconnected");
        return;
    }

    loop {
        tokio::select! {
            next = events.next() => {
                let json = match next {
                    Some(Ok(envelope)) => serde_json::to_string(&envelope).ok(),
                    Some(Err(BroadcastStreamRecvError::Lagged(missed))) => {
                        warn!(missed, "WS client lagged behind bus");
                        status_sync(&state.session)
                    }
                    None => {
                        debug!("Event bus closed");
                        break;
                    }
                };
                if let Some(json) = json
                    && socket.send(Message::Text(json.into())).await.is_err()
                {
                    debug!("Client disconnected during send");
                    break;
                }
            }

            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("WebSocket client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                    Some(Ok(Message::Text(text))) => {
                        debug!(text = %text.as_str(), "Ignoring client message");
                    }
                    _ => {}
                }
            }
        }
    }

    info!("WebSocket connection closed");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, header};
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::classifier::SignalClassifier;
    use crate::config::{DEFAULT_KEYWORDS, SessionConfig};
    use crate::error::{PlatformError, PlatformErrorKind};
    use crate::pipeline::{IngestionPipeline, Notifier};
    use crate::store::MemoryStore;
    use crate::testing::{MockEngine, MockPlatform, direct_chat, message};

    fn state(platform: MockPlatform) -> (AppState, Arc<MockPlatform>) {
        let bus = EventBus::new();
        let platform = Arc::new(platform);
        let session = Arc::new(SessionManager::new(
            platform.clone(),
            SessionConfig {
                connect_attempts: 1,
                retry_delay: Duration::from_millis(1),
            },
            bus.clone(),
        ));
        let engine = Arc::new(MockEngine::listing(None, None));
        let pipeline = Arc::new(IngestionPipeline::new(
            SignalClassifier::with_keywords(DEFAULT_KEYWORDS, engine).unwrap(),
            Arc::new(MemoryStore::new()),
            Notifier::new(bus.clone(), vec!["1".into()]),
            bus.clone(),
            "whatsapp",
            16_000,
        ));
        let scanner = Arc::new(ScanScheduler::new(
            Arc::clone(&session),
            pipeline,
            bus.clone(),
            50,
        ));
        (
            AppState {
                session,
                scanner,
                bus,
            },
            platform,
        )
    }

    async fn call(app: Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_is_ok() {
        let (state, _) = state(MockPlatform::new());
        let (status, body) = call(router(state), get_req("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn status_reports_session_and_scan() {
        let (state, _) = state(MockPlatform::new());
        state.session.connect().await.unwrap();

        let (status, body) = call(router(state), get_req("/api/status")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["platform"], "mock");
        assert_eq!(body["session"]["state"], "ready");
        assert_eq!(body["scan"]["in_progress"], false);
    }

    #[tokio::test]
    async fn scan_rejected_until_ready() {
        let (state, _) = state(MockPlatform::new());
        let (status, body) = call(router(state), Request::post("/api/scan").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["state"], "initializing");
    }

    #[tokio::test]
    async fn scan_started_when_ready() {
        let (state, platform) = state(
            MockPlatform::new()
                .with_conversation(direct_chat("a@c.us", "Asha"), vec![message("m1", "a@c.us", "flat for rent")]),
        );
        state.session.connect().await.unwrap();
        let scanner = Arc::clone(&state.scanner);

        let (status, body) = call(router(state), Request::post("/api/scan").body(Body::empty()).unwrap()).await;

        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["status"], "started");
        tokio::time::timeout(Duration::from_secs(2), async {
            while scanner.state().scanned_count < 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("scan should finish");
        assert_eq!(platform.conversation_calls(), 1);
    }

    #[tokio::test]
    async fn second_trigger_reports_already_running() {
        let (state, platform) = state(
            MockPlatform::new()
                .with_conversation(direct_chat("a@c.us", "Asha"), vec![message("m1", "a@c.us", "flat for rent")])
                .with_fetch_delay(Duration::from_millis(50)),
        );
        state.session.connect().await.unwrap();
        let scanner = Arc::clone(&state.scanner);
        let app = router(state);
        let scan = || Request::post("/api/scan").body(Body::empty()).unwrap();

        let (first, second) = tokio::join!(call(app.clone(), scan()), call(app, scan()));

        let mut statuses = vec![first.0.as_u16(), second.0.as_u16()];
        statuses.sort();
        assert_eq!(statuses, vec![200, 202]);
        let already = if first.0 == StatusCode::OK { first.1 } else { second.1 };
        assert_eq!(already["status"], "already_running");

        tokio::time::timeout(Duration::from_secs(2), async {
            while scanner.is_scanning() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("scan should finish");
        assert_eq!(platform.conversation_calls(), 1);
    }

    #[tokio::test]
    async fn api_scan_reconnects_after_reset() {
        let (state, platform) = state(
            MockPlatform::new()
                .with_conversation(direct_chat("a@c.us", "Asha"), vec![message("m1", "a@c.us", "flat for rent")])
                .failing_fetch("a@c.us", PlatformError::new(PlatformErrorKind::ConnectionReset, "peer reset")),
        );
        state.session.connect().await.unwrap();
        let session = Arc::clone(&state.session);

        let (status, _) = call(router(state), Request::post("/api/scan").body(Body::empty()).unwrap()).await;

        assert_eq!(status, StatusCode::ACCEPTED);
        tokio::time::timeout(Duration::from_secs(2), async {
            while platform.connect_calls() < 2 || !session.is_ready() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("session should reconnect");
        assert_eq!(platform.connect_calls(), 2);
    }

    #[tokio::test]
    async fn send_requires_ready_session() {
        let (state, _) = state(MockPlatform::new());
        let (status, body) = call(
            router(state),
            post_json("/api/messages", serde_json::json!({"to": "1@c.us", "message": "hi"})),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn send_when_ready() {
        let (state, platform) = state(MockPlatform::new());
        state.session.connect().await.unwrap();

        let (status, body) = call(
            router(state),
            post_json("/api/messages", serde_json::json!({"to": "1@c.us", "message": "hi"})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["message_id"], "sent-1");
        assert_eq!(platform.sent(), vec![("1@c.us".to_string(), "hi".to_string())]);
    }

    #[tokio::test]
    async fn send_rejects_empty_fields() {
        let (state, _) = state(MockPlatform::new());
        let (status, _) = call(
            router(state),
            post_json("/api/messages", serde_json::json!({"to": " ", "message": "hi"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
