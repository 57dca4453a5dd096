use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use realty_watch::api::{AppState, router};
use realty_watch::classifier::LlmClassificationEngine;
use realty_watch::config::Config;
use realty_watch::events::EventBus;
use realty_watch::llm::{DEFAULT_MODEL, LlmConfig, create_provider};
use realty_watch::platform::BridgeClient;
use realty_watch::store::LibSqlStore;
use realty_watch::supervisor::Supervisor;

/// Platform events buffered between the bridge poller and the dispatcher.
const PLATFORM_EVENT_BUFFER: usize = 256;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing; keep the file guard alive for the whole run
    let (file_layer, _log_guard) = match std::env::var("REALTY_LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "realty-watch.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard))
        }
        Err(_) => (None, None),
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    let config = Config::from_env().context("Invalid configuration")?;

    let bridge_url = std::env::var("REALTY_BRIDGE_URL")
        .context("REALTY_BRIDGE_URL not set (e.g. http://127.0.0.1:3000)")?;
    let api_key = std::env::var("ANTHROPIC_API_KEY")
        .context("ANTHROPIC_API_KEY not set (export ANTHROPIC_API_KEY=sk-ant-...)")?;
    let model = std::env::var("REALTY_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
    let db_path =
        std::env::var("REALTY_DB_PATH").unwrap_or_else(|_| "./data/realty-watch.db".to_string());
    let http_port: u16 = match std::env::var("REALTY_HTTP_PORT") {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("REALTY_HTTP_PORT is not a port: {raw}"))?,
        Err(_) => 8080,
    };

    eprintln!("🏠 Realty Watch v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Platform: {} via {}", config.platform_name, bridge_url);
    eprintln!("   Model: {}", model);
    eprintln!("   Database: {}", db_path);
    eprintln!(
        "   Scan: every {} min, {} messages per chat",
        config.scan_interval.as_secs() / 60,
        config.scan_message_limit
    );
    eprintln!("   Notify: {} recipient(s)", config.audience().len());
    eprintln!("   API: http://0.0.0.0:{}/api/status", http_port);
    eprintln!("   Events WS: ws://0.0.0.0:{}/ws\n", http_port);

    // ── Database ─────────────────────────────────────────────────────────
    let store = Arc::new(
        LibSqlStore::new_local(std::path::Path::new(&db_path))
            .await
            .with_context(|| format!("Failed to open database at {db_path}"))?,
    );

    // ── Classification ───────────────────────────────────────────────────
    let llm = create_provider(&LlmConfig {
        api_key: secrecy::SecretString::from(api_key),
        model,
    })?;
    let engine = Arc::new(LlmClassificationEngine::new(llm));

    // ── Platform + Supervisor ────────────────────────────────────────────
    let (events_tx, events_rx) = tokio::sync::mpsc::channel(PLATFORM_EVENT_BUFFER);
    let platform = Arc::new(BridgeClient::new(
        config.platform_name.clone(),
        bridge_url,
        events_tx,
    ));

    let bus = EventBus::new();
    let supervisor = Arc::new(Supervisor::new(
        config,
        platform,
        events_rx,
        engine,
        store,
        bus.clone(),
    )?);

    // ── Control API ──────────────────────────────────────────────────────
    let app = router(AppState {
        session: Arc::clone(supervisor.session()),
        scanner: Arc::clone(supervisor.scanner()),
        bus,
    });
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{http_port}"))
        .await
        .with_context(|| format!("Failed to bind port {http_port}"))?;
    tracing::info!(port = http_port, "Control API started");
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "Control API server stopped");
        }
    });

    // A failed connect leaves the API up so the operator can inspect status.
    if let Err(e) = supervisor.start().await {
        tracing::error!(error = %e, "Platform session did not start");
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    eprintln!("\nShutting down...");

    supervisor.stop().await;
    server.abort();
    Ok(())
}
