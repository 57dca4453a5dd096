//! Scan scheduler: full-history re-scans, on a timer and on demand.
//!
//! A scan walks every conversation, replays its most recent messages through
//! the ingestion pipeline, and refreshes group metadata. At most one scan
//! runs at a time; a trigger while one is running is a no-op. A scan that
//! fails on a critical platform error hands it to the session manager for
//! one reconnect attempt, whichever path started it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::ScanError;
use crate::events::{BusEvent, ErrorCode, EventBus};
use crate::pipeline::{GroupMetadata, IngestionPipeline};
use crate::session::SessionManager;
use crate::store::{Collection, upsert_record};

/// Snapshot of scan progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScanState {
    pub in_progress: bool,
    pub total_conversations: usize,
    pub scanned_count: usize,
}

/// Totals reported when a scan completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub scanned_chats: usize,
    pub found_listings: u64,
    pub found_requests: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Another scan held the flag; nothing was done.
    AlreadyRunning,
    Completed(ScanSummary),
}

/// Holds the in-progress flag; clears it however the scan ends.
struct ScanGuard(Arc<AtomicBool>);

impl ScanGuard {
    fn claim(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(Arc::clone(flag)))
    }
}

impl Drop for ScanGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct ScanScheduler {
    session: Arc<SessionManager>,
    pipeline: Arc<IngestionPipeline>,
    bus: EventBus,
    message_limit: usize,
    in_progress: Arc<AtomicBool>,
    total: AtomicUsize,
    scanned: AtomicUsize,
}

impl ScanScheduler {
    pub fn new(
        session: Arc<SessionManager>,
        pipeline: Arc<IngestionPipeline>,
        bus: EventBus,
        message_limit: usize,
    ) -> Self {
        Self {
            session,
            pipeline,
            bus,
            message_limit,
            in_progress: Arc::new(AtomicBool::new(false)),
            total: AtomicUsize::new(0),
            scanned: AtomicUsize::new(0),
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    pub fn state(&self) -> ScanState {
        ScanState {
            in_progress: self.is_scanning(),
            total_conversations: self.total.load(Ordering::Acquire),
            scanned_count: self.scanned.load(Ordering::Acquire),
        }
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    /// Run a full scan unless one is already in progress.
    pub async fn trigger_scan(&self) -> Result<ScanOutcome, ScanError> {
        let Some(guard) = ScanGuard::claim(&self.in_progress) else {
            debug!("Scan already in progress, ignoring trigger");
            return Ok(ScanOutcome::AlreadyRunning);
        };
        self.scan_claimed(guard).await.map(ScanOutcome::Completed)
    }

    /// Claim the scan flag now and run the scan on a background task.
    ///
    /// Returns `false` without spawning anything when a scan already holds
    /// the flag.
    pub fn start_scan(self: &Arc<Self>) -> bool {
        let Some(guard) = ScanGuard::claim(&self.in_progress) else {
            debug!("Scan already in progress, ignoring trigger");
            return false;
        };
        let scanner = Arc::clone(self);
        tokio::spawn(async move {
            // Logged, emitted and recovered inside.
            let _ = scanner.scan_claimed(guard).await;
        });
        true
    }

    async fn scan_claimed(&self, guard: ScanGuard) -> Result<ScanSummary, ScanError> {
        self.total.store(0, Ordering::Release);
        self.scanned.store(0, Ordering::Release);

        let result = self.run_scan().await;
        drop(guard);

        match result {
            Ok(summary) => {
                info!(
                    scanned = summary.scanned_chats,
                    listings = summary.found_listings,
                    requests = summary.found_requests,
                    "Scan complete"
                );
                self.bus.emit(BusEvent::ScanComplete {
                    scanned_chats: summary.scanned_chats,
                    found_listings: summary.found_listings,
                    found_requests: summary.found_requests,
                });
                Ok(summary)
            }
            Err(e) => {
                error!(
                    error = %e,
                    scanned = self.scanned.load(Ordering::Acquire),
                    "Scan failed"
                );
                self.bus
                    .emit(BusEvent::error(ErrorCode::ScanFailed, e.to_string(), None));
                if let Some(platform_err) = e.platform_error().filter(|p| p.is_critical()) {
                    warn!(error = %platform_err, "Scan hit a critical platform error");
                    self.session.handle_error(platform_err).await;
                }
                Err(e)
            }
        }
    }

    async fn run_scan(&self) -> Result<ScanSummary, ScanError> {
        let client = self.session.ready_client()?;
        let conversations = client.conversations().await?;
        let total = conversations.len();
        self.total.store(total, Ordering::Release);

        info!(total, "Scan started");
        self.bus.emit(BusEvent::ScanStarted { total });

        for conversation in &conversations {
            let messages = client
                .fetch_recent_messages(&conversation.id, self.message_limit)
                .await?;
            debug!(
                conversation = %conversation.id,
                count = messages.len(),
                "Replaying conversation history"
            );

            for message in &messages {
                self.pipeline.process(message).await;
            }

            if conversation.is_group {
                let metadata = GroupMetadata::from_conversation(conversation);
                upsert_record(self.pipeline.store().as_ref(), &metadata).await?;
                self.bus.emit(BusEvent::GroupUpdated(metadata));
            }

            let current = self.scanned.fetch_add(1, Ordering::AcqRel) + 1;
            self.bus.emit(BusEvent::ScanProgress { current, total });
        }

        let store = self.pipeline.store();
        Ok(ScanSummary {
            scanned_chats: total,
            found_listings: store.count(Collection::Listings).await?,
            found_requests: store.count(Collection::Requests).await?,
        })
    }
}

/// Spawn the periodic scan timer.
///
/// Each tick triggers a scan when the session is ready and no scan is
/// running. The first tick is skipped.
///
/// Returns a `JoinHandle` and shutdown flag.
pub fn spawn_periodic_scan(
    scanner: Arc<ScanScheduler>,
    interval: Duration,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "Periodic scan started");

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // Skip immediate first tick
        ticker.tick().await;

        loop {
            ticker.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Periodic scan shutting down");
                return;
            }

            if !scanner.session().is_ready() {
                debug!("Session not ready, skipping scheduled scan");
                continue;
            }
            if scanner.is_scanning() {
                debug!("Scan still running, skipping scheduled scan");
                continue;
            }

            if let Err(e) = scanner.trigger_scan().await {
                debug!(error = %e, "Scheduled scan failed");
            }
        }
    });

    (handle, shutdown_flag)
}
