//! Supervisor: owns every component and their background tasks.
//!
//! `start()` brings the service up: dispatcher first (so no platform event is
//! lost), then the periodic scan timer, then the session connect. `stop()`
//! tears it down in reverse.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::classifier::{ClassificationEngine, SignalClassifier};
use crate::config::Config;
use crate::error::Error;
use crate::events::{BusEvent, EventBus, ServiceStatus};
use crate::pipeline::{IngestionPipeline, MessageSummary, Notifier};
use crate::platform::{PlatformClient, PlatformEvent};
use crate::scan::{ScanScheduler, spawn_periodic_scan};
use crate::session::SessionManager;
use crate::store::SignalStore;

#[derive(Default)]
struct Tasks {
    dispatcher: Option<JoinHandle<()>>,
    scan_timer: Option<(JoinHandle<()>, Arc<AtomicBool>)>,
}

pub struct Supervisor {
    config: Arc<Config>,
    bus: EventBus,
    session: Arc<SessionManager>,
    pipeline: Arc<IngestionPipeline>,
    scanner: Arc<ScanScheduler>,
    events_rx: Mutex<Option<mpsc::Receiver<PlatformEvent>>>,
    tasks: Mutex<Tasks>,
}

impl Supervisor {
    pub fn new(
        config: Config,
        platform: Arc<dyn PlatformClient>,
        events_rx: mpsc::Receiver<PlatformEvent>,
        engine: Arc<dyn ClassificationEngine>,
        store: Arc<dyn SignalStore>,
        bus: EventBus,
    ) -> Result<Self, Error> {
        config.validate()?;
        let config = Arc::new(config);

        let session = Arc::new(SessionManager::new(
            platform,
            config.session.clone(),
            bus.clone(),
        ));
        let classifier = SignalClassifier::with_keywords(&config.keywords, engine)?;
        let pipeline = Arc::new(IngestionPipeline::new(
            classifier,
            store,
            Notifier::new(bus.clone(), config.audience()),
            bus.clone(),
            config.platform_name.clone(),
            config.max_message_length,
        ));
        let scanner = Arc::new(ScanScheduler::new(
            Arc::clone(&session),
            Arc::clone(&pipeline),
            bus.clone(),
            config.scan_message_limit,
        ));

        Ok(Self {
            config,
            bus,
            session,
            pipeline,
            scanner,
            events_rx: Mutex::new(Some(events_rx)),
            tasks: Mutex::new(Tasks::default()),
        })
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn scanner(&self) -> &Arc<ScanScheduler> {
        &self.scanner
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Start the dispatcher and the scan timer, then connect the session.
    ///
    /// A connect failure is returned with both tasks already running. The
    /// timer only scans while the session is ready, so a later
    /// `session().connect()` or bridge `ready` event resumes scheduled scans.
    pub async fn start(&self) -> Result<(), Error> {
        info!(platform = %self.config.platform_name, "Starting supervisor");
        self.bus.emit(BusEvent::Status {
            status: ServiceStatus::Initializing,
        });

        let events_rx = self
            .events_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(rx) = events_rx {
            let dispatcher = spawn_dispatcher(
                rx,
                Arc::clone(&self.session),
                Arc::clone(&self.pipeline),
                self.bus.clone(),
                self.config.max_message_length,
            );
            self.lock_tasks().dispatcher = Some(dispatcher);
        }

        {
            let mut tasks = self.lock_tasks();
            if tasks.scan_timer.is_none() {
                tasks.scan_timer = Some(spawn_periodic_scan(
                    Arc::clone(&self.scanner),
                    self.config.scan_interval,
                ));
            }
        }

        self.session.connect().await?;

        info!("Supervisor started");
        Ok(())
    }

    /// Stop the timer, the dispatcher, and the platform session. Best-effort.
    pub async fn stop(&self) {
        info!("Stopping supervisor");
        let (dispatcher, scan_timer) = {
            let mut tasks = self.lock_tasks();
            (tasks.dispatcher.take(), tasks.scan_timer.take())
        };

        if let Some((handle, shutdown)) = scan_timer {
            shutdown.store(true, Ordering::Relaxed);
            handle.abort();
        }
        if let Some(handle) = dispatcher {
            handle.abort();
        }

        self.session.shutdown().await;
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Tasks> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Consume platform events strictly one at a time.
fn spawn_dispatcher(
    mut rx: mpsc::Receiver<PlatformEvent>,
    session: Arc<SessionManager>,
    pipeline: Arc<IngestionPipeline>,
    bus: EventBus,
    max_message_length: usize,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Platform event dispatcher started");

        while let Some(event) = rx.recv().await {
            match event {
                PlatformEvent::Message(message) => {
                    debug!(id = %message.id, from = %message.sender_id, "Message received");
                    bus.emit(BusEvent::MessageReceived(MessageSummary::from_inbound(
                        &message,
                        max_message_length,
                    )));
                    pipeline.process(&message).await;
                }
                PlatformEvent::Lifecycle(lifecycle) => {
                    session.apply(lifecycle);
                }
                PlatformEvent::Error(err) => {
                    // Recovery may reconnect; keep draining events meanwhile.
                    let session = Arc::clone(&session);
                    tokio::spawn(async move {
                        session.handle_error(&err).await;
                    });
                }
            }
        }

        info!("Platform event channel closed, dispatcher exiting");
    })
}
