//! Ingestion pipeline: classify, persist, and announce each message.
//!
//! Flow:
//! 1. Classifier (pre-filter, then engine) → may short-circuit with no signal
//! 2. Record projection → upsert keyed by source message id
//! 3. `listing.processed` / `request.processed` event
//! 4. Notification fan-out
//!
//! Reprocessing the same message id overwrites the same record, so a scan
//! replaying history never duplicates live-ingested signals.

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::classifier::{SignalClassifier, SignalKind};
use crate::error::PipelineError;
use crate::events::{BusEvent, ErrorCode, EventBus};
use crate::pipeline::notify::Notifier;
use crate::pipeline::records::{ContactInfo, ListingRecord, RequestRecord};
use crate::platform::InboundMessage;
use crate::store::{SignalStore, upsert_record};

pub struct IngestionPipeline {
    classifier: SignalClassifier,
    store: Arc<dyn SignalStore>,
    notifier: Notifier,
    bus: EventBus,
    platform: String,
    max_message_length: usize,
}

impl IngestionPipeline {
    pub fn new(
        classifier: SignalClassifier,
        store: Arc<dyn SignalStore>,
        notifier: Notifier,
        bus: EventBus,
        platform: impl Into<String>,
        max_message_length: usize,
    ) -> Self {
        Self {
            classifier,
            store,
            notifier,
            bus,
            platform: platform.into(),
            max_message_length,
        }
    }

    /// Process one message. Never fails: errors are logged and emitted on
    /// the `error` topic tagged with the message id.
    pub async fn process(&self, message: &InboundMessage) -> Option<SignalKind> {
        match self.handle(message).await {
            Ok(kind) => kind,
            Err(e) => {
                error!(id = %message.id, error = %e, "Failed to process message");
                self.bus.emit(BusEvent::error(
                    ErrorCode::MessageProcessing,
                    e.to_string(),
                    Some(message.id.clone()),
                ));
                None
            }
        }
    }

    /// Fallible core of [`process`](Self::process). Returns the signal kind
    /// persisted, or `None` when the message carries no signal.
    pub async fn handle(
        &self,
        message: &InboundMessage,
    ) -> Result<Option<SignalKind>, PipelineError> {
        let Some(signal) = self.classifier.classify(&message.body).await? else {
            debug!(id = %message.id, "No real-estate signal");
            return Ok(None);
        };

        match signal.kind {
            SignalKind::Listing => {
                let record =
                    ListingRecord::new(message, &signal, &self.platform, self.max_message_length);
                upsert_record(self.store.as_ref(), &record).await?;
                info!(
                    id = %message.id,
                    price = ?record.price,
                    location = ?record.location,
                    "Listing processed"
                );
                self.bus.emit(BusEvent::ListingProcessed(record));
            }
            SignalKind::Request => {
                let record =
                    RequestRecord::new(message, &signal, &self.platform, self.max_message_length);
                upsert_record(self.store.as_ref(), &record).await?;
                info!(
                    id = %message.id,
                    budget = ?record.requirements.budget,
                    location = ?record.requirements.location,
                    "Request processed"
                );
                self.bus.emit(BusEvent::RequestProcessed(record));
            }
        }

        self.notifier.notify(
            signal.kind,
            message.body.clone(),
            ContactInfo::from_message(message),
        );
        Ok(Some(signal.kind))
    }

    pub fn store(&self) -> &Arc<dyn SignalStore> {
        &self.store
    }
}
