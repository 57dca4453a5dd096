//! Notification fan-out to the configured audience.

use serde::Serialize;
use tracing::info;

use crate::classifier::SignalKind;
use crate::events::{BusEvent, EventBus};
use crate::pipeline::records::ContactInfo;

/// Payload on the `notification` topic.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationPayload {
    pub kind: SignalKind,
    pub message: String,
    pub sender: ContactInfo,
    /// Contacts first, then groups.
    pub targets: Vec<String>,
}

pub struct Notifier {
    bus: EventBus,
    audience: Vec<String>,
}

impl Notifier {
    pub fn new(bus: EventBus, audience: Vec<String>) -> Self {
        Self { bus, audience }
    }

    /// Broadcast a classified signal to every audience member. No filtering.
    pub fn notify(&self, kind: SignalKind, message: String, sender: ContactInfo) {
        info!(
            kind = %kind,
            sender = %sender.number,
            targets = self.audience.len(),
            "Notifying audience"
        );
        self.bus.emit(BusEvent::Notification(NotificationPayload {
            kind,
            message,
            sender,
            targets: self.audience.clone(),
        }));
    }
}
