//! Message pipeline: classified signals to records and notifications.

pub mod ingest;
pub mod notify;
pub mod records;

pub use ingest::IngestionPipeline;
pub use notify::{NotificationPayload, Notifier};
pub use records::{
    ContactInfo, GroupMetadata, ListingRecord, MessageSummary, RequestRecord, Requirements,
    SourceMetadata, truncate_content,
};
