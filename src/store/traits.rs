//! `SignalStore` trait: document persistence keyed by collection and id.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::DatabaseError;

/// Persisted collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Listings,
    Requests,
    Groups,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Listings => "property_listings",
            Self::Requests => "property_requests",
            Self::Groups => "groups",
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record stored under a stable key in one collection.
pub trait Record: Serialize {
    const COLLECTION: Collection;

    fn key(&self) -> &str;
}

/// Backend-agnostic document store.
///
/// Every write is atomic per document. `upsert` replaces the whole document.
#[async_trait]
pub trait SignalStore: Send + Sync {
    /// Insert a new document. Fails with `DatabaseError::Constraint` if the key exists.
    async fn create(
        &self,
        collection: Collection,
        key: &str,
        doc: &serde_json::Value,
    ) -> Result<(), DatabaseError>;

    /// Insert or replace a document.
    async fn upsert(
        &self,
        collection: Collection,
        key: &str,
        doc: &serde_json::Value,
    ) -> Result<(), DatabaseError>;

    /// Number of documents in a collection.
    async fn count(&self, collection: Collection) -> Result<u64, DatabaseError>;

    /// Fetch a document by key.
    async fn get(
        &self,
        collection: Collection,
        key: &str,
    ) -> Result<Option<serde_json::Value>, DatabaseError>;
}

/// Serialize a record and upsert it under its own key.
pub async fn upsert_record<R: Record + Sync>(
    store: &dyn SignalStore,
    record: &R,
) -> Result<(), DatabaseError> {
    let doc = serde_json::to_value(record)
        .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
    store.upsert(R::COLLECTION, record.key(), &doc).await
}
