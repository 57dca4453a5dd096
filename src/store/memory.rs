//! In-memory `SignalStore` for tests and ephemeral runs.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::store::traits::{Collection, SignalStore};

#[derive(Default)]
pub struct MemoryStore {
    docs: Mutex<HashMap<(Collection, String), serde_json::Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SignalStore for MemoryStore {
    async fn create(
        &self,
        collection: Collection,
        key: &str,
        doc: &serde_json::Value,
    ) -> Result<(), DatabaseError> {
        let mut docs = self.docs.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = (collection, key.to_string());
        if docs.contains_key(&slot) {
            return Err(DatabaseError::Constraint(format!(
                "{collection}/{key} already exists"
            )));
        }
        docs.insert(slot, doc.clone());
        Ok(())
    }

    async fn upsert(
        &self,
        collection: Collection,
        key: &str,
        doc: &serde_json::Value,
    ) -> Result<(), DatabaseError> {
        self.docs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((collection, key.to_string()), doc.clone());
        Ok(())
    }

    async fn count(&self, collection: Collection) -> Result<u64, DatabaseError> {
        let docs = self.docs.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(docs.keys().filter(|(c, _)| *c == collection).count() as u64)
    }

    async fn get(
        &self,
        collection: Collection,
        key: &str,
    ) -> Result<Option<serde_json::Value>, DatabaseError> {
        let docs = self.docs.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(docs.get(&(collection, key.to_string())).cloned())
    }
}
