//! libSQL backend: async `SignalStore` implementation.
//!
//! Supports local file and in-memory databases. Documents are stored as JSON
//! text in a single `documents` table keyed by `(collection, key)`.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{Collection, SignalStore};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let store = Self::from_database(db).await?;
        info!(path = %path.display(), "Database opened");
        Ok(store)
    }

    /// Create an in-memory database.
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

/// Decode a `COUNT(*)` row.
fn row_count(row: &libsql::Row) -> Result<u64, DatabaseError> {
    let count: i64 = row
        .get(0)
        .map_err(|e| DatabaseError::Query(format!("count: {e}")))?;
    u64::try_from(count).map_err(|_| DatabaseError::Query(format!("count: negative result {count}")))
}

fn encode(doc: &serde_json::Value) -> Result<String, DatabaseError> {
    serde_json::to_string(doc).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

/// SQLite reports duplicate keys as constraint failures.
fn is_constraint_violation(e: &libsql::Error) -> bool {
    let msg = e.to_string();
    msg.contains("UNIQUE constraint") || msg.contains("PRIMARY KEY") || msg.contains("constraint failed")
}

#[async_trait]
impl SignalStore for LibSqlStore {
    async fn create(
        &self,
        collection: Collection,
        key: &str,
        doc: &serde_json::Value,
    ) -> Result<(), DatabaseError> {
        let body = encode(doc)?;
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "INSERT INTO documents (collection, key, body, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![collection.as_str(), key, body, now],
            )
            .await
            .map_err(|e| {
                if is_constraint_violation(&e) {
                    DatabaseError::Constraint(format!("{collection}/{key} already exists"))
                } else {
                    DatabaseError::Query(format!("create: {e}"))
                }
            })?;
        debug!(collection = %collection, key = %key, "Document created");
        Ok(())
    }

    async fn upsert(
        &self,
        collection: Collection,
        key: &str,
        doc: &serde_json::Value,
    ) -> Result<(), DatabaseError> {
        let body = encode(doc)?;
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "INSERT INTO documents (collection, key, body, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 ON CONFLICT(collection, key) DO UPDATE SET
                    body = excluded.body,
                    updated_at = excluded.updated_at",
                params![collection.as_str(), key, body, now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert: {e}")))?;
        debug!(collection = %collection, key = %key, "Document upserted");
        Ok(())
    }

    async fn count(&self, collection: Collection) -> Result<u64, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT COUNT(*) FROM documents WHERE collection = ?1",
                params![collection.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("count: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row_count(&row),
            Ok(None) => Ok(0),
            Err(e) => Err(DatabaseError::Query(format!("count: {e}"))),
        }
    }

    async fn get(
        &self,
        collection: Collection,
        key: &str,
    ) -> Result<Option<serde_json::Value>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT body FROM documents WHERE collection = ?1 AND key = ?2",
                params![collection.as_str(), key],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get: {e}")))?;

        let row = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("get: {e}")))?;
        let Some(row) = row else {
            return Ok(None);
        };
        let body: String = row
            .get(0)
            .map_err(|e| DatabaseError::Query(format!("get: {e}")))?;
        serde_json::from_str(&body)
            .map(Some)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    async fn test_db() -> LibSqlStore {
        LibSqlStore::new_memory().await.unwrap()
    }

    #[tokio::test]
    async fn create_and_get() {
        let db = test_db().await;
        db.create(Collection::Listings, "m1", &json!({"price": 2000}))
            .await
            .unwrap();

        let doc = db.get(Collection::Listings, "m1").await.unwrap().unwrap();
        assert_eq!(doc["price"], 2000);
        assert!(db.get(Collection::Requests, "m1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn create_duplicate_is_constraint_error() {
        let db = test_db().await;
        db.create(Collection::Groups, "g1", &json!({})).await.unwrap();
        let err = db
            .create(Collection::Groups, "g1", &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Constraint(_)), "{err}");
    }

    #[tokio::test]
    async fn upsert_is_idempotent_per_key() {
        let db = test_db().await;
        db.upsert(Collection::Listings, "m1", &json!({"v": 1}))
            .await
            .unwrap();
        db.upsert(Collection::Listings, "m1", &json!({"v": 2}))
            .await
            .unwrap();
        db.upsert(Collection::Listings, "m2", &json!({"v": 1}))
            .await
            .unwrap();

        assert_eq!(db.count(Collection::Listings).await.unwrap(), 2);
        assert_eq!(db.count(Collection::Requests).await.unwrap(), 0);
        let doc = db.get(Collection::Listings, "m1").await.unwrap().unwrap();
        assert_eq!(doc["v"], 2);
    }

    #[tokio::test]
    async fn undecodable_count_is_query_error() {
        let db = test_db().await;
        let mut rows = db.conn().query("SELECT 'many'", ()).await.unwrap();
        let row = rows.next().await.unwrap().unwrap();

        let err = row_count(&row).unwrap_err();

        assert!(matches!(err, DatabaseError::Query(_)), "{err}");
    }

    #[tokio::test]
    async fn local_file_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("signals.db");

        {
            let db = LibSqlStore::new_local(&path).await.unwrap();
            db.upsert(Collection::Requests, "r1", &json!({"budget": 10}))
                .await
                .unwrap();
        }

        let db = LibSqlStore::new_local(&path).await.unwrap();
        assert_eq!(db.count(Collection::Requests).await.unwrap(), 1);
    }
}
