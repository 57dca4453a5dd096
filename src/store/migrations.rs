//! Schema migrations for the signal store.
//!
//! Applied versions are recorded in `_migrations`; on open, every step newer
//! than the recorded maximum runs in its own transaction together with its
//! bookkeeping row, so a crash never leaves a half-applied version.

use libsql::Connection;
use tracing::{debug, info};

use crate::error::DatabaseError;

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// Ordered by version. Append only.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "documents",
        sql: r#"
            CREATE TABLE IF NOT EXISTS documents (
                collection TEXT NOT NULL,
                key TEXT NOT NULL,
                body TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (collection, key)
            );
            CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection);
        "#,
    },
    Migration {
        version: 2,
        name: "documents_updated_index",
        sql: r#"
            CREATE INDEX IF NOT EXISTS idx_documents_updated
                ON documents(collection, updated_at);
        "#,
    },
];

fn migration_err(context: &str) -> impl FnOnce(libsql::Error) -> DatabaseError + '_ {
    move |e| DatabaseError::Migration(format!("{context}: {e}"))
}

/// Bring the schema up to the latest version.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(migration_err("create _migrations"))?;

    let applied = schema_version(conn).await?;
    let pending = MIGRATIONS.iter().filter(|m| m.version > applied);

    for step in pending {
        info!(version = step.version, name = step.name, "Applying schema migration");
        let tx = conn
            .transaction()
            .await
            .map_err(migration_err("begin migration"))?;
        tx.execute_batch(step.sql)
            .await
            .map_err(|e| DatabaseError::Migration(format!("V{} {}: {e}", step.version, step.name)))?;
        tx.execute(
            "INSERT INTO _migrations (version, name) VALUES (?1, ?2)",
            libsql::params![step.version, step.name],
        )
        .await
        .map_err(migration_err("record migration"))?;
        tx.commit().await.map_err(migration_err("commit migration"))?;
    }

    debug!(version = schema_version(conn).await?, "Schema up to date");
    Ok(())
}

/// Highest recorded version; 0 on a fresh database.
async fn schema_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(migration_err("query schema version"))?;

    match rows.next().await.map_err(migration_err("read schema version"))? {
        Some(row) => row.get::<i64>(0).map_err(migration_err("decode schema version")),
        None => Ok(0),
    }
}
