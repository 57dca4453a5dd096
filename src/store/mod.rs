//! Persistence layer: document storage for listings, requests, and groups.

pub mod libsql_backend;
pub mod memory;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlStore;
pub use memory::MemoryStore;
pub use traits::{Collection, Record, SignalStore, upsert_record};
