//! # Key-Value Store Seam
//!
//! The scanner only ever needs three operations on durable storage:
//!
//! | Operation          | SQL (SqliteStore)                                   |
//! |--------------------|-----------------------------------------------------|
//! | `get(key)`         | `SELECT value FROM kv_entries WHERE key = ?`        |
//! | `set(key, bytes)`  | `INSERT ... ON CONFLICT(key) DO UPDATE`             |
//! | `delete(key)`      | `DELETE FROM kv_entries WHERE key = ?`              |
//!
//! The trait is object safe so the engine can hold an
//! `Arc<dyn KeyValueStore>` and tests can swap in [`crate::MemoryStore`].

use async_trait::async_trait;

use crate::error::StoreResult;

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Returns the bytes stored under `key`, or `None` if absent.
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Stores `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: &[u8]) -> StoreResult<()>;

    /// Removes `key`. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> StoreResult<()>;
}
