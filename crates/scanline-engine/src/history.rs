//! # Scan History
//!
//! The persisted, bounded list of accepted scans.
//!
//! ## Write Path
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  add / remove / clear                                                  │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  lock HistoryLog ──► mutate ──► encode ──► queue WriteOp ──► unlock    │
//! │                                                │                        │
//! │                                                ▼                        │
//! │                                   writer task (one per history)        │
//! │                                   store.set / store.delete, in order   │
//! │                                   failures: warn! and continue         │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Mutations never wait on the store. Ops are queued while the log is
//! locked, so the store sees them in the same order as the log.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

use scanline_core::{HistoryEntry, HistoryLog};
use scanline_store::KeyValueStore;

enum WriteOp {
    Persist(Vec<u8>),
    Delete,
    Flush(oneshot::Sender<()>),
}

pub struct ScanHistory {
    log: Mutex<HistoryLog>,
    writer_tx: mpsc::UnboundedSender<WriteOp>,
}

impl ScanHistory {
    /// Loads the stored list (empty if missing or unreadable) and starts
    /// the writer task.
    pub async fn load(store: Arc<dyn KeyValueStore>, key: impl Into<String>, cap: usize) -> Self {
        let key = key.into();

        let log = match store.get(&key).await {
            Ok(Some(bytes)) => {
                let log = HistoryLog::decode_lossy(&bytes, cap);
                if log.is_empty() && !bytes.is_empty() {
                    warn!(key = %key, bytes = bytes.len(), "Stored history unreadable, starting empty");
                }
                log
            }
            Ok(None) => HistoryLog::new(cap),
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read history, starting empty");
                HistoryLog::new(cap)
            }
        };

        info!(key = %key, entries = log.len(), cap = log.cap(), "Scan history loaded");

        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(store, key, writer_rx));

        ScanHistory {
            log: Mutex::new(log),
            writer_tx,
        }
    }

    /// Prepends `entry`, evicting the oldest beyond the cap.
    pub async fn add(&self, entry: HistoryEntry) {
        let mut log = self.log.lock().await;
        debug!(code = %entry.code, "History add");
        log.push(entry);
        self.persist(&log);
    }

    /// Removes the entry at `index` (0 = newest). Out of range is a no-op.
    pub async fn remove(&self, index: usize) -> Option<HistoryEntry> {
        let mut log = self.log.lock().await;
        let removed = log.remove(index)?;
        self.persist(&log);
        Some(removed)
    }

    /// Empties the list and deletes the stored key.
    pub async fn clear(&self) {
        let mut log = self.log.lock().await;
        log.clear();
        self.enqueue(WriteOp::Delete);
    }

    /// Entries, newest first.
    pub async fn list(&self) -> Vec<HistoryEntry> {
        self.log.lock().await.entries().to_vec()
    }

    pub async fn len(&self) -> usize {
        self.log.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.log.lock().await.is_empty()
    }

    /// Hands a past code back to the caller for re-submission.
    pub fn rescan(&self, code: &str) -> String {
        debug!(code, "Rescan requested");
        code.to_string()
    }

    /// Waits until every queued write has reached the store.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.writer_tx.send(WriteOp::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    fn persist(&self, log: &HistoryLog) {
        match log.encode() {
            Ok(bytes) => self.enqueue(WriteOp::Persist(bytes)),
            Err(e) => warn!(error = %e, "Failed to encode history"),
        }
    }

    fn enqueue(&self, op: WriteOp) {
        if self.writer_tx.send(op).is_err() {
            warn!("History writer stopped, change not persisted");
        }
    }
}

async fn run_writer(
    store: Arc<dyn KeyValueStore>,
    key: String,
    mut rx: mpsc::UnboundedReceiver<WriteOp>,
) {
    while let Some(op) = rx.recv().await {
        match op {
            WriteOp::Persist(bytes) => {
                if let Err(e) = store.set(&key, &bytes).await {
                    warn!(key = %key, error = %e, "Failed to persist history");
                }
            }
            WriteOp::Delete => {
                if let Err(e) = store.delete(&key).await {
                    warn!(key = %key, error = %e, "Failed to delete history");
                }
            }
            WriteOp::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!(key = %key, "History writer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use scanline_store::{MemoryStore, SqliteStore, StoreConfig, StoreError, StoreResult};

    const KEY: &str = "scan_history";

    fn entry(code: &str, ms: i64) -> HistoryEntry {
        HistoryEntry {
            code: code.to_string(),
            symbology: "EAN-8".to_string(),
            observed_at: Utc.timestamp_millis_opt(ms).unwrap(),
        }
    }

    fn codes(entries: &[HistoryEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.code.as_str()).collect()
    }

    /// Store whose every operation fails.
    struct BrokenStore;

    #[async_trait]
    impl KeyValueStore for BrokenStore {
        async fn get(&self, _key: &str) -> StoreResult<Option<Vec<u8>>> {
            Err(StoreError::ConnectionFailed("disk gone".into()))
        }
        async fn set(&self, _key: &str, _value: &[u8]) -> StoreResult<()> {
            Err(StoreError::ConnectionFailed("disk gone".into()))
        }
        async fn delete(&self, _key: &str) -> StoreResult<()> {
            Err(StoreError::ConnectionFailed("disk gone".into()))
        }
    }

    #[tokio::test]
    async fn test_add_is_newest_first_and_capped() {
        let store = Arc::new(MemoryStore::new());
        let history = ScanHistory::load(store, KEY, 3).await;

        for (i, code) in ["111111", "222222", "333333", "444444"].iter().enumerate() {
            history.add(entry(code, i as i64)).await;
        }

        let list = history.list().await;
        assert_eq!(codes(&list), vec!["444444", "333333", "222222"]);
    }

    #[tokio::test]
    async fn test_mutations_are_persisted() {
        let store = Arc::new(MemoryStore::new());
        let history = ScanHistory::load(store.clone(), KEY, 50).await;

        history.add(entry("123456", 1)).await;
        history.add(entry("987654321", 2)).await;
        history.flush().await;

        let stored = store.get(KEY).await.unwrap().unwrap();
        let decoded = HistoryLog::decode_lossy(&stored, 50);
        assert_eq!(codes(decoded.entries()), vec!["987654321", "123456"]);

        assert_eq!(history.remove(0).await.map(|e| e.code), Some("987654321".into()));
        assert_eq!(history.remove(7).await, None);
        history.flush().await;
        let stored = store.get(KEY).await.unwrap().unwrap();
        assert_eq!(HistoryLog::decode_lossy(&stored, 50).len(), 1);

        history.clear().await;
        history.flush().await;
        assert_eq!(store.get(KEY).await.unwrap(), None);
        assert!(history.is_empty().await);
    }

    #[tokio::test]
    async fn test_restart_reproduces_list() {
        let store = Arc::new(SqliteStore::new(StoreConfig::in_memory()).await.unwrap());

        let history = ScanHistory::load(store.clone(), KEY, 50).await;
        history.add(entry("111111", 1_700_000_000_001)).await;
        history.add(entry("222222", 1_700_000_000_002)).await;
        history.add(entry("333333333", 1_700_000_000_003)).await;
        history.flush().await;
        let before = history.list().await;
        drop(history);

        let reloaded = ScanHistory::load(store, KEY, 50).await;
        assert_eq!(reloaded.list().await, before);
    }

    #[tokio::test]
    async fn test_corrupt_data_loads_empty() {
        let store = Arc::new(MemoryStore::new());
        store.set(KEY, b"{ definitely not a list").await.unwrap();

        let history = ScanHistory::load(store, KEY, 50).await;
        assert!(history.is_empty().await);
    }

    #[tokio::test]
    async fn test_store_failures_are_swallowed() {
        let history = ScanHistory::load(Arc::new(BrokenStore), KEY, 50).await;
        assert!(history.is_empty().await);

        history.add(entry("123456", 1)).await;
        history.clear().await;
        history.add(entry("654321", 2)).await;
        history.flush().await;

        assert_eq!(codes(&history.list().await), vec!["654321"]);
    }

    #[tokio::test]
    async fn test_rescan_returns_code() {
        let history = ScanHistory::load(Arc::new(MemoryStore::new()), KEY, 50).await;
        assert_eq!(history.rescan("123456"), "123456");
    }
}
