//! # Scan History Log
//!
//! Bounded, newest-first list of accepted scans plus its storage codec.
//!
//! ```text
//! push(C) with cap = 3
//!
//!   before: [B, A, Z]        after: [C, B, A]      (Z evicted)
//!            ▲ newest                 ▲ newest
//! ```
//!
//! The log itself does no I/O. `scanline-engine` wraps it and persists
//! `encode()` output after every mutation. Persisted bytes are a JSON array
//! of [`HistoryEntry`]; anything that fails to parse loads as an empty log.

use crate::types::HistoryEntry;
use crate::DEFAULT_HISTORY_CAP;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryLog {
    entries: Vec<HistoryEntry>,
    cap: usize,
}

impl Default for HistoryLog {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAP)
    }
}

impl HistoryLog {
    /// Empty log holding at most `cap` entries (at least one).
    pub fn new(cap: usize) -> Self {
        Self {
            entries: Vec::new(),
            cap: cap.max(1),
        }
    }

    /// Builds a log from stored entries, newest first, truncated to `cap`.
    pub fn from_entries(mut entries: Vec<HistoryEntry>, cap: usize) -> Self {
        let cap = cap.max(1);
        entries.truncate(cap);
        Self { entries, cap }
    }

    /// Prepends `entry`, evicting the oldest beyond the cap.
    pub fn push(&mut self, entry: HistoryEntry) {
        self.entries.insert(0, entry);
        self.entries.truncate(self.cap);
    }

    /// Removes the entry at `index` (0 = newest). Out of range is a no-op.
    pub fn remove(&mut self, index: usize) -> Option<HistoryEntry> {
        if index < self.entries.len() {
            Some(self.entries.remove(index))
        } else {
            None
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Serializes the entries as a JSON array.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.entries)
    }

    /// Parses stored bytes, falling back to an empty log on any error.
    pub fn decode_lossy(bytes: &[u8], cap: usize) -> Self {
        match serde_json::from_slice::<Vec<HistoryEntry>>(bytes) {
            Ok(entries) => Self::from_entries(entries, cap),
            Err(_) => Self::new(cap),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
