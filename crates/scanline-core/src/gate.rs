//! # Scan Gate
//!
//! Decides whether a decoded symbol becomes an accepted scan.
//!
//! ## Pipeline
//! ```text
//! ScanEvent.raw_text
//!      │
//!      ▼
//! normalize (digits only)
//!      │
//!      ▼
//! length ∈ accepted_lengths? ──no──► Rejected(Invalid)
//!      │ yes
//!      ▼
//! same code as last accepted
//! and now - last < window?   ──yes─► Rejected(Duplicate)
//!      │ no
//!      ▼
//! Accepted, remember (code, now)
//! ```
//!
//! A camera held over a label decodes it many times per second; the
//! debounce window collapses that burst into one acceptance. Only accepted
//! codes update the debounce memory, so a stream of invalid reads never
//! resets the window of a valid one.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};

use crate::error::Rejection;
use crate::types::{AcceptedScan, ScanEvent};
use crate::validation::normalize_and_validate;
use crate::{DEFAULT_ACCEPTED_LENGTHS, DEFAULT_DEBOUNCE_MS};

/// Gate parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateConfig {
    pub accepted_lengths: BTreeSet<usize>,
    pub debounce_window_ms: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            accepted_lengths: DEFAULT_ACCEPTED_LENGTHS.into_iter().collect(),
            debounce_window_ms: DEFAULT_DEBOUNCE_MS,
        }
    }
}

impl GateConfig {
    fn window(&self) -> Duration {
        Duration::milliseconds(i64::try_from(self.debounce_window_ms).unwrap_or(i64::MAX))
    }
}

/// A code that made it through the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedCode {
    pub code: String,
    pub raw_text: String,
    pub symbology: String,
    pub observed_at: DateTime<Utc>,
}

impl From<AcceptedCode> for AcceptedScan {
    fn from(accepted: AcceptedCode) -> Self {
        AcceptedScan {
            code: accepted.code,
            symbology: accepted.symbology,
            observed_at: accepted.observed_at,
        }
    }
}

/// Result of [`ScanGate::accept`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Accepted(AcceptedCode),
    Rejected(Rejection),
}

impl GateDecision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, GateDecision::Accepted(_))
    }
}

/// Validity check plus debounce over the last accepted code.
#[derive(Debug, Clone, Default)]
pub struct ScanGate {
    config: GateConfig,
    last: Option<(String, DateTime<Utc>)>,
}

impl ScanGate {
    pub fn new(config: GateConfig) -> Self {
        Self { config, last: None }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Runs `event` through the gate at time `now`.
    ///
    /// A clock that went backwards (`now` before the last acceptance)
    /// counts as inside the window.
    pub fn accept(&mut self, event: &ScanEvent, now: DateTime<Utc>) -> GateDecision {
        let code = match normalize_and_validate(&event.raw_text, &self.config.accepted_lengths) {
            Ok(code) => code,
            Err(err) => return GateDecision::Rejected(Rejection::Invalid(err)),
        };

        if let Some((last_code, last_at)) = &self.last {
            if *last_code == code {
                let elapsed = now.signed_duration_since(*last_at);
                if elapsed < self.config.window() {
                    return GateDecision::Rejected(Rejection::Duplicate {
                        code,
                        elapsed_ms: elapsed.num_milliseconds(),
                    });
                }
            }
        }

        self.last = Some((code.clone(), now));
        GateDecision::Accepted(AcceptedCode {
            code,
            raw_text: event.raw_text.clone(),
            symbology: event.symbology.clone(),
            observed_at: now,
        })
    }

    /// Forgets the last accepted code.
    pub fn reset(&mut self) {
        self.last = None;
    }

    pub fn last_accepted(&self) -> Option<&str> {
        self.last.as_ref().map(|(code, _)| code.as_str())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
