//! # scanline-core: Pure Scanning Logic for Scanline
//!
//! This crate is the **heart** of the continuous barcode scanner. It holds
//! every decision that does not need hardware: what a valid code looks like,
//! when a repeated code is a duplicate, which camera to prefer, and how the
//! scan history is bounded and encoded.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Scanline Architecture                            │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 scanline-engine (tokio runtime)                 │   │
//! │  │  Controller ──► CaptureSession ──► DecodeLoop ──► Feedback      │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │             ★ scanline-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │validation │  │   gate    │  │  history  │  │   │
//! │  │   │ ScanEvent │  │ normalize │  │ debounce  │  │ HistoryLog│  │   │
//! │  │   │  State    │  │  lengths  │  │  window   │  │   codec   │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO CLOCK READS • PURE FUNCTIONS                     │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (CaptureDevice, ScanEvent, ScannerState, etc.)
//! - [`error`] - ScannerError taxonomy and gate rejections
//! - [`validation`] - Code normalization and length checks
//! - [`gate`] - The two-stage ScanGate (validity, then debounce)
//! - [`devices`] - Device list cleanup and preferred-camera heuristics
//! - [`history`] - Bounded newest-first history log and its codec
//!
//! ## Example Usage
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use scanline_core::gate::{GateConfig, GateDecision, ScanGate};
//! use scanline_core::types::ScanEvent;
//!
//! let mut gate = ScanGate::new(GateConfig::default());
//! let t0 = Utc.timestamp_millis_opt(0).unwrap();
//!
//! let event = ScanEvent::new("12-34-56", "EAN-8", t0);
//! assert!(matches!(gate.accept(&event, t0), GateDecision::Accepted(_)));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod devices;
pub mod error;
pub mod gate;
pub mod history;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{ErrorKind, Rejection, RetryAction, ScannerError, ValidationError};
pub use gate::{AcceptedCode, GateConfig, GateDecision, ScanGate};
pub use history::HistoryLog;
pub use types::*;

// =============================================================================
// Crate-Level Defaults
// =============================================================================

/// Code lengths accepted by default (inventory labels are 6 or 9 digits).
pub const DEFAULT_ACCEPTED_LENGTHS: [usize; 2] = [6, 9];

/// Minimum gap between two acceptances of the same code.
pub const DEFAULT_DEBOUNCE_MS: u64 = 800;

/// Maximum number of entries kept in the scan history.
pub const DEFAULT_HISTORY_CAP: usize = 50;

/// Key under which the history is persisted.
pub const HISTORY_STORAGE_KEY: &str = "scan_history";

/// Confirmation tone frequency.
pub const DEFAULT_TONE_HZ: u32 = 1800;

/// Confirmation tone length.
pub const DEFAULT_TONE_MS: u32 = 150;

/// Ideal capture width requested from the camera.
pub const IDEAL_WIDTH: u32 = 1280;

/// Ideal capture height requested from the camera.
pub const IDEAL_HEIGHT: u32 = 720;

/// Ideal capture aspect ratio (16:9).
pub const IDEAL_ASPECT_RATIO: f64 = 16.0 / 9.0;
