//! # Domain Types
//!
//! Core domain types shared by every layer of Scanline.
//!
//! ## Type Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  CaptureDevice  │   │    ScanEvent    │   │  HistoryEntry   │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (opaque)    │   │  raw_text       │   │  code           │       │
//! │  │  display_label  │   │  normalized_code│   │  symbology      │       │
//! │  └─────────────────┘   │  symbology      │   │  observed_at    │       │
//! │                        │  observed_at    │   └─────────────────┘       │
//! │                        └─────────────────┘                              │
//! │                                                                         │
//! │  ┌─────────────────────────────────────┐   ┌─────────────────┐         │
//! │  │           ScannerState              │   │  ScannerPhase   │         │
//! │  │  ─────────────────────────────────  │   │  ─────────────  │         │
//! │  │  initialized / scanning             │   │  Idle           │         │
//! │  │  permission_granted (tri-state)     │   │  Initializing   │         │
//! │  │  selected_device                    │   │  Ready          │         │
//! │  │  available_devices                  │   │  Scanning       │         │
//! │  │  last_accepted_code                 │   │  Error          │         │
//! │  │  current_error                      │   │  Stopped        │         │
//! │  └─────────────────────────────────────┘   └─────────────────┘         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Ownership
//! `ScannerState` is written by exactly one owner (the controller in
//! scanline-engine) and read everywhere else as an immutable snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::ScannerError;
use crate::validation::normalize_code;
use crate::{IDEAL_ASPECT_RATIO, IDEAL_HEIGHT, IDEAL_WIDTH};

/// Opaque device identifier handed out by the capture provider.
pub type DeviceId = String;

// =============================================================================
// Capture Devices
// =============================================================================

/// A camera as reported by one enumeration.
///
/// Ids are only stable within an enumeration; a later enumeration may
/// hand out different ids for the same hardware.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CaptureDevice {
    /// Opaque provider id.
    pub id: DeviceId,

    /// Human-readable label ("Back Camera", "FaceTime HD", ...).
    pub display_label: String,
}

impl CaptureDevice {
    pub fn new(id: impl Into<String>, display_label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_label: display_label.into(),
        }
    }
}

/// Which way a camera points, as far as we can tell from its label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum Facing {
    /// Rear camera, the one you point at a shelf label.
    #[default]
    Environment,
    /// Front camera.
    User,
    /// Label gives no hint.
    Unknown,
}

/// What we ask the capture provider for when opening a stream.
///
/// Every field is a preference except `device_id`, which pins the exact
/// device when present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureConstraints {
    pub device_id: Option<DeviceId>,
    pub facing: Facing,
    pub ideal_width: u32,
    pub ideal_height: u32,
    pub ideal_aspect_ratio: f64,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            device_id: None,
            facing: Facing::Environment,
            ideal_width: IDEAL_WIDTH,
            ideal_height: IDEAL_HEIGHT,
            ideal_aspect_ratio: IDEAL_ASPECT_RATIO,
        }
    }
}

impl CaptureConstraints {
    /// Same preferences, pinned to `device_id` (or unpinned for `None`).
    pub fn for_device(&self, device_id: Option<DeviceId>) -> Self {
        Self {
            device_id,
            ..self.clone()
        }
    }
}

// =============================================================================
// Scans
// =============================================================================

/// A symbol the decode engine found in a frame. Not yet validated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanEvent {
    /// Text exactly as the decoder returned it.
    pub raw_text: String,

    /// `raw_text` with every non-digit removed.
    pub normalized_code: String,

    /// Symbology name reported by the decoder ("EAN-8", "CODE-128", ...).
    pub symbology: String,

    pub observed_at: DateTime<Utc>,
}

impl ScanEvent {
    /// Builds an event, deriving `normalized_code` from `raw_text`.
    pub fn new(
        raw_text: impl Into<String>,
        symbology: impl Into<String>,
        observed_at: DateTime<Utc>,
    ) -> Self {
        let raw_text = raw_text.into();
        let normalized_code = normalize_code(&raw_text);
        Self {
            raw_text,
            normalized_code,
            symbology: symbology.into(),
            observed_at,
        }
    }
}

/// A scan that passed the gate. Delivered once per physical scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct AcceptedScan {
    pub code: String,
    pub symbology: String,
    #[ts(as = "String")]
    pub observed_at: DateTime<Utc>,
}

/// One row of the persisted scan history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct HistoryEntry {
    pub code: String,
    pub symbology: String,
    #[ts(as = "String")]
    pub observed_at: DateTime<Utc>,
}

impl From<&AcceptedScan> for HistoryEntry {
    fn from(scan: &AcceptedScan) -> Self {
        Self {
            code: scan.code.clone(),
            symbology: scan.symbology.clone(),
            observed_at: scan.observed_at,
        }
    }
}

// =============================================================================
// Scanner State
// =============================================================================

/// Position of the controller in its state machine.
///
/// ```text
/// Idle ──► Initializing ──► Ready ──► Scanning ◄──► Error(recoverable)
///                 │                      │
///                 └──► Error(fatal) ◄────┘
///
/// any ──stop()──► Stopped ──start()──► Scanning
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ScannerPhase {
    #[default]
    Idle,
    Initializing,
    Ready,
    Scanning,
    Error,
    Stopped,
}

/// Snapshot of everything the UI needs to render the scanner.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ScannerState {
    pub phase: ScannerPhase,

    /// Devices have been enumerated at least once.
    pub initialized: bool,

    /// A capture session is open and its decode loop is running.
    pub scanning: bool,

    /// `None` until the provider has told us either way.
    pub permission_granted: Option<bool>,

    pub selected_device: Option<DeviceId>,

    pub available_devices: Vec<CaptureDevice>,

    pub last_accepted_code: Option<String>,

    pub current_error: Option<ScannerError>,
}

impl ScannerState {
    /// `scanning` implies `initialized`, no fatal error, and the
    /// `Scanning` phase.
    pub fn is_consistent(&self) -> bool {
        if !self.scanning {
            return true;
        }
        let error_ok = self
            .current_error
            .as_ref()
            .map_or(true, |err| err.recoverable);
        self.initialized && error_ok && self.phase == ScannerPhase::Scanning
    }

    /// Whether `retry()` has something to do.
    pub fn can_retry(&self) -> bool {
        self.current_error
            .as_ref()
            .is_some_and(ScannerError::is_retryable)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
