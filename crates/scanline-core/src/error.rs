//! # Error Types
//!
//! Domain-specific error types for scanline-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  scanline-core errors (this file)                                      │
//! │  ├── ScannerError     - Surfaced to ScannerState and the error sink    │
//! │  ├── ValidationError  - Code failed normalization/length checks        │
//! │  └── Rejection        - Why the gate turned a scan away                │
//! │                                                                         │
//! │  scanline-store errors (separate crate)                                │
//! │  └── StoreError       - Persistence failures                           │
//! │                                                                         │
//! │  scanline-engine errors (separate crate)                               │
//! │  └── EngineError      - Config, scanner, lifecycle failures            │
//! │                                                                         │
//! │  Flow: CaptureFailure → ScannerError → ScannerState → UI               │
//! │        Rejection → debug log only (never surfaced)                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Retry Actions
//! A recoverable `ScannerError` carries a [`RetryAction`] describing what
//! `retry()` will do. It is plain data so the UI can render a button for it
//! and the controller can execute it without holding a closure.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;

// =============================================================================
// Error Kind
// =============================================================================

/// Category of a scanner failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The user or OS refused camera access.
    Permission,
    /// Device busy, unplugged, or otherwise unreadable.
    CameraUnavailable,
    /// The decode engine keeps faulting.
    DecodeFailure,
    /// The platform cannot capture video at all.
    Unsupported,
    /// A scanned code did not pass validation.
    ValidationFailure,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Permission => "permission",
            ErrorKind::CameraUnavailable => "camera_unavailable",
            ErrorKind::DecodeFailure => "decode_failure",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::ValidationFailure => "validation_failure",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Retry Action
// =============================================================================

/// What `retry()` does for a recoverable error.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RetryAction {
    /// Nothing to retry.
    #[default]
    None,

    /// Open the device again with the same parameters.
    ReopenDevice { device_id: Option<String> },

    /// Tear the whole session down and start it again.
    RestartSession { device_id: Option<String> },
}

impl RetryAction {
    /// Device the action targets, if any.
    pub fn device_id(&self) -> Option<&str> {
        match self {
            RetryAction::None => None,
            RetryAction::ReopenDevice { device_id } | RetryAction::RestartSession { device_id } => {
                device_id.as_deref()
            }
        }
    }
}

// =============================================================================
// Scanner Error
// =============================================================================

/// A capture or decode failure, as surfaced to the UI.
///
/// ## Recoverability
/// | Kind                | Recoverable | Retry              |
/// |---------------------|-------------|--------------------|
/// | Permission          | no          | None               |
/// | Unsupported         | no          | None               |
/// | CameraUnavailable   | yes         | ReopenDevice       |
/// | DecodeFailure       | yes         | RestartSession     |
/// | ValidationFailure   | yes         | None               |
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize, TS)]
#[ts(export)]
#[error("{kind}: {message}")]
pub struct ScannerError {
    pub kind: ErrorKind,
    pub message: String,
    pub recoverable: bool,
    pub retry_action: RetryAction,
}

impl ScannerError {
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Permission,
            message: message.into(),
            recoverable: false,
            retry_action: RetryAction::None,
        }
    }

    pub fn camera_unavailable(message: impl Into<String>, device_id: Option<String>) -> Self {
        Self {
            kind: ErrorKind::CameraUnavailable,
            message: message.into(),
            recoverable: true,
            retry_action: RetryAction::ReopenDevice { device_id },
        }
    }

    pub fn decode_failure(message: impl Into<String>, device_id: Option<String>) -> Self {
        Self {
            kind: ErrorKind::DecodeFailure,
            message: message.into(),
            recoverable: true,
            retry_action: RetryAction::RestartSession { device_id },
        }
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Unsupported,
            message: message.into(),
            recoverable: false,
            retry_action: RetryAction::None,
        }
    }

    /// Recoverable and carrying something for `retry()` to do.
    pub fn is_retryable(&self) -> bool {
        self.recoverable && self.retry_action != RetryAction::None
    }

    /// Scanning cannot continue until the user changes something outside
    /// the app (permissions, hardware).
    pub fn is_fatal(&self) -> bool {
        !self.recoverable
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// A code failed normalization or length checks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Nothing left after stripping non-digits.
    #[error("code has no digits")]
    Empty,

    /// Digit count not in the accepted set.
    #[error("code {code} has length {length}, expected one of {allowed:?}")]
    InvalidLength {
        code: String,
        length: usize,
        allowed: Vec<usize>,
    },
}

// =============================================================================
// Rejection
// =============================================================================

/// Why the gate rejected a scan. Logged at debug level, never surfaced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("invalid: {0}")]
    Invalid(#[from] ValidationError),

    /// Same code seen again inside the debounce window.
    #[error("duplicate {code} after {elapsed_ms}ms")]
    Duplicate { code: String, elapsed_ms: i64 },
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ScannerError::camera_unavailable("device busy", Some("cam1".into()));
        assert_eq!(err.to_string(), "camera_unavailable: device busy");

        let err = ValidationError::InvalidLength {
            code: "1234".into(),
            length: 4,
            allowed: vec![6, 9],
        };
        assert_eq!(
            err.to_string(),
            "code 1234 has length 4, expected one of [6, 9]"
        );
    }

    #[test]
    fn test_recoverability_table() {
        let perm = ScannerError::permission_denied("denied");
        assert!(perm.is_fatal());
        assert!(!perm.is_retryable());
        assert_eq!(perm.retry_action, RetryAction::None);

        let busy = ScannerError::camera_unavailable("busy", Some("cam1".into()));
        assert!(busy.is_retryable());
        assert_eq!(busy.retry_action.device_id(), Some("cam1"));

        let decode = ScannerError::decode_failure("faults", None);
        assert!(matches!(
            decode.retry_action,
            RetryAction::RestartSession { device_id: None }
        ));

        let unsupported = ScannerError::unsupported("no camera api");
        assert!(unsupported.is_fatal());
    }

    #[test]
    fn test_retry_action_serializes_tagged() {
        let action = RetryAction::ReopenDevice {
            device_id: Some("cam1".into()),
        };
        let json = serde_json::to_string(&action).unwrap();
        assert_eq!(json, r#"{"type":"reopen_device","device_id":"cam1"}"#);
    }

    #[test]
    fn test_validation_converts_to_rejection() {
        let rejection: Rejection = ValidationError::Empty.into();
        assert!(matches!(rejection, Rejection::Invalid(ValidationError::Empty)));
    }
}
