//! # Engine Error Types
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Engine Error Categories                            │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │    Scanner      │  │     Lifecycle           │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Scanner(..)    │  │  NothingToRetry         │ │
//! │  │  ConfigLoad     │  │  (permission,   │  │  Disposed               │ │
//! │  │  ConfigSave     │  │   camera, ...)  │  │  MissingComponent       │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Store failures never reach callers: history writes log and move on.

use thiserror::Error;

use scanline_core::ScannerError;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Configuration values out of range.
    #[error("Invalid scanner configuration: {0}")]
    InvalidConfig(String),

    /// Failed to read or parse the config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to write the config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Scanner Errors
    // =========================================================================
    /// Capture or decode failure, also published in `ScannerState`.
    #[error("Scanner error: {0}")]
    Scanner(#[from] ScannerError),

    // =========================================================================
    // Lifecycle Errors
    // =========================================================================
    /// `retry()` called without a recoverable error to act on.
    #[error("Nothing to retry")]
    NothingToRetry,

    /// The controller has been disposed.
    #[error("Scanner controller has been disposed")]
    Disposed,

    /// A required collaborator was not supplied to the builder.
    #[error("Missing component: {0}")]
    MissingComponent(&'static str),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(err: toml::de::Error) -> Self {
        EngineError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for EngineError {
    fn from(err: toml::ser::Error) -> Self {
        EngineError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl EngineError {
    /// True when `retry()` could make progress.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Scanner(err) => err.is_retryable(),
            _ => false,
        }
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidConfig(_)
                | EngineError::ConfigLoadFailed(_)
                | EngineError::ConfigSaveFailed(_)
        )
    }

    /// The scanner failure, if this error carries one.
    pub fn scanner_error(&self) -> Option<&ScannerError> {
        match self {
            EngineError::Scanner(err) => Some(err),
            _ => None,
        }
    }
}
