//! # Scanner Configuration
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     SCANLINE_ACCEPTED_LENGTHS=6,9                                      │
//! │     SCANLINE_DEBOUNCE_MS=800                                           │
//! │     SCANLINE_HISTORY_CAP=50                                            │
//! │     SCANLINE_BEEP=false                                                │
//! │     SCANLINE_TONE_HZ=1800                                              │
//! │     SCANLINE_DB_PATH=/tmp/scanline.db                                  │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/scanner/scanner.toml (Linux)                             │
//! │     ~/Library/Application Support/com.scanline.scanner/scanner.toml    │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [gate]
//! accepted_lengths = [6, 9]
//! debounce_ms = 800
//!
//! [history]
//! cap = 50
//! storage_key = "scan_history"
//!
//! [feedback]
//! enabled = true
//! tone_hz = 1800
//! tone_ms = 150
//!
//! [capture]
//! ideal_width = 1280
//! ideal_height = 720
//! ideal_aspect_ratio = 1.7777777777777777
//! facing = "environment"
//!
//! [decode]
//! fault_threshold = 30
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use scanline_core::{
    CaptureConstraints, Facing, GateConfig, DEFAULT_ACCEPTED_LENGTHS, DEFAULT_DEBOUNCE_MS,
    DEFAULT_HISTORY_CAP, DEFAULT_TONE_HZ, DEFAULT_TONE_MS, HISTORY_STORAGE_KEY,
    IDEAL_ASPECT_RATIO, IDEAL_HEIGHT, IDEAL_WIDTH,
};

use crate::error::{EngineError, EngineResult};
use crate::provider::Tone;

/// Audible range accepted for the confirmation tone.
const TONE_HZ_RANGE: std::ops::RangeInclusive<u32> = 20..=20_000;

// =============================================================================
// Gate Settings
// =============================================================================

/// Which codes are accepted and how often.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateSettings {
    /// Digit counts a code may have after normalization.
    #[serde(default = "default_accepted_lengths")]
    pub accepted_lengths: Vec<usize>,

    /// Same-code acceptance gap (milliseconds).
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

fn default_accepted_lengths() -> Vec<usize> {
    DEFAULT_ACCEPTED_LENGTHS.to_vec()
}

fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE_MS
}

impl Default for GateSettings {
    fn default() -> Self {
        GateSettings {
            accepted_lengths: default_accepted_lengths(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

// =============================================================================
// History Settings
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistorySettings {
    /// Maximum entries kept.
    #[serde(default = "default_history_cap")]
    pub cap: usize,

    /// Store key holding the JSON-encoded list.
    #[serde(default = "default_storage_key")]
    pub storage_key: String,
}

fn default_history_cap() -> usize {
    DEFAULT_HISTORY_CAP
}

fn default_storage_key() -> String {
    HISTORY_STORAGE_KEY.to_string()
}

impl Default for HistorySettings {
    fn default() -> Self {
        HistorySettings {
            cap: default_history_cap(),
            storage_key: default_storage_key(),
        }
    }
}

// =============================================================================
// Feedback Settings
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackSettings {
    /// Play a tone on every accepted scan.
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_tone_hz")]
    pub tone_hz: u32,

    #[serde(default = "default_tone_ms")]
    pub tone_ms: u32,

    /// Peak amplitude, 0.0 to 1.0.
    #[serde(default = "default_volume")]
    pub volume: f32,
}

fn default_true() -> bool {
    true
}

fn default_tone_hz() -> u32 {
    DEFAULT_TONE_HZ
}

fn default_tone_ms() -> u32 {
    DEFAULT_TONE_MS
}

fn default_volume() -> f32 {
    0.3
}

impl Default for FeedbackSettings {
    fn default() -> Self {
        FeedbackSettings {
            enabled: true,
            tone_hz: default_tone_hz(),
            tone_ms: default_tone_ms(),
            volume: default_volume(),
        }
    }
}

// =============================================================================
// Capture Settings
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureSettings {
    #[serde(default = "default_ideal_width")]
    pub ideal_width: u32,

    #[serde(default = "default_ideal_height")]
    pub ideal_height: u32,

    #[serde(default = "default_aspect_ratio")]
    pub ideal_aspect_ratio: f64,

    /// Preferred camera orientation when no device is pinned.
    #[serde(default)]
    pub facing: Facing,
}

fn default_ideal_width() -> u32 {
    IDEAL_WIDTH
}

fn default_ideal_height() -> u32 {
    IDEAL_HEIGHT
}

fn default_aspect_ratio() -> f64 {
    IDEAL_ASPECT_RATIO
}

impl Default for CaptureSettings {
    fn default() -> Self {
        CaptureSettings {
            ideal_width: default_ideal_width(),
            ideal_height: default_ideal_height(),
            ideal_aspect_ratio: default_aspect_ratio(),
            facing: Facing::Environment,
        }
    }
}

// =============================================================================
// Decode Settings
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodeSettings {
    /// Consecutive engine faults before the loop gives up.
    #[serde(default = "default_fault_threshold")]
    pub fault_threshold: u32,
}

fn default_fault_threshold() -> u32 {
    30
}

impl Default for DecodeSettings {
    fn default() -> Self {
        DecodeSettings {
            fault_threshold: default_fault_threshold(),
        }
    }
}

// =============================================================================
// Storage Settings
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSettings {
    /// SQLite file. Defaults to `scanline.db` in the platform data dir.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

// =============================================================================
// Main Scanner Configuration
// =============================================================================

/// Complete scanner configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScannerConfig {
    #[serde(default)]
    pub gate: GateSettings,

    #[serde(default)]
    pub history: HistorySettings,

    #[serde(default)]
    pub feedback: FeedbackSettings,

    #[serde(default)]
    pub capture: CaptureSettings,

    #[serde(default)]
    pub decode: DecodeSettings,

    #[serde(default)]
    pub storage: StorageSettings,
}

impl ScannerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (scanner.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> EngineResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading scanner config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load scanner config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file as pretty TOML.
    pub fn save(&self, config_path: Option<PathBuf>) -> EngineResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| EngineError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| EngineError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| EngineError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Scanner config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> EngineResult<()> {
        if self.gate.accepted_lengths.is_empty() {
            return Err(EngineError::InvalidConfig(
                "accepted_lengths must not be empty".into(),
            ));
        }

        if self.gate.accepted_lengths.contains(&0) {
            return Err(EngineError::InvalidConfig(
                "accepted_lengths must not contain 0".into(),
            ));
        }

        if self.history.cap == 0 {
            return Err(EngineError::InvalidConfig(
                "history cap must be greater than 0".into(),
            ));
        }

        if self.history.storage_key.trim().is_empty() {
            return Err(EngineError::InvalidConfig(
                "history storage_key must not be empty".into(),
            ));
        }

        if !TONE_HZ_RANGE.contains(&self.feedback.tone_hz) {
            return Err(EngineError::InvalidConfig(format!(
                "tone_hz must be between {} and {}, got {}",
                TONE_HZ_RANGE.start(),
                TONE_HZ_RANGE.end(),
                self.feedback.tone_hz
            )));
        }

        if self.feedback.tone_ms == 0 {
            return Err(EngineError::InvalidConfig(
                "tone_ms must be greater than 0".into(),
            ));
        }

        if !(0.0..=1.0).contains(&self.feedback.volume) {
            return Err(EngineError::InvalidConfig(
                "volume must be between 0.0 and 1.0".into(),
            ));
        }

        if self.capture.ideal_width == 0 || self.capture.ideal_height == 0 {
            return Err(EngineError::InvalidConfig(
                "capture resolution must be non-zero".into(),
            ));
        }

        if !(self.capture.ideal_aspect_ratio > 0.0) {
            return Err(EngineError::InvalidConfig(
                "ideal_aspect_ratio must be positive".into(),
            ));
        }

        if self.decode.fault_threshold == 0 {
            return Err(EngineError::InvalidConfig(
                "fault_threshold must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(lengths) = lookup("SCANLINE_ACCEPTED_LENGTHS") {
            let parsed: Result<Vec<usize>, _> = lengths
                .split(',')
                .map(|part| part.trim().parse::<usize>())
                .collect();
            match parsed {
                Ok(parsed) => {
                    debug!(lengths = %lengths, "Overriding accepted lengths from environment");
                    self.gate.accepted_lengths = parsed;
                }
                Err(_) => warn!(lengths = %lengths, "Invalid SCANLINE_ACCEPTED_LENGTHS"),
            }
        }

        if let Some(ms) = lookup("SCANLINE_DEBOUNCE_MS") {
            if let Ok(ms) = ms.parse::<u64>() {
                debug!(debounce_ms = ms, "Overriding debounce window from environment");
                self.gate.debounce_ms = ms;
            }
        }

        if let Some(cap) = lookup("SCANLINE_HISTORY_CAP") {
            if let Ok(cap) = cap.parse::<usize>() {
                self.history.cap = cap;
            }
        }

        if let Some(beep) = lookup("SCANLINE_BEEP") {
            match beep.to_lowercase().as_str() {
                "1" | "true" | "on" | "yes" => self.feedback.enabled = true,
                "0" | "false" | "off" | "no" => self.feedback.enabled = false,
                _ => warn!(beep = %beep, "Unknown SCANLINE_BEEP value"),
            }
        }

        if let Some(hz) = lookup("SCANLINE_TONE_HZ") {
            if let Ok(hz) = hz.parse::<u32>() {
                self.feedback.tone_hz = hz;
            }
        }

        if let Some(path) = lookup("SCANLINE_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.storage.database_path = Some(PathBuf::from(path));
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "scanline", "scanner")
            .map(|dirs| dirs.config_dir().join("scanner.toml"))
    }

    /// Configured database path, else `scanline.db` in the platform data dir.
    pub fn database_path(&self) -> Option<PathBuf> {
        self.storage.database_path.clone().or_else(|| {
            directories::ProjectDirs::from("com", "scanline", "scanner")
                .map(|dirs| dirs.data_dir().join("scanline.db"))
        })
    }

    // =========================================================================
    // Conversions
    // =========================================================================

    pub fn gate_config(&self) -> GateConfig {
        GateConfig {
            accepted_lengths: self.gate.accepted_lengths.iter().copied().collect(),
            debounce_window_ms: self.gate.debounce_ms,
        }
    }

    pub fn tone(&self) -> Tone {
        Tone {
            frequency_hz: self.feedback.tone_hz,
            duration_ms: self.feedback.tone_ms,
            volume: self.feedback.volume,
        }
    }

    pub fn capture_constraints(&self) -> CaptureConstraints {
        CaptureConstraints {
            device_id: None,
            facing: self.capture.facing,
            ideal_width: self.capture.ideal_width,
            ideal_height: self.capture.ideal_height,
            ideal_aspect_ratio: self.capture.ideal_aspect_ratio,
        }
    }
}
