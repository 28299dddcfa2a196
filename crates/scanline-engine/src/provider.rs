//! # Hardware Seams
//!
//! Traits for everything that touches hardware or a native library.
//! Platforms plug in their own implementations; [`crate::sim`] provides
//! simulated ones.
//!
//! ```text
//! ┌──────────────────┐   open_stream    ┌──────────────┐
//! │ CaptureProvider  │ ───────────────► │ FrameStream  │──► frames (mpsc)
//! │ list/open/close  │ ◄─────────────── │ id, device   │
//! └──────────────────┘   close_stream   └──────────────┘
//!
//! ┌──────────────────┐                  ┌──────────────┐
//! │  DecodeEngine    │  try_decode(&F)  │ DecodeOutcome│
//! │  (blocking)      │ ───────────────► │ Found/None/  │
//! └──────────────────┘                  │ Fault        │
//!                                       └──────────────┘
//!
//! ┌──────────────────┐   acquire()      ┌──────────────┐
//! │  AudioBackend    │ ───────────────► │ AudioOutput  │──► play_tone
//! └──────────────────┘                  └──────────────┘
//! ```

use std::f32::consts::PI;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use scanline_core::{CaptureConstraints, CaptureDevice, DeviceId};

// =============================================================================
// Frames
// =============================================================================

/// One video frame as delivered by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    /// Pixel data in whatever layout the paired decode engine expects.
    pub data: Vec<u8>,
    pub captured_at: DateTime<Utc>,
}

/// Identifies one open stream for `close_stream` and preview attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(Uuid);

impl StreamId {
    pub fn new() -> Self {
        StreamId(Uuid::new_v4())
    }
}

impl Default for StreamId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A live stream handed back by [`CaptureProvider::open_stream`].
///
/// The provider closes `frames` when the device goes away.
#[derive(Debug)]
pub struct FrameStream {
    pub id: StreamId,
    pub device_id: DeviceId,
    pub frames: mpsc::Receiver<Frame>,
}

// =============================================================================
// Capture Provider
// =============================================================================

/// Why the provider could not enumerate or open.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureFailure {
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),

    #[error("camera busy: {0}")]
    DeviceBusy(String),

    #[error("camera not found: {0}")]
    NotFound(String),

    #[error("video capture unsupported: {0}")]
    Unsupported(String),

    #[error("capture failed: {0}")]
    Other(String),
}

#[async_trait]
pub trait CaptureProvider: Send + Sync {
    /// Lists the cameras currently visible to the platform.
    async fn list_devices(&self) -> Result<Vec<CaptureDevice>, CaptureFailure>;

    /// Opens a stream honouring `constraints` as closely as possible.
    async fn open_stream(&self, constraints: &CaptureConstraints)
        -> Result<FrameStream, CaptureFailure>;

    /// Stops the hardware tracks of `stream`. Unknown ids are ignored.
    async fn close_stream(&self, stream: StreamId) -> Result<(), CaptureFailure>;
}

// =============================================================================
// Preview
// =============================================================================

/// Where the live picture is rendered.
pub trait PreviewSink: Send + Sync {
    fn attach(&self, stream: StreamId, device_id: &str);
    fn detach(&self, stream: StreamId);
}

/// Headless sink.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPreview;

impl PreviewSink for NullPreview {
    fn attach(&self, _stream: StreamId, _device_id: &str) {}
    fn detach(&self, _stream: StreamId) {}
}

// =============================================================================
// Decode Engine
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeOutcome {
    Found { text: String, symbology: String },
    NotFound,
    Fault(String),
}

/// Barcode decoder. Called on the blocking pool, one frame at a time.
pub trait DecodeEngine: Send + Sync {
    fn try_decode(&self, frame: &Frame) -> DecodeOutcome;
}

// =============================================================================
// Audio
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AudioError {
    #[error("audio output unavailable: {0}")]
    Unavailable(String),

    #[error("playback failed: {0}")]
    Playback(String),
}

/// A short sine beep with an exponential decay envelope.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tone {
    pub frequency_hz: u32,
    pub duration_ms: u32,
    pub volume: f32,
}

/// Envelope falls to 1% of peak by the end of the tone.
const DECAY_FLOOR: f32 = 0.01;

impl Tone {
    /// Synthesizes mono f32 PCM at `sample_rate`.
    pub fn render(&self, sample_rate: u32) -> Vec<f32> {
        let samples = (u64::from(sample_rate) * u64::from(self.duration_ms) / 1000) as usize;
        if samples == 0 {
            return Vec::new();
        }

        let duration_s = self.duration_ms as f32 / 1000.0;
        let decay_rate = -DECAY_FLOOR.ln() / duration_s;
        let freq = self.frequency_hz as f32;
        let rate = sample_rate as f32;

        (0..samples)
            .map(|i| {
                let t = i as f32 / rate;
                self.volume * (-decay_rate * t).exp() * (2.0 * PI * freq * t).sin()
            })
            .collect()
    }
}

/// An opened audio device.
pub trait AudioOutput: Send {
    /// Plays `tone` to completion. May block.
    fn play_tone(&mut self, tone: &Tone) -> Result<(), AudioError>;
}

/// Hands out the audio device on first use.
pub trait AudioBackend: Send + Sync {
    /// Opens the output. May block.
    fn acquire(&self) -> Result<Box<dyn AudioOutput>, AudioError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tone_render_length_and_envelope() {
        let tone = Tone {
            frequency_hz: 1800,
            duration_ms: 150,
            volume: 0.5,
        };
        let pcm = tone.render(48_000);
        assert_eq!(pcm.len(), 7_200);

        assert!(pcm.iter().all(|s| s.abs() <= 0.5 + f32::EPSILON));

        let peak = |window: &[f32]| window.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        let head = peak(&pcm[..480]);
        let tail = peak(&pcm[pcm.len() - 480..]);
        assert!(tail < head / 10.0, "head {head} tail {tail}");
    }

    #[test]
    fn test_tone_render_empty() {
        let tone = Tone {
            frequency_hz: 1800,
            duration_ms: 0,
            volume: 1.0,
        };
        assert!(tone.render(48_000).is_empty());
    }

    #[test]
    fn test_stream_ids_unique() {
        assert_ne!(StreamId::new(), StreamId::new());
    }
}
