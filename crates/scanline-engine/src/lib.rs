//! # scanline-engine: Scanner Runtime for Scanline
//!
//! Runs the continuous scanning pipeline on tokio: opens the camera, feeds
//! frames to the decode engine, gates the results, and fans accepted codes
//! out to history, audio feedback and subscribers.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       ScannerController                                 │
//! │        start / stop / switch_device / retry / dispose                   │
//! │        watch<ScannerState>  ·  broadcast<AcceptedScan>                  │
//! └───────┬──────────────────┬──────────────────────┬───────────────────────┘
//!         │                  │                      │
//!         ▼                  ▼                      ▼
//! ┌───────────────┐  ┌───────────────┐  ┌───────────────────────────────────┐
//! │ DeviceCatalog │  │ CaptureSession│  │ DecodeLoop ──► ScanGate           │
//! │ enumerate,    │  │ StreamLease   │  │ latest frame wins,                │
//! │ preferred cam │  │ (RAII close)  │  │ blocking decode off the runtime   │
//! └───────────────┘  └───────────────┘  └───────────────────────────────────┘
//!                                                  │ accepted
//!                          ┌───────────────────────┼───────────────────┐
//!                          ▼                       ▼                   ▼
//!                   ┌─────────────┐        ┌──────────────┐    ┌──────────────┐
//!                   │ ScanHistory │        │ Feedback     │    │ ScannerEvents│
//!                   │ (KV store)  │        │ (tone)       │    │ + broadcast  │
//!                   └─────────────┘        └──────────────┘    └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`controller`] - `ScannerController` state machine and builder
//! - [`session`] - Capture session with scoped stream release
//! - [`decode`] - Decode loop task
//! - [`catalog`] - Device enumeration
//! - [`history`] - Persisted scan history
//! - [`feedback`] - Confirmation tone worker
//! - [`provider`] - Hardware traits (camera, decoder, audio, preview)
//! - [`events`] - Outbound notification trait
//! - [`config`] - TOML + environment configuration
//! - [`sim`] - Simulated hardware for tests and the `scanline-sim` binary
//!
//! ## Usage
//!
//! ```rust,ignore
//! use scanline_engine::{ScannerConfig, ScannerControllerBuilder};
//!
//! let controller = ScannerControllerBuilder::new(ScannerConfig::load_or_default(None))
//!     .with_provider(camera)
//!     .with_decoder(decoder)
//!     .with_store(store)
//!     .build()
//!     .await?;
//!
//! let mut scans = controller.subscribe_scans();
//! controller.start(None).await?;
//! while let Ok(scan) = scans.recv().await {
//!     println!("{}", scan.code);
//! }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod catalog;
pub mod config;
pub mod controller;
pub mod decode;
pub mod error;
pub mod events;
pub mod feedback;
pub mod history;
pub mod provider;
pub mod session;
pub mod sim;

// =============================================================================
// Re-exports
// =============================================================================

pub use catalog::{DeviceCatalog, DeviceListing};
pub use config::ScannerConfig;
pub use controller::{ScannerController, ScannerControllerBuilder};
pub use decode::{DecodeLoop, DecodeLoopConfig, DecodeLoopHandle, DecodeStats, LoopEvent};
pub use error::{EngineError, EngineResult};
pub use events::{NoOpEvents, ScannerEvents};
pub use feedback::FeedbackEmitter;
pub use history::ScanHistory;
pub use provider::{
    AudioBackend, AudioError, AudioOutput, CaptureFailure, CaptureProvider, DecodeEngine,
    DecodeOutcome, Frame, FrameStream, NullPreview, PreviewSink, StreamId, Tone,
};
pub use session::{CaptureSession, OpenOutcome, OpenedStream, StreamLease};
