//! # Decode Loop
//!
//! Pulls frames from an open stream and runs the decode engine on them.
//!
//! ## Loop Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   frames.recv() ◄──── shutdown? ──► exit(Stopped)                      │
//! │        │                                                                │
//! │        ├── None ──────────────────► LoopEvent::StreamEnded, exit       │
//! │        ▼                                                                │
//! │   drain queue, keep newest (count drops)                               │
//! │        │                                                                │
//! │        ▼                                                                │
//! │   spawn_blocking(engine.try_decode)                                    │
//! │        │                                                                │
//! │        ├── NotFound ──► silent                                         │
//! │        ├── Found ─────► LoopEvent::Scan(ScanEvent)                     │
//! │        └── Fault ─────► count; threshold reached?                      │
//! │                             └── yes ─► LoopEvent::Fault, exit          │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The loop has no memory across frames beyond the consecutive-fault
//! counter. Validation and debounce happen downstream in the gate.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use scanline_core::ScanEvent;

use crate::provider::{DecodeEngine, DecodeOutcome, Frame};

/// What the loop reports to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopEvent {
    /// The engine found a symbol. Not yet validated.
    Scan(ScanEvent),

    /// `consecutive` faults in a row; the loop has exited.
    Fault { consecutive: u32, message: String },

    /// The provider closed the frame channel; the loop has exited.
    StreamEnded,
}

/// Counters reported when the loop exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
    pub frames_seen: u64,
    pub frames_dropped: u64,
    pub symbols_found: u64,
    pub faults: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct DecodeLoopConfig {
    pub fault_threshold: u32,
}

impl Default for DecodeLoopConfig {
    fn default() -> Self {
        DecodeLoopConfig { fault_threshold: 30 }
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Handle for stopping a running decode loop.
pub struct DecodeLoopHandle {
    shutdown_tx: mpsc::Sender<()>,
    join: JoinHandle<DecodeStats>,
}

impl DecodeLoopHandle {
    /// Signals the loop and waits for it to exit.
    ///
    /// A decode already in flight finishes first; its result is discarded.
    pub async fn stop(self) -> DecodeStats {
        let _ = self.shutdown_tx.send(()).await;
        match self.join.await {
            Ok(stats) => stats,
            Err(e) => {
                warn!(error = %e, "Decode loop task failed");
                DecodeStats::default()
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

// =============================================================================
// Decode Loop
// =============================================================================

pub struct DecodeLoop {
    frames: mpsc::Receiver<Frame>,
    engine: Arc<dyn DecodeEngine>,
    config: DecodeLoopConfig,
    events_tx: mpsc::Sender<LoopEvent>,
    shutdown_rx: mpsc::Receiver<()>,
    stats: DecodeStats,
    consecutive_faults: u32,
}

impl DecodeLoop {
    /// Spawns the loop on the current runtime.
    pub fn spawn(
        frames: mpsc::Receiver<Frame>,
        engine: Arc<dyn DecodeEngine>,
        config: DecodeLoopConfig,
        events_tx: mpsc::Sender<LoopEvent>,
    ) -> DecodeLoopHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let decode_loop = DecodeLoop {
            frames,
            engine,
            config,
            events_tx,
            shutdown_rx,
            stats: DecodeStats::default(),
            consecutive_faults: 0,
        };
        let join = tokio::spawn(decode_loop.run());
        DecodeLoopHandle { shutdown_tx, join }
    }

    async fn run(mut self) -> DecodeStats {
        info!(fault_threshold = self.config.fault_threshold, "Decode loop started");

        loop {
            let frame = tokio::select! {
                biased;
                _ = self.shutdown_rx.recv() => {
                    debug!("Decode loop received shutdown");
                    break;
                }
                frame = self.frames.recv() => frame,
            };

            let Some(frame) = frame else {
                info!("Frame stream ended");
                let _ = self.events_tx.send(LoopEvent::StreamEnded).await;
                break;
            };

            let frame = self.latest(frame);
            self.stats.frames_seen += 1;

            let engine = self.engine.clone();
            let captured_at = frame.captured_at;
            let sequence = frame.sequence;
            let outcome = tokio::task::spawn_blocking(move || engine.try_decode(&frame))
                .await
                .unwrap_or_else(|e| DecodeOutcome::Fault(format!("decoder panicked: {e}")));

            if self.shutdown_rx.try_recv().is_ok() {
                debug!("Shutdown requested during decode, discarding result");
                break;
            }

            let event = match outcome {
                DecodeOutcome::NotFound => {
                    self.consecutive_faults = 0;
                    continue;
                }
                DecodeOutcome::Found { text, symbology } => {
                    self.consecutive_faults = 0;
                    self.stats.symbols_found += 1;
                    debug!(sequence, raw = %text, %symbology, "Symbol found");
                    LoopEvent::Scan(ScanEvent::new(text, symbology, captured_at))
                }
                DecodeOutcome::Fault(message) => {
                    self.consecutive_faults += 1;
                    self.stats.faults += 1;
                    debug!(sequence, consecutive = self.consecutive_faults, %message, "Decoder fault");
                    if self.consecutive_faults < self.config.fault_threshold {
                        continue;
                    }
                    warn!(consecutive = self.consecutive_faults, %message, "Sustained decoder faults, stopping loop");
                    let _ = self
                        .events_tx
                        .send(LoopEvent::Fault {
                            consecutive: self.consecutive_faults,
                            message,
                        })
                        .await;
                    break;
                }
            };

            if self.events_tx.send(event).await.is_err() {
                debug!("Event receiver gone, stopping decode loop");
                break;
            }
        }

        info!(
            frames_seen = self.stats.frames_seen,
            frames_dropped = self.stats.frames_dropped,
            symbols_found = self.stats.symbols_found,
            faults = self.stats.faults,
            "Decode loop stopped"
        );
        self.stats
    }

    /// Discards queued frames older than the newest one.
    fn latest(&mut self, mut frame: Frame) -> Frame {
        while let Ok(newer) = self.frames.try_recv() {
            self.stats.frames_dropped += 1;
            frame = newer;
        }
        frame
    }
}
