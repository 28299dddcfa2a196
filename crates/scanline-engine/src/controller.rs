//! # Scanner Controller
//!
//! Single owner of the scanner state machine. Everything that changes
//! `ScannerState` goes through here; everyone else reads snapshots.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Idle ──initialize──► Initializing ──► Ready ──start──► Scanning       │
//! │                            │                              │   ▲         │
//! │                            ▼                   failure    ▼   │ retry   │
//! │                     Error(fatal)  ◄── permission ── Error(recoverable)  │
//! │                                                                         │
//! │  any ──stop()──► Stopped ──start()──► Scanning                         │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Scan Pipeline
//! ```text
//! CaptureSession ──frames──► DecodeLoop ──LoopEvent──► dispatcher task
//!                                                          │
//!                                        ScanGate.accept ◄─┘
//!                                              │ Accepted
//!                                              ▼
//!                     history.add ──► feedback.beep ──► on_scan ──► broadcast
//! ```
//!
//! ## Concurrency
//! Lifecycle operations (`start`, `stop`, `switch_device`, `retry`,
//! `dispose`) serialize on one async mutex, so at most one capture session
//! exists and a session is fully torn down before the next open.
//!
//! `stop` and `dispose` bump a generation counter *before* queueing on that
//! mutex. A `start` that was waiting gives up, and an open that was in
//! flight releases its fresh stream instead of publishing it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use scanline_core::{
    AcceptedScan, CaptureConstraints, CaptureDevice, DeviceId, ErrorKind, GateDecision,
    HistoryEntry, ScanEvent, ScanGate, ScannerError, ScannerPhase, ScannerState,
};
use scanline_store::{KeyValueStore, MemoryStore};

use crate::catalog::{DeviceCatalog, DeviceListing};
use crate::config::ScannerConfig;
use crate::decode::{DecodeLoop, DecodeLoopConfig, DecodeLoopHandle, LoopEvent};
use crate::error::{EngineError, EngineResult};
use crate::events::{NoOpEvents, ScannerEvents};
use crate::feedback::FeedbackEmitter;
use crate::history::ScanHistory;
use crate::provider::{AudioBackend, CaptureProvider, DecodeEngine, NullPreview, PreviewSink, StreamId};
use crate::session::{CaptureSession, OpenOutcome};

/// Loop events buffered between the decode loop and the dispatcher.
const LOOP_EVENT_BUFFER: usize = 16;

/// Accepted scans buffered per broadcast subscriber.
const SCAN_BROADCAST_CAPACITY: usize = 64;

// =============================================================================
// Controller
// =============================================================================

/// Cheap-to-clone handle on the scanner.
#[derive(Clone)]
pub struct ScannerController {
    inner: Arc<Inner>,
}

struct Lifecycle {
    session: CaptureSession,
    decode: Option<DecodeLoopHandle>,
    dispatcher: Option<JoinHandle<()>>,
}

struct Inner {
    constraints: CaptureConstraints,
    decode_config: DecodeLoopConfig,
    catalog: DeviceCatalog,
    decoder: Arc<dyn DecodeEngine>,

    lifecycle: Mutex<Lifecycle>,
    generation: AtomicU64,
    disposed: AtomicBool,

    state_tx: watch::Sender<ScannerState>,
    scans_tx: broadcast::Sender<AcceptedScan>,

    gate: Mutex<ScanGate>,
    history: Arc<ScanHistory>,
    feedback: FeedbackEmitter,
    events: Arc<dyn ScannerEvents>,
}

impl ScannerController {
    /// Enumerates devices and picks the preferred one. Runs implicitly on
    /// the first `start`.
    pub async fn initialize(&self) -> EngineResult<ScannerState> {
        self.inner.ensure_live()?;
        let _lifecycle = self.inner.lifecycle.lock().await;
        if !self.inner.state_tx.borrow().initialized {
            self.inner.initialize_locked().await?;
        }
        Ok(self.state())
    }

    /// Re-enumerates without touching the open session.
    pub async fn refresh_devices(&self) -> EngineResult<Vec<CaptureDevice>> {
        self.inner.ensure_live()?;
        let _lifecycle = self.inner.lifecycle.lock().await;
        let listing = self.inner.catalog.enumerate().await.map_err(|e| {
            warn!(error = %e, "Device refresh failed");
            EngineError::from(e)
        })?;
        let devices = listing.devices.clone();
        self.inner.apply_listing(listing, false);
        Ok(devices)
    }

    /// Opens `device_id` (or the selected/preferred device) and starts
    /// decoding.
    ///
    /// Starting the device that is already scanning is a no-op; starting a
    /// different one switches to it.
    pub async fn start(&self, device_id: Option<DeviceId>) -> EngineResult<()> {
        let inner = &self.inner;
        inner.ensure_live()?;

        let generation = inner.generation.load(Ordering::SeqCst);
        let mut lifecycle = inner.lifecycle.lock().await;
        if inner.generation.load(Ordering::SeqCst) != generation {
            info!("Start superseded by stop");
            return Ok(());
        }

        if !inner.state_tx.borrow().initialized {
            inner.initialize_locked().await?;
        }

        let target = device_id.or_else(|| inner.state_tx.borrow().selected_device.clone());

        if let Some(current) = lifecycle.session.device_id().map(str::to_owned) {
            match target.as_deref() {
                Some(requested) if requested != current => {
                    info!(from = %current, to = requested, "Start requested another device, switching");
                    inner.teardown_locked(&mut lifecycle).await;
                }
                _ => {
                    debug!(device_id = %current, "Already scanning");
                    return Ok(());
                }
            }
        }

        inner.open_locked(&mut lifecycle, target, generation).await
    }

    /// Tears the session down. Idempotent; safe mid-`start`.
    pub async fn stop(&self) -> EngineResult<()> {
        let inner = &self.inner;
        inner.ensure_live()?;

        inner.generation.fetch_add(1, Ordering::SeqCst);
        let mut lifecycle = inner.lifecycle.lock().await;
        inner.teardown_locked(&mut lifecycle).await;
        inner.publish(|s| {
            s.scanning = false;
            s.phase = ScannerPhase::Stopped;
            s.current_error = None;
        });
        info!("Scanner stopped");
        Ok(())
    }

    /// Moves scanning to `device_id`.
    ///
    /// The old stream is closed before the new one is opened. When not
    /// scanning this only records the selection for the next `start`.
    /// On failure `selected_device` keeps the previous device.
    pub async fn switch_device(&self, device_id: DeviceId) -> EngineResult<()> {
        let inner = &self.inner;
        inner.ensure_live()?;

        let generation = inner.generation.load(Ordering::SeqCst);
        let mut lifecycle = inner.lifecycle.lock().await;

        match lifecycle.session.device_id().map(str::to_owned) {
            None => {
                info!(device_id = %device_id, "Not scanning, recording device selection");
                inner.publish(|s| s.selected_device = Some(device_id));
                Ok(())
            }
            Some(current) if current == device_id => Ok(()),
            Some(current) => {
                info!(from = %current, to = %device_id, "Switching capture device");
                inner.teardown_locked(&mut lifecycle).await;
                inner
                    .open_locked(&mut lifecycle, Some(device_id), generation)
                    .await
            }
        }
    }

    /// Runs the current error's retry action.
    pub async fn retry(&self) -> EngineResult<()> {
        let inner = &self.inner;
        inner.ensure_live()?;

        let generation = inner.generation.load(Ordering::SeqCst);
        let mut lifecycle = inner.lifecycle.lock().await;

        let (error, selected) = {
            let state = inner.state_tx.borrow();
            (state.current_error.clone(), state.selected_device.clone())
        };
        let Some(error) = error.filter(ScannerError::is_retryable) else {
            return Err(EngineError::NothingToRetry);
        };

        let target = error
            .retry_action
            .device_id()
            .map(str::to_owned)
            .or(selected);
        info!(kind = %error.kind, action = ?error.retry_action, "Retrying");

        inner.teardown_locked(&mut lifecycle).await;
        inner.open_locked(&mut lifecycle, target, generation).await
    }

    /// Stops scanning, flushes history, and releases the audio output.
    /// Every later call fails with [`EngineError::Disposed`].
    pub async fn dispose(&self) -> EngineResult<()> {
        let inner = &self.inner;
        if inner.disposed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        inner.generation.fetch_add(1, Ordering::SeqCst);
        {
            let mut lifecycle = inner.lifecycle.lock().await;
            inner.teardown_locked(&mut lifecycle).await;
            inner.publish(|s| {
                s.scanning = false;
                s.phase = ScannerPhase::Stopped;
            });
        }

        inner.feedback.shutdown().await;
        inner.history.flush().await;
        info!("Scanner controller disposed");
        Ok(())
    }

    pub fn state(&self) -> ScannerState {
        self.inner.state_tx.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ScannerState> {
        self.inner.state_tx.subscribe()
    }

    /// Accepted scans, in acceptance order.
    pub fn subscribe_scans(&self) -> broadcast::Receiver<AcceptedScan> {
        self.inner.scans_tx.subscribe()
    }

    pub fn history(&self) -> Arc<ScanHistory> {
        self.inner.history.clone()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Internals
// =============================================================================

impl Inner {
    fn ensure_live(&self) -> EngineResult<()> {
        if self.disposed.load(Ordering::SeqCst) {
            Err(EngineError::Disposed)
        } else {
            Ok(())
        }
    }

    /// Applies `update` and notifies observers with the result.
    fn publish(&self, update: impl FnOnce(&mut ScannerState)) {
        self.state_tx.send_modify(update);
        let snapshot = self.state_tx.borrow().clone();
        debug_assert!(snapshot.is_consistent(), "inconsistent state {snapshot:?}");
        self.events.on_state(&snapshot);
    }

    fn surface_error(&self, err: &ScannerError) {
        error!(
            kind = %err.kind,
            recoverable = err.recoverable,
            retry = ?err.retry_action,
            message = %err.message,
            "Scanner error"
        );
        let permission = err.kind == ErrorKind::Permission;
        self.publish(|s| {
            s.scanning = false;
            s.phase = ScannerPhase::Error;
            s.current_error = Some(err.clone());
            if permission {
                s.permission_granted = Some(false);
            }
        });
        self.events.on_error(err);
    }

    /// Caller holds the lifecycle lock.
    async fn initialize_locked(&self) -> EngineResult<()> {
        info!("Initializing scanner");
        self.publish(|s| s.phase = ScannerPhase::Initializing);

        match self.catalog.enumerate().await {
            Ok(listing) => {
                self.apply_listing(listing, true);
                Ok(())
            }
            Err(err) => {
                self.surface_error(&err);
                Err(err.into())
            }
        }
    }

    fn apply_listing(&self, listing: DeviceListing, initializing: bool) {
        let DeviceListing {
            devices,
            preferred,
            permission_granted,
        } = listing;

        let denied = permission_granted == Some(false);
        if denied && self.state_tx.borrow().scanning {
            debug!("Denied listing while scanning, keeping current devices");
            return;
        }

        self.publish(|s| {
            let keep = s
                .selected_device
                .as_ref()
                .is_some_and(|id| devices.iter().any(|d| &d.id == id));
            if !keep && !s.scanning {
                s.selected_device = preferred;
            }
            // A listing may report a first denial but never revokes a grant.
            match permission_granted {
                Some(false) if s.permission_granted.is_some() => {}
                Some(granted) => s.permission_granted = Some(granted),
                None => {}
            }
            s.available_devices = devices;
            s.initialized = true;
            if initializing {
                s.phase = ScannerPhase::Ready;
            }
        });
    }

    /// Opens a stream and wires up the decode loop. Caller holds the
    /// lifecycle lock and has torn down any previous session.
    async fn open_locked(
        self: &Arc<Self>,
        lifecycle: &mut Lifecycle,
        target: Option<DeviceId>,
        generation: u64,
    ) -> EngineResult<()> {
        let opened = match lifecycle.session.open(target, &self.constraints).await {
            Ok(OpenOutcome::Opened(opened)) => opened,
            Ok(OpenOutcome::AlreadyOpen) => return Ok(()),
            Err(err) => {
                self.surface_error(&err);
                return Err(err.into());
            }
        };

        if self.generation.load(Ordering::SeqCst) != generation {
            info!(device_id = %opened.device_id, "Stop requested during open, releasing stream");
            lifecycle.session.close().await;
            return Ok(());
        }

        let (events_tx, events_rx) = mpsc::channel(LOOP_EVENT_BUFFER);
        lifecycle.decode = Some(DecodeLoop::spawn(
            opened.frames,
            self.decoder.clone(),
            self.decode_config,
            events_tx,
        ));
        lifecycle.dispatcher = Some(tokio::spawn(dispatch(
            Arc::downgrade(self),
            events_rx,
            opened.stream_id,
            opened.device_id.clone(),
        )));

        let device_id = opened.device_id;
        info!(device_id = %device_id, stream = %opened.stream_id, "Scanning started");
        self.publish(|s| {
            s.initialized = true;
            s.scanning = true;
            s.phase = ScannerPhase::Scanning;
            s.selected_device = Some(device_id);
            s.current_error = None;
            s.permission_granted = Some(true);
        });

        // Labels are often withheld until permission is granted.
        if self.state_tx.borrow().available_devices.is_empty() {
            match self.catalog.enumerate().await {
                Ok(listing) => self.apply_listing(listing, false),
                Err(e) => debug!(error = %e, "Post-open enumeration failed"),
            }
        }

        Ok(())
    }

    /// Stops the decode loop, releases the stream, and waits for the
    /// dispatcher to drain. Caller holds the lifecycle lock.
    async fn teardown_locked(&self, lifecycle: &mut Lifecycle) {
        if let Some(decode) = lifecycle.decode.take() {
            let stats = decode.stop().await;
            debug!(?stats, "Decode loop joined");
        }

        lifecycle.session.close().await;

        if let Some(dispatcher) = lifecycle.dispatcher.take() {
            if let Err(e) = dispatcher.await {
                warn!(error = %e, "Scan dispatcher failed");
            }
        }
    }

    async fn handle_scan(&self, event: ScanEvent) {
        let decision = self.gate.lock().await.accept(&event, event.observed_at);
        match decision {
            GateDecision::Accepted(accepted) => self.deliver(accepted.into()).await,
            GateDecision::Rejected(reason) => {
                debug!(raw = %event.raw_text, %reason, "Scan rejected");
            }
        }
    }

    async fn deliver(&self, scan: AcceptedScan) {
        info!(code = %scan.code, symbology = %scan.symbology, "Scan accepted");

        self.history.add(HistoryEntry::from(&scan)).await;
        self.feedback.beep();

        let code = scan.code.clone();
        self.publish(|s| s.last_accepted_code = Some(code));
        self.events.on_scan(&scan);

        if self.scans_tx.send(scan).is_err() {
            debug!("No scan subscribers");
        }
    }

    /// The decode loop exited on its own. Tears the session down and
    /// surfaces `err`, unless the session was already replaced.
    async fn handle_loop_failure(&self, stream: StreamId, err: ScannerError) {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.session.stream_id() != Some(stream) {
            debug!(stream = %stream, "Ignoring failure from a replaced session");
            return;
        }
        self.teardown_locked(&mut lifecycle).await;
        self.surface_error(&err);
    }
}

/// Routes loop events for one session. Exits when the decode loop does.
async fn dispatch(
    inner: Weak<Inner>,
    mut events: mpsc::Receiver<LoopEvent>,
    stream: StreamId,
    device_id: DeviceId,
) {
    while let Some(event) = events.recv().await {
        let Some(controller) = inner.upgrade() else {
            break;
        };

        let failure = match event {
            LoopEvent::Scan(scan) => {
                controller.handle_scan(scan).await;
                continue;
            }
            LoopEvent::Fault {
                consecutive,
                message,
            } => ScannerError::decode_failure(
                format!("{consecutive} consecutive decoder faults: {message}"),
                Some(device_id.clone()),
            ),
            LoopEvent::StreamEnded => ScannerError::camera_unavailable(
                "camera stream ended",
                Some(device_id.clone()),
            ),
        };

        // Teardown joins this task, so it has to run elsewhere.
        tokio::spawn(async move {
            controller.handle_loop_failure(stream, failure).await;
        });
    }
    debug!(stream = %stream, "Scan dispatcher stopped");
}

// =============================================================================
// Builder
// =============================================================================

/// Wires a [`ScannerController`] from its collaborators.
///
/// A capture provider and a decode engine are required. Without a store
/// the history lives in memory only; without an audio backend (or with
/// feedback disabled in config) no tone is played.
pub struct ScannerControllerBuilder {
    config: ScannerConfig,
    provider: Option<Arc<dyn CaptureProvider>>,
    decoder: Option<Arc<dyn DecodeEngine>>,
    store: Option<Arc<dyn KeyValueStore>>,
    audio: Option<Arc<dyn AudioBackend>>,
    preview: Option<Arc<dyn PreviewSink>>,
    events: Option<Arc<dyn ScannerEvents>>,
}

impl ScannerControllerBuilder {
    pub fn new(config: ScannerConfig) -> Self {
        ScannerControllerBuilder {
            config,
            provider: None,
            decoder: None,
            store: None,
            audio: None,
            preview: None,
            events: None,
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn CaptureProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_decoder(mut self, decoder: Arc<dyn DecodeEngine>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_audio(mut self, audio: Arc<dyn AudioBackend>) -> Self {
        self.audio = Some(audio);
        self
    }

    pub fn with_preview(mut self, preview: Arc<dyn PreviewSink>) -> Self {
        self.preview = Some(preview);
        self
    }

    pub fn with_events(mut self, events: Arc<dyn ScannerEvents>) -> Self {
        self.events = Some(events);
        self
    }

    /// Loads the history and spawns the feedback worker. Must run inside a
    /// tokio runtime.
    pub async fn build(self) -> EngineResult<ScannerController> {
        let config = self.config;
        config.validate()?;

        let provider = self
            .provider
            .ok_or(EngineError::MissingComponent("capture provider"))?;
        let decoder = self
            .decoder
            .ok_or(EngineError::MissingComponent("decode engine"))?;

        let store = self.store.unwrap_or_else(|| {
            warn!("No key-value store configured, history will not survive restarts");
            Arc::new(MemoryStore::new())
        });
        let history = ScanHistory::load(store, config.history.storage_key.clone(), config.history.cap).await;

        let feedback = match self.audio {
            Some(audio) if config.feedback.enabled => FeedbackEmitter::spawn(audio, config.tone()),
            _ => {
                debug!("Audio feedback disabled");
                FeedbackEmitter::disabled()
            }
        };

        let preview = self.preview.unwrap_or_else(|| Arc::new(NullPreview));
        let events = self.events.unwrap_or_else(|| Arc::new(NoOpEvents));

        let (state_tx, _) = watch::channel(ScannerState::default());
        let (scans_tx, _) = broadcast::channel(SCAN_BROADCAST_CAPACITY);

        info!(
            accepted_lengths = ?config.gate.accepted_lengths,
            debounce_ms = config.gate.debounce_ms,
            history_cap = config.history.cap,
            feedback = feedback.is_enabled(),
            "Scanner controller ready"
        );

        Ok(ScannerController {
            inner: Arc::new(Inner {
                constraints: config.capture_constraints(),
                decode_config: DecodeLoopConfig {
                    fault_threshold: config.decode.fault_threshold,
                },
                catalog: DeviceCatalog::new(provider.clone()),
                decoder,
                lifecycle: Mutex::new(Lifecycle {
                    session: CaptureSession::new(provider, preview),
                    decode: None,
                    dispatcher: None,
                }),
                generation: AtomicU64::new(0),
                disposed: AtomicBool::new(false),
                state_tx,
                scans_tx,
                gate: Mutex::new(ScanGate::new(config.gate_config())),
                history: Arc::new(history),
                feedback,
                events,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::CaptureFailure;
    use crate::sim::{CameraEvent, OpenBehavior, RecordingAudio, RecordingEvents, ScriptedDecoder, SimulatedCamera};
    use chrono::{DateTime, Duration as ChronoDuration, Utc};
    use scanline_core::RetryAction;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(2);

    struct Harness {
        controller: ScannerController,
        camera: Arc<SimulatedCamera>,
        decoder: Arc<ScriptedDecoder>,
        audio: Arc<RecordingAudio>,
        events: Arc<RecordingEvents>,
        store: Arc<MemoryStore>,
    }

    async fn harness_with(config: ScannerConfig, store: Arc<MemoryStore>) -> Harness {
        let camera = Arc::new(SimulatedCamera::new(vec![
            CaptureDevice::new("cam1", "Back Camera"),
            CaptureDevice::new("cam2", "Front Camera"),
        ]));
        let decoder = Arc::new(ScriptedDecoder::new());
        let audio = Arc::new(RecordingAudio::new());
        let events = Arc::new(RecordingEvents::default());

        let controller = ScannerControllerBuilder::new(config)
            .with_provider(camera.clone())
            .with_decoder(decoder.clone())
            .with_store(store.clone())
            .with_audio(audio.clone())
            .with_events(events.clone())
            .build()
            .await
            .unwrap();

        Harness {
            controller,
            camera,
            decoder,
            audio,
            events,
            store,
        }
    }

    async fn harness() -> Harness {
        harness_with(ScannerConfig::default(), Arc::new(MemoryStore::new())).await
    }

    /// Pushes one frame and waits until the decoder has seen it.
    async fn feed(h: &Harness, payload: &str, at: DateTime<Utc>) {
        let before = h.decoder.decode_count();
        assert!(h.camera.push_frame_at(payload, at), "no active stream");
        assert!(h.decoder.wait_for_decodes(before + 1, WAIT).await);
    }

    async fn next_scan(rx: &mut broadcast::Receiver<AcceptedScan>) -> AcceptedScan {
        tokio::time::timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for scan")
            .expect("scan channel closed")
    }

    async fn wait_state(
        controller: &ScannerController,
        done: impl FnMut(&ScannerState) -> bool,
    ) -> ScannerState {
        let mut rx = controller.subscribe_state();
        let state = tokio::time::timeout(WAIT, rx.wait_for(done))
            .await
            .expect("timed out waiting for state")
            .expect("state channel closed")
            .clone();
        state
    }

    fn ms(base: DateTime<Utc>, offset: i64) -> DateTime<Utc> {
        base + ChronoDuration::milliseconds(offset)
    }

    fn assert_states_consistent(events: &RecordingEvents) {
        for state in events.states() {
            assert!(state.is_consistent(), "inconsistent state published: {state:?}");
        }
    }

    #[tokio::test]
    async fn test_initialize_selects_preferred_device() {
        let h = harness().await;
        assert_eq!(h.controller.state().phase, ScannerPhase::Idle);

        let state = h.controller.initialize().await.unwrap();
        assert!(state.initialized);
        assert_eq!(state.phase, ScannerPhase::Ready);
        assert_eq!(state.available_devices.len(), 2);
        assert_eq!(state.selected_device.as_deref(), Some("cam1"));
        assert!(!state.scanning);
    }

    #[tokio::test]
    async fn test_start_scans_and_delivers() {
        let h = harness().await;
        let mut scans = h.controller.subscribe_scans();

        h.controller.start(None).await.unwrap();
        let state = h.controller.state();
        assert!(state.scanning);
        assert_eq!(state.phase, ScannerPhase::Scanning);
        assert_eq!(state.selected_device.as_deref(), Some("cam1"));
        assert_eq!(state.permission_granted, Some(true));

        h.camera.push_frame("12-34-56");
        let scan = next_scan(&mut scans).await;
        assert_eq!(scan.code, "123456");
        assert_eq!(scan.symbology, "CODE-128");

        // History is written before subscribers hear about the scan.
        let history = h.controller.history().list().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].code, "123456");

        assert_eq!(h.controller.state().last_accepted_code.as_deref(), Some("123456"));
        assert_eq!(h.events.scans(), vec![scan]);
        assert!(h.audio.wait_for_tones(1, WAIT).await);

        h.controller.dispose().await.unwrap();
        assert_states_consistent(&h.events);
    }

    #[tokio::test]
    async fn test_invalid_codes_are_silently_rejected() {
        let h = harness().await;
        let mut scans = h.controller.subscribe_scans();
        h.controller.start(None).await.unwrap();

        let t0 = Utc::now();
        feed(&h, "ABC123", t0).await;
        feed(&h, "12345", ms(t0, 1)).await;
        feed(&h, "987654", ms(t0, 2)).await;

        assert_eq!(next_scan(&mut scans).await.code, "987654");
        assert!(scans.try_recv().is_err());
        assert_eq!(h.controller.state().current_error, None);
        assert!(h.events.errors().is_empty());
        h.controller.dispose().await.unwrap();
    }

    #[tokio::test]
    async fn test_debounce_timeline() {
        let h = harness().await;
        let mut scans = h.controller.subscribe_scans();
        h.controller.start(None).await.unwrap();

        let t0 = Utc::now();
        feed(&h, "123456789", t0).await;
        feed(&h, "123456789", ms(t0, 500)).await;
        feed(&h, "123456789", ms(t0, 900)).await;
        feed(&h, "654321", ms(t0, 950)).await;

        let first = next_scan(&mut scans).await;
        let second = next_scan(&mut scans).await;
        let sentinel = next_scan(&mut scans).await;
        assert_eq!(first.code, "123456789");
        assert_eq!(first.observed_at, t0);
        assert_eq!(second.code, "123456789");
        assert_eq!(second.observed_at, ms(t0, 900));
        assert_eq!(sentinel.code, "654321");
        assert!(scans.try_recv().is_err());

        let codes: Vec<_> = h
            .controller
            .history()
            .list()
            .await
            .into_iter()
            .map(|e| e.code)
            .collect();
        assert_eq!(codes, vec!["654321", "123456789", "123456789"]);
        h.controller.dispose().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_same_device_is_noop() {
        let h = harness().await;
        h.controller.start(None).await.unwrap();
        h.controller.start(Some("cam1".into())).await.unwrap();
        h.controller.start(None).await.unwrap();
        assert_eq!(h.camera.open_count(), 1);
        h.controller.dispose().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_right_after_start_releases_stream() {
        let h = harness().await;
        h.controller.start(None).await.unwrap();
        h.controller.stop().await.unwrap();

        assert_eq!(h.camera.open_count(), 1);
        assert_eq!(h.camera.close_count(), 1);
        assert_eq!(h.camera.active_streams(), 0);

        let state = h.controller.state();
        assert!(!state.scanning);
        assert_eq!(state.phase, ScannerPhase::Stopped);

        // Idempotent
        h.controller.stop().await.unwrap();
        assert_eq!(h.camera.close_count(), 1);
        assert_states_consistent(&h.events);
    }

    #[tokio::test]
    async fn test_stop_during_open_releases_late_stream() {
        let h = harness().await;
        h.controller.initialize().await.unwrap();
        h.camera.set_open_delay(Duration::from_millis(100));

        let starter = h.controller.clone();
        let start = tokio::spawn(async move { starter.start(None).await });

        tokio::time::timeout(WAIT, async {
            while !h
                .camera
                .events()
                .iter()
                .any(|e| matches!(e, CameraEvent::OpenRequested { .. }))
            {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .unwrap();

        h.controller.stop().await.unwrap();
        start.await.unwrap().unwrap();

        assert_eq!(h.camera.open_count(), 1);
        assert_eq!(h.camera.close_count(), 1);
        assert_eq!(h.camera.active_streams(), 0);

        let state = h.controller.state();
        assert!(!state.scanning);
        assert_eq!(state.phase, ScannerPhase::Stopped);
    }

    #[tokio::test]
    async fn test_switch_closes_before_opening() {
        let h = harness().await;
        h.controller.start(Some("cam1".into())).await.unwrap();
        h.controller.switch_device("cam2".into()).await.unwrap();

        let log = h.camera.events();
        let closed_cam1 = log
            .iter()
            .position(|e| matches!(e, CameraEvent::Closed { device_id, .. } if device_id == "cam1"))
            .unwrap();
        let requested_cam2 = log
            .iter()
            .position(|e| matches!(e, CameraEvent::OpenRequested { device_id } if device_id == "cam2"))
            .unwrap();
        assert!(closed_cam1 < requested_cam2);

        let state = h.controller.state();
        assert!(state.scanning);
        assert_eq!(state.selected_device.as_deref(), Some("cam2"));
        assert_eq!(h.camera.active_streams(), 1);
        assert_eq!(h.camera.active_device().as_deref(), Some("cam2"));
        h.controller.dispose().await.unwrap();
    }

    #[tokio::test]
    async fn test_switch_failure_keeps_previous_selection() {
        let h = harness().await;
        h.controller.start(Some("cam1".into())).await.unwrap();
        h.camera.set_behavior("cam2", OpenBehavior::Busy);

        let err = h.controller.switch_device("cam2".into()).await.unwrap_err();
        assert_eq!(
            err.scanner_error().map(|e| e.kind),
            Some(ErrorKind::CameraUnavailable)
        );

        let state = h.controller.state();
        assert!(!state.scanning);
        assert_eq!(state.phase, ScannerPhase::Error);
        assert_eq!(state.selected_device.as_deref(), Some("cam1"));
        let current = state.current_error.unwrap();
        assert_eq!(current.kind, ErrorKind::CameraUnavailable);
        assert_eq!(
            current.retry_action,
            RetryAction::ReopenDevice {
                device_id: Some("cam2".into())
            }
        );
        assert_eq!(h.camera.active_streams(), 0);

        // Retry re-attempts the same operation.
        h.camera.set_behavior("cam2", OpenBehavior::Succeed);
        h.controller.retry().await.unwrap();
        let state = h.controller.state();
        assert!(state.scanning);
        assert_eq!(state.selected_device.as_deref(), Some("cam2"));
        assert_eq!(state.current_error, None);
        h.controller.dispose().await.unwrap();
        assert_states_consistent(&h.events);
    }

    #[tokio::test]
    async fn test_switch_while_idle_records_selection() {
        let h = harness().await;
        h.controller.initialize().await.unwrap();
        h.controller.switch_device("cam2".into()).await.unwrap();
        assert_eq!(h.camera.open_count(), 0);
        assert_eq!(h.controller.state().selected_device.as_deref(), Some("cam2"));

        h.controller.start(None).await.unwrap();
        assert_eq!(h.camera.active_device().as_deref(), Some("cam2"));
        h.controller.dispose().await.unwrap();
    }

    #[tokio::test]
    async fn test_permission_denied_on_start() {
        let h = harness().await;
        h.camera.set_behavior("cam1", OpenBehavior::PermissionDenied);

        let err = h.controller.start(None).await.unwrap_err();
        assert!(matches!(err, EngineError::Scanner(_)));

        let state = h.controller.state();
        assert!(!state.scanning);
        assert_eq!(state.permission_granted, Some(false));
        let current = state.current_error.unwrap();
        assert_eq!(current.kind, ErrorKind::Permission);
        assert!(!current.recoverable);
        assert_eq!(h.events.errors(), vec![current]);

        assert!(matches!(
            h.controller.retry().await,
            Err(EngineError::NothingToRetry)
        ));

        // Once permission is granted outside the app, start works again.
        h.camera.set_behavior("cam1", OpenBehavior::Succeed);
        h.controller.start(None).await.unwrap();
        let state = h.controller.state();
        assert!(state.scanning);
        assert_eq!(state.permission_granted, Some(true));
        h.controller.dispose().await.unwrap();
        assert_states_consistent(&h.events);
    }

    #[tokio::test]
    async fn test_denied_enumeration_does_not_fail_initialize() {
        let h = harness().await;
        h.camera
            .fail_enumeration(Some(CaptureFailure::PermissionDenied("later".into())));

        let state = h.controller.initialize().await.unwrap();
        assert!(state.initialized);
        assert!(state.available_devices.is_empty());
        assert_eq!(state.current_error, None);

        // The explicit open still succeeds, and re-enumeration fills the list.
        h.camera.fail_enumeration(None);
        h.controller.start(None).await.unwrap();
        let state = h.controller.state();
        assert!(state.scanning);
        assert_eq!(state.available_devices.len(), 2);
        h.controller.dispose().await.unwrap();
    }

    #[tokio::test]
    async fn test_denied_refresh_while_scanning_keeps_state() {
        let h = harness().await;
        h.controller.start(None).await.unwrap();
        let before = h.controller.state();
        assert_eq!(before.available_devices.len(), 2);

        h.camera
            .fail_enumeration(Some(CaptureFailure::PermissionDenied("revoked".into())));
        let devices = h.controller.refresh_devices().await.unwrap();
        assert!(devices.is_empty());

        let state = h.controller.state();
        assert!(state.scanning);
        assert_eq!(state.permission_granted, Some(true));
        assert_eq!(state.available_devices, before.available_devices);
        assert_eq!(state.selected_device, before.selected_device);
        assert_eq!(h.camera.active_streams(), 1);

        // Stopped: the empty listing applies, the earlier grant stays.
        h.controller.stop().await.unwrap();
        h.controller.refresh_devices().await.unwrap();
        let state = h.controller.state();
        assert!(state.available_devices.is_empty());
        assert_eq!(state.permission_granted, Some(true));
        h.controller.dispose().await.unwrap();
        assert_states_consistent(&h.events);
    }

    #[tokio::test]
    async fn test_sustained_faults_surface_decode_failure() {
        let mut config = ScannerConfig::default();
        config.decode.fault_threshold = 3;
        let h = harness_with(config, Arc::new(MemoryStore::new())).await;
        h.controller.start(None).await.unwrap();

        let t0 = Utc::now();
        for i in 0..3 {
            feed(&h, "!fault", ms(t0, i)).await;
        }

        let state = wait_state(&h.controller, |s| s.current_error.is_some()).await;
        assert!(!state.scanning);
        let current = state.current_error.unwrap();
        assert_eq!(current.kind, ErrorKind::DecodeFailure);
        assert!(current.recoverable);
        assert_eq!(
            current.retry_action,
            RetryAction::RestartSession {
                device_id: Some("cam1".into())
            }
        );
        assert_eq!(h.camera.active_streams(), 0);
        assert_eq!(h.camera.open_count(), h.camera.close_count());

        h.controller.retry().await.unwrap();
        assert!(h.controller.state().scanning);
        assert_eq!(h.camera.open_count(), 2);
        h.controller.dispose().await.unwrap();
        assert_states_consistent(&h.events);
    }

    #[tokio::test]
    async fn test_stream_end_surfaces_camera_unavailable() {
        let h = harness().await;
        h.controller.start(None).await.unwrap();
        h.camera.end_streams();

        let state = wait_state(&h.controller, |s| s.current_error.is_some()).await;
        let current = state.current_error.unwrap();
        assert_eq!(current.kind, ErrorKind::CameraUnavailable);
        assert_eq!(
            current.retry_action,
            RetryAction::ReopenDevice {
                device_id: Some("cam1".into())
            }
        );
        assert_eq!(h.camera.active_streams(), 0);
        h.controller.dispose().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_clears_error() {
        let h = harness().await;
        h.camera.set_behavior("cam1", OpenBehavior::Busy);
        assert!(h.controller.start(None).await.is_err());
        assert!(h.controller.state().can_retry());

        h.controller.stop().await.unwrap();
        let state = h.controller.state();
        assert_eq!(state.phase, ScannerPhase::Stopped);
        assert_eq!(state.current_error, None);
        assert!(matches!(
            h.controller.retry().await,
            Err(EngineError::NothingToRetry)
        ));
    }

    #[tokio::test]
    async fn test_audio_failure_does_not_block_scans() {
        let camera = Arc::new(SimulatedCamera::new(vec![CaptureDevice::new("cam1", "Back Camera")]));
        let audio = Arc::new(RecordingAudio::failing_first(usize::MAX));
        let controller = ScannerControllerBuilder::new(ScannerConfig::default())
            .with_provider(camera.clone())
            .with_decoder(Arc::new(ScriptedDecoder::new()))
            .with_audio(audio.clone())
            .build()
            .await
            .unwrap();
        let mut scans = controller.subscribe_scans();
        controller.start(None).await.unwrap();

        camera.push_frame("123456");
        assert_eq!(next_scan(&mut scans).await.code, "123456");
        assert!(audio.wait_for_attempts(1, WAIT).await);
        assert!(audio.tones().is_empty());
        controller.dispose().await.unwrap();
    }

    #[tokio::test]
    async fn test_history_survives_controller_restart() {
        let store = Arc::new(MemoryStore::new());
        let h = harness_with(ScannerConfig::default(), store.clone()).await;
        let mut scans = h.controller.subscribe_scans();
        h.controller.start(None).await.unwrap();

        let t0 = Utc::now();
        feed(&h, "111111", t0).await;
        feed(&h, "222222222", ms(t0, 10)).await;
        next_scan(&mut scans).await;
        next_scan(&mut scans).await;

        let before = h.controller.history().list().await;
        h.controller.dispose().await.unwrap();
        assert!(!h.store.is_empty().await);

        let restarted = harness_with(ScannerConfig::default(), store).await;
        assert_eq!(restarted.controller.history().list().await, before);
    }

    #[tokio::test]
    async fn test_dispose_rejects_later_calls() {
        let h = harness().await;
        h.controller.start(None).await.unwrap();
        h.controller.dispose().await.unwrap();
        h.controller.dispose().await.unwrap();

        assert!(h.controller.is_disposed());
        assert_eq!(h.camera.active_streams(), 0);
        assert!(matches!(h.controller.start(None).await, Err(EngineError::Disposed)));
        assert!(matches!(h.controller.stop().await, Err(EngineError::Disposed)));
        assert!(matches!(
            h.controller.switch_device("cam2".into()).await,
            Err(EngineError::Disposed)
        ));
    }

    #[tokio::test]
    async fn test_builder_requires_provider_and_decoder() {
        let result = ScannerControllerBuilder::new(ScannerConfig::default())
            .with_decoder(Arc::new(ScriptedDecoder::new()))
            .build()
            .await;
        assert!(matches!(result, Err(EngineError::MissingComponent("capture provider"))));

        let result = ScannerControllerBuilder::new(ScannerConfig::default())
            .with_provider(Arc::new(SimulatedCamera::new(vec![])))
            .build()
            .await;
        assert!(matches!(result, Err(EngineError::MissingComponent("decode engine"))));
    }
}
