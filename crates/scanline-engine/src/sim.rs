//! # Simulated Hardware
//!
//! In-process stand-ins for every hardware seam in [`crate::provider`].
//! Used by the test suites and by the `scanline-sim` binary.
//!
//! | Seam              | Simulation          | Scriptable                           |
//! |-------------------|---------------------|--------------------------------------|
//! | `CaptureProvider` | `SimulatedCamera`   | per-device open failures, open delay |
//! | `DecodeEngine`    | `ScriptedDecoder`   | frame payload is the decoded text    |
//! | `AudioBackend`    | `RecordingAudio`    | failing acquisitions, play delay     |
//! | `PreviewSink`     | `RecordingPreview`  |                                      |
//! | `ScannerEvents`   | `RecordingEvents`   |                                      |
//!
//! A simulated frame carries its barcode as UTF-8 in `Frame::data`. The
//! decoder reports an empty payload as "nothing found" and a payload
//! starting with `!fault` as an engine fault.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::debug;

use scanline_core::devices::preferred_device;
use scanline_core::{AcceptedScan, CaptureConstraints, CaptureDevice, DeviceId, ScannerError, ScannerState};

use crate::events::ScannerEvents;
use crate::provider::{
    AudioBackend, AudioError, AudioOutput, CaptureFailure, CaptureProvider, DecodeEngine,
    DecodeOutcome, Frame, FrameStream, PreviewSink, StreamId, Tone,
};

/// Payload prefix the scripted decoder treats as an engine fault.
pub const FAULT_PAYLOAD: &str = "!fault";

const SIM_WIDTH: u32 = 1280;
const SIM_HEIGHT: u32 = 720;
const SIM_FRAME_BUFFER: usize = 8;
const POLL_INTERVAL: Duration = Duration::from_millis(5);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Builds a frame carrying `payload`, stamped now.
pub fn frame(sequence: u64, payload: &str) -> Frame {
    Frame {
        sequence,
        width: SIM_WIDTH,
        height: SIM_HEIGHT,
        data: payload.as_bytes().to_vec(),
        captured_at: Utc::now(),
    }
}

/// Polls `done` until it holds or `timeout` elapses.
async fn poll_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    tokio::time::timeout(timeout, async {
        while !done() {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    })
    .await
    .is_ok()
}

// =============================================================================
// Simulated Camera
// =============================================================================

/// How `open_stream` behaves for one device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OpenBehavior {
    #[default]
    Succeed,
    PermissionDenied,
    Busy,
    Unsupported,
    Fail,
}

/// Everything the camera was asked to do, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraEvent {
    OpenRequested { device_id: DeviceId },
    Opened { device_id: DeviceId, stream: StreamId },
    Closed { device_id: DeviceId, stream: StreamId },
}

struct SimStream {
    device_id: DeviceId,
    sender: Option<mpsc::Sender<Frame>>,
}

#[derive(Default)]
struct CameraState {
    devices: Vec<CaptureDevice>,
    behaviors: HashMap<DeviceId, OpenBehavior>,
    enumeration_failure: Option<CaptureFailure>,
    open_delay: Duration,
    streams: HashMap<StreamId, SimStream>,
    log: Vec<CameraEvent>,
    next_sequence: u64,
}

/// A set of fake cameras whose frames are pushed by the caller.
#[derive(Default)]
pub struct SimulatedCamera {
    state: Mutex<CameraState>,
}

impl SimulatedCamera {
    pub fn new(devices: Vec<CaptureDevice>) -> Self {
        SimulatedCamera {
            state: Mutex::new(CameraState {
                devices,
                ..Default::default()
            }),
        }
    }

    pub fn set_open_delay(&self, delay: Duration) {
        lock(&self.state).open_delay = delay;
    }

    pub fn set_behavior(&self, device_id: &str, behavior: OpenBehavior) {
        lock(&self.state)
            .behaviors
            .insert(device_id.to_string(), behavior);
    }

    /// Makes `list_devices` fail with `failure` until cleared with `None`.
    pub fn fail_enumeration(&self, failure: Option<CaptureFailure>) {
        lock(&self.state).enumeration_failure = failure;
    }

    pub fn events(&self) -> Vec<CameraEvent> {
        lock(&self.state).log.clone()
    }

    /// Successful opens so far.
    pub fn open_count(&self) -> usize {
        lock(&self.state)
            .log
            .iter()
            .filter(|e| matches!(e, CameraEvent::Opened { .. }))
            .count()
    }

    /// Closes of streams this camera handed out.
    pub fn close_count(&self) -> usize {
        lock(&self.state)
            .log
            .iter()
            .filter(|e| matches!(e, CameraEvent::Closed { .. }))
            .count()
    }

    pub fn active_streams(&self) -> usize {
        lock(&self.state).streams.len()
    }

    /// Device of the most recently opened stream that is still active.
    pub fn active_device(&self) -> Option<DeviceId> {
        let state = lock(&self.state);
        state.log.iter().rev().find_map(|e| match e {
            CameraEvent::Opened { device_id, stream } if state.streams.contains_key(stream) => {
                Some(device_id.clone())
            }
            _ => None,
        })
    }

    /// Delivers a frame carrying `payload` to every active stream.
    /// Returns false if no stream accepted it.
    pub fn push_frame(&self, payload: &str) -> bool {
        self.push_frame_at(payload, Utc::now())
    }

    pub fn push_frame_at(&self, payload: &str, captured_at: DateTime<Utc>) -> bool {
        let mut state = lock(&self.state);
        state.next_sequence += 1;
        let sequence = state.next_sequence;

        let mut delivered = false;
        for stream in state.streams.values() {
            let Some(sender) = &stream.sender else {
                continue;
            };
            let frame = Frame {
                sequence,
                width: SIM_WIDTH,
                height: SIM_HEIGHT,
                data: payload.as_bytes().to_vec(),
                captured_at,
            };
            match sender.try_send(frame) {
                Ok(()) => delivered = true,
                Err(e) => debug!(device_id = %stream.device_id, error = %e, "Simulated frame not delivered"),
            }
        }
        delivered
    }

    /// Closes every active stream's frame channel, as if the device vanished.
    pub fn end_streams(&self) {
        for stream in lock(&self.state).streams.values_mut() {
            stream.sender = None;
        }
    }

    fn resolve_device(
        state: &CameraState,
        constraints: &CaptureConstraints,
    ) -> Result<DeviceId, CaptureFailure> {
        match &constraints.device_id {
            Some(id) if state.devices.iter().any(|d| &d.id == id) => Ok(id.clone()),
            Some(id) => Err(CaptureFailure::NotFound(id.clone())),
            None => preferred_device(&state.devices)
                .map(|d| d.id.clone())
                .ok_or_else(|| CaptureFailure::NotFound("no cameras attached".into())),
        }
    }
}

#[async_trait]
impl CaptureProvider for SimulatedCamera {
    async fn list_devices(&self) -> Result<Vec<CaptureDevice>, CaptureFailure> {
        let state = lock(&self.state);
        match &state.enumeration_failure {
            Some(failure) => Err(failure.clone()),
            None => Ok(state.devices.clone()),
        }
    }

    async fn open_stream(
        &self,
        constraints: &CaptureConstraints,
    ) -> Result<FrameStream, CaptureFailure> {
        let (device_id, delay) = {
            let mut state = lock(&self.state);
            let device_id = Self::resolve_device(&state, constraints)?;
            state.log.push(CameraEvent::OpenRequested {
                device_id: device_id.clone(),
            });
            (device_id, state.open_delay)
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = lock(&self.state);
        let behavior = state.behaviors.get(&device_id).copied().unwrap_or_default();
        match behavior {
            OpenBehavior::Succeed => {}
            OpenBehavior::PermissionDenied => {
                return Err(CaptureFailure::PermissionDenied("user dismissed the prompt".into()))
            }
            OpenBehavior::Busy => return Err(CaptureFailure::DeviceBusy(device_id)),
            OpenBehavior::Unsupported => {
                return Err(CaptureFailure::Unsupported("no capture api".into()))
            }
            OpenBehavior::Fail => return Err(CaptureFailure::Other("driver error".into())),
        }

        let id = StreamId::new();
        let (sender, frames) = mpsc::channel(SIM_FRAME_BUFFER);
        state.streams.insert(
            id,
            SimStream {
                device_id: device_id.clone(),
                sender: Some(sender),
            },
        );
        state.log.push(CameraEvent::Opened {
            device_id: device_id.clone(),
            stream: id,
        });

        Ok(FrameStream {
            id,
            device_id,
            frames,
        })
    }

    async fn close_stream(&self, stream: StreamId) -> Result<(), CaptureFailure> {
        let mut state = lock(&self.state);
        if let Some(closed) = state.streams.remove(&stream) {
            state.log.push(CameraEvent::Closed {
                device_id: closed.device_id,
                stream,
            });
        }
        Ok(())
    }
}

// =============================================================================
// Scripted Decoder
// =============================================================================

/// Decodes a frame's payload as its barcode text.
#[derive(Default)]
pub struct ScriptedDecoder {
    delay: Option<Duration>,
    decodes: AtomicUsize,
}

impl ScriptedDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks every decode for `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn decode_count(&self) -> usize {
        self.decodes.load(Ordering::SeqCst)
    }

    pub async fn wait_for_decodes(&self, count: usize, timeout: Duration) -> bool {
        poll_until(timeout, || self.decode_count() >= count).await
    }
}

impl DecodeEngine for ScriptedDecoder {
    fn try_decode(&self, frame: &Frame) -> DecodeOutcome {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }

        let text = String::from_utf8_lossy(&frame.data).into_owned();
        let outcome = if text.is_empty() {
            DecodeOutcome::NotFound
        } else if text.starts_with(FAULT_PAYLOAD) {
            DecodeOutcome::Fault("scripted fault".into())
        } else {
            DecodeOutcome::Found {
                text,
                symbology: "CODE-128".into(),
            }
        };

        self.decodes.fetch_add(1, Ordering::SeqCst);
        outcome
    }
}

// =============================================================================
// Recording Audio
// =============================================================================

#[derive(Default)]
struct AudioLog {
    tones: Vec<Tone>,
    acquisitions: usize,
    failures_left: usize,
}

/// Audio backend that records tones instead of playing them.
#[derive(Default)]
pub struct RecordingAudio {
    log: Arc<Mutex<AudioLog>>,
    play_delay: Option<Duration>,
}

impl RecordingAudio {
    pub fn new() -> Self {
        Self::default()
    }

    /// The first `failures` acquisitions report the device as unavailable.
    pub fn failing_first(failures: usize) -> Self {
        let audio = Self::default();
        lock(&audio.log).failures_left = failures;
        audio
    }

    pub fn with_play_delay(mut self, delay: Duration) -> Self {
        self.play_delay = Some(delay);
        self
    }

    pub fn tones(&self) -> Vec<Tone> {
        lock(&self.log).tones.clone()
    }

    /// Acquisition attempts, failed ones included.
    pub fn acquisitions(&self) -> usize {
        lock(&self.log).acquisitions
    }

    pub async fn wait_for_tones(&self, count: usize, timeout: Duration) -> bool {
        poll_until(timeout, || self.tones().len() >= count).await
    }

    pub async fn wait_for_attempts(&self, count: usize, timeout: Duration) -> bool {
        poll_until(timeout, || self.acquisitions() >= count).await
    }
}

struct RecordingOutput {
    log: Arc<Mutex<AudioLog>>,
    play_delay: Option<Duration>,
}

impl AudioOutput for RecordingOutput {
    fn play_tone(&mut self, tone: &Tone) -> Result<(), AudioError> {
        if let Some(delay) = self.play_delay {
            std::thread::sleep(delay);
        }
        lock(&self.log).tones.push(*tone);
        Ok(())
    }
}

impl AudioBackend for RecordingAudio {
    fn acquire(&self) -> Result<Box<dyn AudioOutput>, AudioError> {
        let mut log = lock(&self.log);
        log.acquisitions += 1;
        if log.failures_left > 0 {
            log.failures_left -= 1;
            return Err(AudioError::Unavailable("simulated device missing".into()));
        }
        Ok(Box::new(RecordingOutput {
            log: self.log.clone(),
            play_delay: self.play_delay,
        }))
    }
}

// =============================================================================
// Recording Preview / Events
// =============================================================================

#[derive(Default)]
pub struct RecordingPreview {
    attached: Mutex<HashSet<StreamId>>,
}

impl RecordingPreview {
    /// Streams currently attached.
    pub fn attached(&self) -> usize {
        lock(&self.attached).len()
    }
}

impl PreviewSink for RecordingPreview {
    fn attach(&self, stream: StreamId, _device_id: &str) {
        lock(&self.attached).insert(stream);
    }

    fn detach(&self, stream: StreamId) {
        lock(&self.attached).remove(&stream);
    }
}

/// Keeps every notification for later inspection.
#[derive(Default)]
pub struct RecordingEvents {
    states: Mutex<Vec<ScannerState>>,
    scans: Mutex<Vec<AcceptedScan>>,
    errors: Mutex<Vec<ScannerError>>,
}

impl RecordingEvents {
    pub fn states(&self) -> Vec<ScannerState> {
        lock(&self.states).clone()
    }

    pub fn scans(&self) -> Vec<AcceptedScan> {
        lock(&self.scans).clone()
    }

    pub fn errors(&self) -> Vec<ScannerError> {
        lock(&self.errors).clone()
    }
}

impl ScannerEvents for RecordingEvents {
    fn on_state(&self, state: &ScannerState) {
        lock(&self.states).push(state.clone());
    }

    fn on_scan(&self, scan: &AcceptedScan) {
        lock(&self.scans).push(scan.clone());
    }

    fn on_error(&self, error: &ScannerError) {
        lock(&self.errors).push(error.clone());
    }
}
