//! # Capture Session
//!
//! Owns at most one open stream and guarantees it is released.
//!
//! ## Stream Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  open(device)                                                          │
//! │     │                                                                   │
//! │     ├── same device already open ──► AlreadyOpen (no-op)               │
//! │     ├── other device open ─────────► close() first                     │
//! │     ▼                                                                   │
//! │  provider.open_stream(constraints)                                     │
//! │     │                                                                   │
//! │     ├── Err ──► classify ──► ScannerError                              │
//! │     ▼                                                                   │
//! │  sink.attach ──► StreamLease { id } ──► Opened(frames)                 │
//! │                                                                         │
//! │  close()  ──► lease.release(): sink.detach, provider.close_stream      │
//! │  drop     ──► StreamLease::drop schedules the same release             │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every successful `open_stream` is matched by exactly one `close_stream`,
//! either from `close()` or from the lease's `Drop`. A lease dropped off the
//! runtime goes back to the runtime that opened it, or to a throwaway one
//! on a helper thread once that runtime has shut down.

use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use scanline_core::{CaptureConstraints, DeviceId, ScannerError};

use crate::provider::{CaptureFailure, CaptureProvider, Frame, PreviewSink, StreamId};

/// How long a drop off the runtime waits for the opening runtime to release.
const ORIGIN_RELEASE_TIMEOUT: Duration = Duration::from_secs(2);

// =============================================================================
// Stream Lease
// =============================================================================

/// Scoped ownership of one open stream.
pub struct StreamLease {
    id: StreamId,
    device_id: DeviceId,
    provider: Arc<dyn CaptureProvider>,
    sink: Arc<dyn PreviewSink>,
    origin: Option<Handle>,
    released: bool,
}

impl StreamLease {
    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Detaches the preview and stops the hardware tracks.
    pub async fn release(mut self) {
        self.released = true;
        release_stream(&self.provider, self.sink.as_ref(), self.id, &self.device_id).await;
    }
}

impl Drop for StreamLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        warn!(stream = %self.id, device_id = %self.device_id, "Stream lease dropped without close, scheduling release");

        let pending = PendingRelease {
            provider: self.provider.clone(),
            sink: self.sink.clone(),
            id: self.id,
            device_id: std::mem::take(&mut self.device_id),
        };

        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(pending.run());
            }
            Err(_) => pending.run_off_runtime(self.origin.as_ref()),
        }
    }
}

/// Release work captured from a dropped lease.
#[derive(Clone)]
struct PendingRelease {
    provider: Arc<dyn CaptureProvider>,
    sink: Arc<dyn PreviewSink>,
    id: StreamId,
    device_id: DeviceId,
}

impl PendingRelease {
    async fn run(self) {
        release_stream(&self.provider, self.sink.as_ref(), self.id, &self.device_id).await;
    }

    /// Blocks the dropping thread until the stream is released.
    fn run_off_runtime(self, origin: Option<&Handle>) {
        let id = self.id;

        if let Some(handle) = origin {
            let (done_tx, done_rx) = std::sync::mpsc::channel();
            let task = self.clone();
            // A shut-down runtime drops the task unpolled, closing the channel.
            handle.spawn(async move {
                task.run().await;
                let _ = done_tx.send(());
            });
            match done_rx.recv_timeout(ORIGIN_RELEASE_TIMEOUT) {
                Ok(()) => return,
                Err(RecvTimeoutError::Timeout) => {
                    warn!(stream = %id, "Release still queued on the opening runtime");
                    return;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    debug!(stream = %id, "Opening runtime is gone, releasing on a helper thread");
                }
            }
        }

        let worker = std::thread::Builder::new()
            .name("scanline-release".into())
            .spawn(move || {
                match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                    Ok(runtime) => runtime.block_on(self.run()),
                    Err(e) => warn!(stream = %id, error = %e, "Could not build release runtime"),
                }
            });
        match worker {
            Ok(worker) => {
                if worker.join().is_err() {
                    warn!(stream = %id, "Release thread panicked");
                }
            }
            Err(e) => warn!(stream = %id, error = %e, "Could not spawn release thread"),
        }
    }
}

async fn release_stream(
    provider: &Arc<dyn CaptureProvider>,
    sink: &dyn PreviewSink,
    id: StreamId,
    device_id: &str,
) {
    sink.detach(id);
    match provider.close_stream(id).await {
        Ok(()) => info!(stream = %id, device_id, "Capture stream closed"),
        Err(e) => warn!(stream = %id, device_id, error = %e, "close_stream failed"),
    }
}

// =============================================================================
// Capture Session
// =============================================================================

/// A freshly opened stream, ready for the decode loop.
#[derive(Debug)]
pub struct OpenedStream {
    pub stream_id: StreamId,
    pub device_id: DeviceId,
    pub frames: mpsc::Receiver<Frame>,
}

#[derive(Debug)]
pub enum OpenOutcome {
    Opened(OpenedStream),
    AlreadyOpen,
}

pub struct CaptureSession {
    provider: Arc<dyn CaptureProvider>,
    sink: Arc<dyn PreviewSink>,
    lease: Option<StreamLease>,
}

impl CaptureSession {
    pub fn new(provider: Arc<dyn CaptureProvider>, sink: Arc<dyn PreviewSink>) -> Self {
        CaptureSession {
            provider,
            sink,
            lease: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.lease.is_some()
    }

    /// Device of the open stream.
    pub fn device_id(&self) -> Option<&str> {
        self.lease.as_ref().map(StreamLease::device_id)
    }

    pub fn stream_id(&self) -> Option<StreamId> {
        self.lease.as_ref().map(StreamLease::id)
    }

    /// Opens `device_id` (or whatever the constraints select when `None`).
    pub async fn open(
        &mut self,
        device_id: Option<DeviceId>,
        constraints: &CaptureConstraints,
    ) -> Result<OpenOutcome, ScannerError> {
        if let Some(current) = self.device_id().map(str::to_owned) {
            match device_id.as_deref() {
                None => return Ok(OpenOutcome::AlreadyOpen),
                Some(requested) if requested == current => return Ok(OpenOutcome::AlreadyOpen),
                Some(requested) => {
                    debug!(from = %current, to = requested, "Different device requested, closing current stream");
                    self.close().await;
                }
            }
        }

        let constraints = constraints.for_device(device_id.clone());
        debug!(device_id = ?device_id, "Opening capture stream");

        let stream = self
            .provider
            .open_stream(&constraints)
            .await
            .map_err(|failure| classify_failure(failure, device_id))?;

        self.sink.attach(stream.id, &stream.device_id);
        info!(stream = %stream.id, device_id = %stream.device_id, "Capture stream opened");

        self.lease = Some(StreamLease {
            id: stream.id,
            device_id: stream.device_id.clone(),
            provider: self.provider.clone(),
            sink: self.sink.clone(),
            origin: Handle::try_current().ok(),
            released: false,
        });

        Ok(OpenOutcome::Opened(OpenedStream {
            stream_id: stream.id,
            device_id: stream.device_id,
            frames: stream.frames,
        }))
    }

    /// Releases the open stream, if any. Idempotent.
    pub async fn close(&mut self) {
        if let Some(lease) = self.lease.take() {
            lease.release().await;
        }
    }
}

/// Maps a provider failure onto the scanner taxonomy.
pub fn classify_failure(failure: CaptureFailure, device_id: Option<DeviceId>) -> ScannerError {
    let message = failure.to_string();
    match failure {
        CaptureFailure::PermissionDenied(_) => ScannerError::permission_denied(message),
        CaptureFailure::DeviceBusy(_) | CaptureFailure::NotFound(_) => {
            ScannerError::camera_unavailable(message, device_id)
        }
        CaptureFailure::Unsupported(_) => ScannerError::unsupported(message),
        CaptureFailure::Other(_) => ScannerError::camera_unavailable(message, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::NullPreview;
    use crate::sim::{CameraEvent, OpenBehavior, RecordingPreview, SimulatedCamera};
    use scanline_core::{CaptureDevice, ErrorKind, RetryAction};
    use std::time::Duration;

    fn two_cameras() -> Arc<SimulatedCamera> {
        Arc::new(SimulatedCamera::new(vec![
            CaptureDevice::new("cam1", "Back Camera"),
            CaptureDevice::new("cam2", "Front Camera"),
        ]))
    }

    fn session(camera: &Arc<SimulatedCamera>) -> CaptureSession {
        CaptureSession::new(camera.clone(), Arc::new(NullPreview))
    }

    #[tokio::test]
    async fn test_open_and_close() {
        let camera = two_cameras();
        let preview = Arc::new(RecordingPreview::default());
        let mut session = CaptureSession::new(camera.clone(), preview.clone());

        let outcome = session
            .open(Some("cam1".into()), &CaptureConstraints::default())
            .await
            .unwrap();
        let opened = match outcome {
            OpenOutcome::Opened(opened) => opened,
            OpenOutcome::AlreadyOpen => panic!("expected a new stream"),
        };
        assert_eq!(opened.device_id, "cam1");
        assert!(session.is_open());
        assert_eq!(preview.attached(), 1);

        session.close().await;
        assert!(!session.is_open());
        assert_eq!(preview.attached(), 0);
        assert_eq!(camera.open_count(), 1);
        assert_eq!(camera.close_count(), 1);

        // Idempotent
        session.close().await;
        assert_eq!(camera.close_count(), 1);
    }

    #[tokio::test]
    async fn test_close_without_open_is_noop() {
        let camera = two_cameras();
        let mut session = session(&camera);
        session.close().await;
        assert_eq!(camera.close_count(), 0);
    }

    #[tokio::test]
    async fn test_reopen_same_device_is_noop() {
        let camera = two_cameras();
        let mut session = session(&camera);
        let constraints = CaptureConstraints::default();

        session.open(Some("cam1".into()), &constraints).await.unwrap();
        let outcome = session.open(Some("cam1".into()), &constraints).await.unwrap();
        assert!(matches!(outcome, OpenOutcome::AlreadyOpen));
        let outcome = session.open(None, &constraints).await.unwrap();
        assert!(matches!(outcome, OpenOutcome::AlreadyOpen));
        assert_eq!(camera.open_count(), 1);
    }

    #[tokio::test]
    async fn test_different_device_closes_first() {
        let camera = two_cameras();
        let mut session = session(&camera);
        let constraints = CaptureConstraints::default();

        session.open(Some("cam1".into()), &constraints).await.unwrap();
        session.open(Some("cam2".into()), &constraints).await.unwrap();

        let log = camera.events();
        let closed_cam1 = log
            .iter()
            .position(|e| matches!(e, CameraEvent::Closed { device_id, .. } if device_id == "cam1"))
            .unwrap();
        let requested_cam2 = log
            .iter()
            .position(|e| matches!(e, CameraEvent::OpenRequested { device_id } if device_id == "cam2"))
            .unwrap();
        assert!(closed_cam1 < requested_cam2);
        assert_eq!(session.device_id(), Some("cam2"));
    }

    #[tokio::test]
    async fn test_failure_classification() {
        let camera = two_cameras();
        let mut session = session(&camera);
        let constraints = CaptureConstraints::default();

        camera.set_behavior("cam1", OpenBehavior::PermissionDenied);
        let err = session.open(Some("cam1".into()), &constraints).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Permission);
        assert!(!err.recoverable);
        assert_eq!(err.retry_action, RetryAction::None);

        camera.set_behavior("cam1", OpenBehavior::Busy);
        let err = session.open(Some("cam1".into()), &constraints).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::CameraUnavailable);
        assert!(err.recoverable);
        assert_eq!(
            err.retry_action,
            RetryAction::ReopenDevice {
                device_id: Some("cam1".into())
            }
        );

        camera.set_behavior("cam1", OpenBehavior::Unsupported);
        let err = session.open(Some("cam1".into()), &constraints).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unsupported);

        camera.set_behavior("cam1", OpenBehavior::Fail);
        let err = session.open(Some("cam1".into()), &constraints).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::CameraUnavailable);
        assert_eq!(err.retry_action, RetryAction::ReopenDevice { device_id: None });

        let err = session.open(Some("ghost".into()), &constraints).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::CameraUnavailable);

        assert!(!session.is_open());
        assert_eq!(camera.open_count(), 0);
    }

    #[tokio::test]
    async fn test_dropped_session_releases_stream() {
        let camera = two_cameras();
        {
            let mut session = session(&camera);
            session
                .open(Some("cam1".into()), &CaptureConstraints::default())
                .await
                .unwrap();
        }

        tokio::time::timeout(Duration::from_secs(1), async {
            while camera.close_count() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(camera.open_count(), 1);
        assert_eq!(camera.close_count(), 1);
        assert_eq!(camera.active_streams(), 0);
    }

    #[test]
    fn test_drop_after_runtime_shutdown_releases_stream() {
        let camera = two_cameras();
        let preview = Arc::new(RecordingPreview::default());
        let mut session = CaptureSession::new(camera.clone(), preview.clone());

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let opened = runtime.block_on(session.open(Some("cam1".into()), &CaptureConstraints::default()));
        assert!(matches!(opened, Ok(OpenOutcome::Opened(_))));
        drop(runtime);

        drop(session);

        assert_eq!(camera.open_count(), 1);
        assert_eq!(camera.close_count(), 1);
        assert_eq!(camera.active_streams(), 0);
        assert_eq!(preview.attached(), 0);
    }

    #[test]
    fn test_drop_on_plain_thread_uses_opening_runtime() {
        let camera = two_cameras();
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let mut session = session(&camera);
        runtime
            .block_on(session.open(Some("cam2".into()), &CaptureConstraints::default()))
            .unwrap();

        std::thread::spawn(move || drop(session)).join().unwrap();

        assert_eq!(camera.close_count(), 1);
        assert_eq!(camera.active_streams(), 0);
    }
}
