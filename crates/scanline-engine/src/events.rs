//! Outbound notifications to the embedding application.
//!
//! Callbacks run inline on the controller's tasks and must return quickly.

use scanline_core::{AcceptedScan, ScannerError, ScannerState};

/// Sink for scanner notifications (implemented by the UI integration).
pub trait ScannerEvents: Send + Sync {
    /// Every published state snapshot.
    fn on_state(&self, state: &ScannerState);

    /// Each accepted scan, in acceptance order.
    fn on_scan(&self, scan: &AcceptedScan);

    /// Each surfaced capture or decode failure.
    fn on_error(&self, error: &ScannerError);
}

/// No-op sink for callers that only use the channels.
pub struct NoOpEvents;

impl ScannerEvents for NoOpEvents {
    fn on_state(&self, _state: &ScannerState) {}
    fn on_scan(&self, _scan: &AcceptedScan) {}
    fn on_error(&self, _error: &ScannerError) {}
}
