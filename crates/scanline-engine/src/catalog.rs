//! Device enumeration.
//!
//! Wraps the provider's raw list with the cleanup and preferred-device rules
//! from `scanline_core::devices`, and maps enumeration failures onto the
//! scanner error taxonomy:
//!
//! | Provider result       | Outcome                                   |
//! |-----------------------|-------------------------------------------|
//! | `PermissionDenied`    | empty listing, `permission_granted: false` |
//! | `Unsupported`         | `ScannerError::unsupported` (fatal)       |
//! | anything else         | `ScannerError::camera_unavailable`        |

use std::sync::Arc;

use tracing::{debug, info, warn};

use scanline_core::devices::{preferred_device, sanitize_devices};
use scanline_core::{CaptureDevice, DeviceId, ScannerError};

use crate::provider::{CaptureFailure, CaptureProvider};

/// Result of one enumeration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceListing {
    pub devices: Vec<CaptureDevice>,
    pub preferred: Option<DeviceId>,
    /// `Some(false)` when the provider refused to enumerate.
    pub permission_granted: Option<bool>,
}

pub struct DeviceCatalog {
    provider: Arc<dyn CaptureProvider>,
}

impl DeviceCatalog {
    pub fn new(provider: Arc<dyn CaptureProvider>) -> Self {
        DeviceCatalog { provider }
    }

    pub async fn enumerate(&self) -> Result<DeviceListing, ScannerError> {
        match self.provider.list_devices().await {
            Ok(raw) => {
                let raw_count = raw.len();
                let devices = sanitize_devices(raw);
                let preferred = preferred_device(&devices).map(|d| d.id.clone());
                info!(
                    count = devices.len(),
                    dropped = raw_count - devices.len(),
                    preferred = ?preferred,
                    "Enumerated capture devices"
                );
                Ok(DeviceListing {
                    devices,
                    preferred,
                    permission_granted: None,
                })
            }
            Err(CaptureFailure::PermissionDenied(message)) => {
                warn!(%message, "Device enumeration denied, returning empty listing");
                Ok(DeviceListing {
                    permission_granted: Some(false),
                    ..Default::default()
                })
            }
            Err(CaptureFailure::Unsupported(message)) => {
                Err(ScannerError::unsupported(message))
            }
            Err(other) => {
                debug!(error = %other, "Device enumeration failed");
                Err(ScannerError::camera_unavailable(other.to_string(), None))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedCamera;
    use scanline_core::ErrorKind;

    #[tokio::test]
    async fn test_enumerate_prefers_rear_camera() {
        let camera = Arc::new(SimulatedCamera::new(vec![
            CaptureDevice::new("front", "Front Camera"),
            CaptureDevice::new("", "Broken"),
            CaptureDevice::new("rear", "Back Camera"),
        ]));
        let catalog = DeviceCatalog::new(camera);

        let listing = catalog.enumerate().await.unwrap();
        assert_eq!(listing.devices.len(), 2);
        assert_eq!(listing.preferred.as_deref(), Some("rear"));
        assert!(listing.devices.iter().any(|d| d.id == "front"));
        assert_eq!(listing.permission_granted, None);
    }

    #[tokio::test]
    async fn test_enumerate_empty() {
        let catalog = DeviceCatalog::new(Arc::new(SimulatedCamera::new(vec![])));
        let listing = catalog.enumerate().await.unwrap();
        assert!(listing.devices.is_empty());
        assert_eq!(listing.preferred, None);
    }

    #[tokio::test]
    async fn test_permission_denied_is_empty_listing() {
        let camera = Arc::new(SimulatedCamera::new(vec![CaptureDevice::new("cam1", "Back")]));
        camera.fail_enumeration(Some(CaptureFailure::PermissionDenied("nope".into())));

        let listing = DeviceCatalog::new(camera).enumerate().await.unwrap();
        assert!(listing.devices.is_empty());
        assert_eq!(listing.permission_granted, Some(false));
    }

    #[tokio::test]
    async fn test_enumeration_failures_are_classified() {
        let camera = Arc::new(SimulatedCamera::new(vec![]));
        let catalog = DeviceCatalog::new(camera.clone());

        camera.fail_enumeration(Some(CaptureFailure::Unsupported("no api".into())));
        let err = catalog.enumerate().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unsupported);
        assert!(err.is_fatal());

        camera.fail_enumeration(Some(CaptureFailure::Other("driver crashed".into())));
        let err = catalog.enumerate().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::CameraUnavailable);
        assert!(err.recoverable);
    }
}
