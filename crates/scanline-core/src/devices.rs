//! Device list cleanup and preferred-camera heuristics.
//!
//! Providers report labels such as "Back Camera", "camera2 0, facing back"
//! or "Integrated Webcam". The only signal we get about orientation is the
//! label, so facing is guessed from keywords.

use std::collections::HashSet;

use crate::types::{CaptureDevice, Facing};

const ENVIRONMENT_KEYWORDS: [&str; 4] = ["back", "rear", "environment", "world"];
const USER_KEYWORDS: [&str; 4] = ["front", "user", "facetime", "selfie"];

/// Guesses which way a camera points from its label (case-insensitive).
pub fn classify_facing(label: &str) -> Facing {
    let label = label.to_lowercase();
    if ENVIRONMENT_KEYWORDS.iter().any(|kw| label.contains(kw)) {
        Facing::Environment
    } else if USER_KEYWORDS.iter().any(|kw| label.contains(kw)) {
        Facing::User
    } else {
        Facing::Unknown
    }
}

/// Drops devices with blank ids and repeated ids (first wins), and labels
/// unnamed devices "Camera N" by their position in the cleaned list.
pub fn sanitize_devices(raw: Vec<CaptureDevice>) -> Vec<CaptureDevice> {
    let mut seen = HashSet::new();
    let mut devices = Vec::with_capacity(raw.len());

    for device in raw {
        let id = device.id.trim();
        if id.is_empty() || !seen.insert(id.to_string()) {
            continue;
        }
        let label = device.display_label.trim();
        let display_label = if label.is_empty() {
            format!("Camera {}", devices.len() + 1)
        } else {
            label.to_string()
        };
        devices.push(CaptureDevice {
            id: id.to_string(),
            display_label,
        });
    }

    devices
}

/// Picks the first rear-facing device, else the first device.
pub fn preferred_device(devices: &[CaptureDevice]) -> Option<&CaptureDevice> {
    devices
        .iter()
        .find(|d| classify_facing(&d.display_label) == Facing::Environment)
        .or_else(|| devices.first())
}
