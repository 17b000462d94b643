//! Device descriptions
//!
//! Platform-agnostic descriptions of displays, cameras and audio devices
//! as reported by the capture backend.

use serde::{Deserialize, Serialize};

/// Information about a display/screen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayInfo {
    /// Unique display ID
    pub id: u32,

    /// Display name
    pub name: String,

    /// Width in pixels
    pub width: u32,

    /// Height in pixels
    pub height: u32,

    /// Scale factor (e.g., 2.0 for Retina)
    pub scale_factor: f64,

    /// Whether this is the primary display
    pub is_primary: bool,

    /// Refresh rate in Hz (if available)
    pub refresh_rate: Option<u32>,
}

/// Information about an audio device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioDeviceInfo {
    /// Unique device ID
    pub id: String,

    /// Device name
    pub name: String,

    /// Whether this is an input device
    pub is_input: bool,

    /// Whether this is the default device
    pub is_default: bool,
}

/// Information about a camera/webcam
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraInfo {
    /// Unique device ID
    pub id: String,

    /// Device name
    pub name: String,

    /// Supported resolutions
    pub supported_resolutions: Vec<Resolution>,
}

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// Pick the display to record
///
/// A requested id wins when it is attached; otherwise the primary display,
/// then the first one listed.
pub fn select_display(displays: &[DisplayInfo], requested: Option<u32>) -> Option<&DisplayInfo> {
    if let Some(id) = requested {
        if let Some(display) = displays.iter().find(|d| d.id == id) {
            return Some(display);
        }
        tracing::warn!("Display {} not found, falling back to primary", id);
    }
    displays
        .iter()
        .find(|d| d.is_primary)
        .or_else(|| displays.first())
}
