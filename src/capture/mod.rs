//! Capture backends
//!
//! Screen, camera, microphone and system audio sources plus device
//! enumeration.

pub mod audio;
pub mod backend;
pub mod screen;
pub mod traits;
pub mod webcam;
pub mod worker;

pub use backend::NativeBackend;
pub use traits::{select_display, AudioDeviceInfo, CameraInfo, DisplayInfo, Resolution};
