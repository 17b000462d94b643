//! Native capture backend
//!
//! Enumerates devices through xcap, nokhwa and cpal and builds the
//! matching source for each kind.

use crate::capture::audio::{get_input_devices, MicrophoneSource, SystemAudioSource};
use crate::capture::screen::{get_displays, ScreenSource};
use crate::capture::traits::{AudioDeviceInfo, CameraInfo, DisplayInfo};
use crate::capture::webcam::{get_cameras, CameraSource};
use crate::muxer::clock::MediaClock;
use crate::recorder::source::{CaptureBackend, CaptureSource, RecordingResult, SourceKind};

/// Backend over the real devices
///
/// Every source it builds stamps samples on the same clock the
/// coordinator uses for pause and resume.
pub struct NativeBackend {
    clock: MediaClock,
}

impl NativeBackend {
    pub fn new(clock: MediaClock) -> Self {
        Self { clock }
    }
}

impl CaptureBackend for NativeBackend {
    fn displays(&self) -> RecordingResult<Vec<DisplayInfo>> {
        get_displays()
    }

    fn cameras(&self) -> Vec<CameraInfo> {
        get_cameras()
    }

    fn audio_input_devices(&self) -> Vec<AudioDeviceInfo> {
        get_input_devices()
    }

    fn create_source(&self, kind: SourceKind) -> RecordingResult<Box<dyn CaptureSource>> {
        let source: Box<dyn CaptureSource> = match kind {
            SourceKind::Screen => Box::new(ScreenSource::new(self.clock)),
            SourceKind::Camera => Box::new(CameraSource::new(self.clock)),
            SourceKind::Microphone => Box::new(MicrophoneSource::new(self.clock)),
            SourceKind::SystemAudio => Box::new(SystemAudioSource::new(self.clock)),
        };
        Ok(source)
    }
}
