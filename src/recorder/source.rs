//! Capture source trait
//!
//! Defines the interface every capture backend implements (screen, camera,
//! microphone, system audio) and the sample envelope they deliver.

use crate::capture::traits::{AudioDeviceInfo, CameraInfo, DisplayInfo};
use crate::muxer::types::MuxError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors that can occur during recording
#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Already recording")]
    AlreadyRecording,

    #[error("Not recording")]
    NotRecording,

    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    #[error("Capture error: {0}")]
    CaptureError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Muxer error: {0}")]
    Muxer(#[from] MuxError),
}

/// Result type for recording operations
pub type RecordingResult<T> = Result<T, RecordingError>;

/// A video frame, tightly packed RGBA8
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    /// Raw pixel data (RGBA, no row padding)
    pub data: Vec<u8>,

    /// Frame width in pixels
    pub width: u32,

    /// Frame height in pixels
    pub height: u32,

    /// Presentation timestamp on the shared media clock
    pub pts: Duration,
}

impl VideoFrame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, pts: Duration) -> Self {
        Self {
            data,
            width,
            height,
            pts,
        }
    }

    /// A frame where every pixel has the same color
    pub fn filled(width: u32, height: u32, rgba: [u8; 4], pts: Duration) -> Self {
        let data = rgba
            .iter()
            .copied()
            .cycle()
            .take((width * height * 4) as usize)
            .collect();
        Self::new(data, width, height, pts)
    }

    /// Whether the buffer length matches the dimensions
    pub fn is_well_formed(&self) -> bool {
        self.data.len() == (self.width as usize) * (self.height as usize) * 4
    }

    /// RGBA value at (x, y), if inside the frame
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = ((y * self.width + x) * 4) as usize;
        self.data
            .get(idx..idx + 4)
            .map(|p| [p[0], p[1], p[2], p[3]])
    }
}

/// A block of interleaved f32 audio samples
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,

    /// Timestamp of the first sample in the block
    pub pts: Duration,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, channels: u16, sample_rate: u32, pts: Duration) -> Self {
        Self {
            samples,
            channels,
            sample_rate,
            pts,
        }
    }

    /// Number of sample frames (samples per channel)
    pub fn frame_count(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    /// Playback duration of this block
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frame_count() as f64 / self.sample_rate as f64)
    }
}

/// Payload delivered by a capture source
#[derive(Debug, Clone)]
pub enum Sample {
    Video(VideoFrame),
    Audio(AudioFrame),
}

/// Types of capture sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    /// Screen/display capture (primary video)
    Screen,
    /// Webcam capture (secondary video)
    Camera,
    /// Microphone capture
    Microphone,
    /// System audio mix capture
    SystemAudio,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Screen => write!(f, "screen"),
            SourceKind::Camera => write!(f, "camera"),
            SourceKind::Microphone => write!(f, "microphone"),
            SourceKind::SystemAudio => write!(f, "system-audio"),
        }
    }
}

/// Configuration applied to a source before it starts
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SourceConfig {
    /// Display id, camera index/name or audio device name (None = default)
    pub device_id: Option<String>,

    /// Target frames per second (video sources only)
    pub frame_rate: u32,
}

/// Out-of-band notifications from a running source
#[derive(Debug, Clone, PartialEq)]
pub enum SourceEvent {
    /// The source stopped on its own (device lost, stream error)
    StoppedUnexpectedly { kind: SourceKind, reason: String },
}

/// Callback invoked on the source's delivery thread for every sample
pub type SampleHandler = Arc<dyn Fn(Sample) + Send + Sync>;

/// Channel used by sources to report unexpected stops
pub type SourceEventSender = mpsc::UnboundedSender<SourceEvent>;

/// Trait for capture sources
///
/// A source owns its device between `start` and `stop` and delivers samples
/// on its own thread. Setup failures are returned from `configure`/`start`;
/// failures after start are reported through the event sender.
#[async_trait]
pub trait CaptureSource: Send + Sync {
    /// Which kind of source this is
    fn kind(&self) -> SourceKind;

    /// Register the per-sample callback
    fn set_sample_handler(&mut self, handler: SampleHandler);

    /// Register the unexpected-stop channel
    fn set_event_sender(&mut self, events: SourceEventSender);

    /// Validate the device and remember the configuration
    async fn configure(&mut self, config: &SourceConfig) -> RecordingResult<()>;

    /// Start delivering samples
    async fn start(&mut self) -> RecordingResult<()>;

    /// Stop delivering samples and release the device
    async fn stop(&mut self) -> RecordingResult<()>;

    /// Pause delivery. Sources without a cheaper path just stop.
    async fn pause(&mut self) -> RecordingResult<()> {
        self.stop().await
    }

    /// Resume delivery after `pause`
    async fn resume(&mut self) -> RecordingResult<()> {
        self.start().await
    }

    /// Check if the source is currently delivering
    fn is_running(&self) -> bool;
}

/// Device enumeration and source construction
///
/// Stands in for the platform layers that list displays and devices; the
/// coordinator only ever talks to sources through this.
pub trait CaptureBackend: Send + Sync {
    /// Currently attached displays
    fn displays(&self) -> RecordingResult<Vec<DisplayInfo>>;

    /// Currently attached cameras
    fn cameras(&self) -> Vec<CameraInfo>;

    /// Currently attached audio input devices
    fn audio_input_devices(&self) -> Vec<AudioDeviceInfo>;

    /// Build a fresh, unconfigured source
    fn create_source(&self, kind: SourceKind) -> RecordingResult<Box<dyn CaptureSource>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filled_frame_is_well_formed() {
        let frame = VideoFrame::filled(4, 3, [1, 2, 3, 255], Duration::ZERO);
        assert!(frame.is_well_formed());
        assert_eq!(frame.pixel(3, 2), Some([1, 2, 3, 255]));
        assert_eq!(frame.pixel(4, 0), None);
    }

    #[test]
    fn test_audio_frame_duration() {
        let frame = AudioFrame::new(vec![0.0; 960], 2, 48_000, Duration::ZERO);
        assert_eq!(frame.frame_count(), 480);
        assert_eq!(frame.duration(), Duration::from_millis(10));
    }

    #[test]
    fn test_source_kind_display() {
        assert_eq!(SourceKind::SystemAudio.to_string(), "system-audio");
        assert_eq!(SourceKind::Screen.to_string(), "screen");
    }
}
