//! Muxer types and configuration
//!
//! This module defines the types used for output configuration, writer
//! lifecycle tracking, and error handling.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Output quality presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum QualityPreset {
    #[serde(rename = "720p")]
    Hd720,
    #[default]
    #[serde(rename = "1080p")]
    Hd1080,
    #[serde(rename = "2160p")]
    Uhd2160,
}

impl QualityPreset {
    /// Output dimensions for this preset
    pub fn video_size(&self) -> (u32, u32) {
        match self {
            QualityPreset::Hd720 => (1280, 720),
            QualityPreset::Hd1080 => (1920, 1080),
            QualityPreset::Uhd2160 => (3840, 2160),
        }
    }

    /// Target video bitrate in bits per second
    pub fn bitrate(&self) -> u32 {
        match self {
            QualityPreset::Hd720 => 5_000_000,
            QualityPreset::Hd1080 => 10_000_000,
            QualityPreset::Uhd2160 => 40_000_000,
        }
    }
}

/// Tracks the muxer can write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Video,
    MicrophoneAudio,
    SystemAudio,
}

/// Audio inputs, each written to its own track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioTrack {
    Microphone,
    System,
}

impl AudioTrack {
    pub fn track_kind(&self) -> TrackKind {
        match self {
            AudioTrack::Microphone => TrackKind::MicrophoneAudio,
            AudioTrack::System => TrackKind::SystemAudio,
        }
    }

    /// Name used for intermediate files
    pub fn file_stem(&self) -> &'static str {
        match self {
            AudioTrack::Microphone => "microphone",
            AudioTrack::System => "system",
        }
    }
}

/// Output configuration passed to `Muxer::setup`
#[derive(Debug, Clone, PartialEq)]
pub struct MuxerConfig {
    /// Output video size (width, height)
    pub video_size: (u32, u32),
    /// Video bitrate in bits per second
    pub bitrate: u32,
    /// Output frame rate
    pub fps: u32,
    /// Composite the camera over the screen
    pub include_camera: bool,
    /// Write a microphone audio track
    pub include_mic_audio: bool,
    /// Write a system audio track
    pub include_system_audio: bool,
}

impl MuxerConfig {
    pub fn from_preset(preset: QualityPreset, fps: u32) -> Self {
        Self {
            video_size: preset.video_size(),
            bitrate: preset.bitrate(),
            fps,
            include_camera: false,
            include_mic_audio: false,
            include_system_audio: false,
        }
    }

    /// Whether a track was requested at setup
    pub fn has_track(&self, track: TrackKind) -> bool {
        match track {
            TrackKind::Video => true,
            TrackKind::MicrophoneAudio => self.include_mic_audio,
            TrackKind::SystemAudio => self.include_system_audio,
        }
    }

    /// Enabled audio tracks, in output order
    pub fn audio_tracks(&self) -> Vec<AudioTrack> {
        let mut tracks = Vec::new();
        if self.include_mic_audio {
            tracks.push(AudioTrack::Microphone);
        }
        if self.include_system_audio {
            tracks.push(AudioTrack::System);
        }
        tracks
    }
}

/// Lifecycle of the output writer
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum WriterState {
    #[default]
    Idle,
    Writing,
    Finishing,
    Finished,
    Failed(String),
}

impl std::fmt::Display for WriterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriterState::Idle => write!(f, "idle"),
            WriterState::Writing => write!(f, "writing"),
            WriterState::Finishing => write!(f, "finishing"),
            WriterState::Finished => write!(f, "finished"),
            WriterState::Failed(e) => write!(f, "failed ({e})"),
        }
    }
}

/// Outcome of offering a sample to the muxer
///
/// Anything other than `Accepted` means the sample was dropped. Drops are
/// expected (paused, backpressure) and never escalate to errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    NotWriting,
    Paused,
    SessionNotStarted,
    NotReady,
}

/// Sample counters, reported when the file is finalized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MuxerStats {
    pub video_appended: u64,
    pub video_dropped: u64,
    pub audio_appended: u64,
    pub audio_dropped: u64,
}

/// Completed output
#[derive(Debug, Clone, PartialEq)]
pub struct MuxOutput {
    pub path: PathBuf,
    pub stats: MuxerStats,
}

/// Muxer errors
#[derive(Error, Debug)]
pub enum MuxError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("FFmpeg error: {0}")]
    Ffmpeg(String),

    #[error("Muxer is already set up ({0})")]
    AlreadySetUp(WriterState),

    #[error("Invalid writer state: expected writing, found {0}")]
    InvalidState(WriterState),

    #[error("Encoding error: {0}")]
    Encoding(String),
}

/// Result type alias using MuxError
pub type MuxResult<T> = Result<T, MuxError>;
