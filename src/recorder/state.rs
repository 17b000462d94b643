//! Recording state management
//!
//! Defines the recording state machine values, session tracking and the
//! events broadcast on every transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Current state of the recording system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RecordingState {
    /// No recording in progress
    #[default]
    Idle,
    /// Counting down before capture starts
    #[serde(rename_all = "camelCase")]
    Countdown { seconds_remaining: u32 },
    /// Currently recording
    Recording,
    /// Recording is paused
    Paused,
    /// Finalizing the output file
    Finishing,
}

impl std::fmt::Display for RecordingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordingState::Idle => write!(f, "idle"),
            RecordingState::Countdown { seconds_remaining } => {
                write!(f, "counting down ({}s)", seconds_remaining)
            }
            RecordingState::Recording => write!(f, "recording"),
            RecordingState::Paused => write!(f, "paused"),
            RecordingState::Finishing => write!(f, "finishing"),
        }
    }
}

/// Notifications for observers of the coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum RecordingEvent {
    CountdownTick(u32),
    Started,
    Paused,
    Resumed,
    Stopped(PathBuf),
    Error(String),
}

/// The recording in progress
///
/// Exists from the transition into `Recording` until the file is finalized.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSession {
    pub id: Uuid,

    pub started_at: DateTime<Utc>,

    /// Recorded time, excluding pauses
    pub duration: Duration,

    pub output_path: PathBuf,
}

impl RecordingSession {
    /// Create a new session starting now
    pub fn new(output_path: PathBuf) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            duration: Duration::ZERO,
            output_path,
        }
    }
}

/// Result of a completed recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedRecording {
    pub id: Uuid,

    pub started_at: DateTime<Utc>,

    /// Total recorded time, excluding pauses
    pub duration: Duration,

    /// Path to the output file
    pub output_path: PathBuf,
}

impl From<RecordingSession> for CompletedRecording {
    fn from(session: RecordingSession) -> Self {
        Self {
            id: session.id,
            started_at: session.started_at,
            duration: session.duration,
            output_path: session.output_path,
        }
    }
}

/// Wall-clock time spent recording, excluding pauses
#[derive(Debug, Clone, Copy, Default)]
pub struct ElapsedTimer {
    accumulated: Duration,
    running_since: Option<Instant>,
}

impl ElapsedTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start or continue counting
    pub fn resume(&mut self) {
        if self.running_since.is_none() {
            self.running_since = Some(Instant::now());
        }
    }

    /// Stop counting, keeping what was accumulated
    pub fn pause(&mut self) {
        if let Some(since) = self.running_since.take() {
            self.accumulated += since.elapsed();
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.accumulated + self.running_since.map(|s| s.elapsed()).unwrap_or_default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_serializes_with_tag() {
        let json = serde_json::to_string(&RecordingState::Countdown {
            seconds_remaining: 3,
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"countdown","secondsRemaining":3}"#);

        let idle: RecordingState = serde_json::from_str(r#"{"type":"idle"}"#).unwrap();
        assert_eq!(idle, RecordingState::Idle);
    }

    #[test]
    fn test_completed_keeps_session_values() {
        let mut session = RecordingSession::new(PathBuf::from("/tmp/rec.mp4"));
        session.duration = Duration::from_secs(12);
        let completed = CompletedRecording::from(session.clone());
        assert_eq!(completed.id, session.id);
        assert_eq!(completed.duration, Duration::from_secs(12));
        assert_eq!(completed.output_path, PathBuf::from("/tmp/rec.mp4"));
    }

    #[test]
    fn test_timer_excludes_paused_time() {
        let mut timer = ElapsedTimer::new();
        assert_eq!(timer.elapsed(), Duration::ZERO);

        timer.resume();
        std::thread::sleep(Duration::from_millis(20));
        timer.pause();
        let after_pause = timer.elapsed();
        assert!(after_pause >= Duration::from_millis(20));

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(timer.elapsed(), after_pause);

        timer.reset();
        assert_eq!(timer.elapsed(), Duration::ZERO);
    }
}
