//! Recording system module
//!
//! - CaptureSource trait for the different capture sources
//! - RecordingCoordinator driving the recording state machine

pub mod coordinator;
pub mod source;
pub mod state;

pub use coordinator::RecordingCoordinator;
pub use source::{CaptureBackend, CaptureSource, RecordingError, RecordingResult};
pub use state::{CompletedRecording, RecordingEvent, RecordingSession, RecordingState};
