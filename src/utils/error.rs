//! Error types and handling
//!
//! Top-level error type for the settings store and the binary.

use crate::muxer::types::MuxError;
use crate::recorder::source::RecordingError;
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Recording error: {0}")]
    Recording(#[from] RecordingError),

    #[error("Muxer error: {0}")]
    Muxer(#[from] MuxError),

    #[error("Settings error: {0}")]
    Settings(String),
}

impl AppError {
    /// Stable code for logs and exit reporting
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Io(_) => "IO_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Recording(_) => "RECORDING_ERROR",
            AppError::Muxer(_) => "MUXER_ERROR",
            AppError::Settings(_) => "SETTINGS_ERROR",
        }
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;
