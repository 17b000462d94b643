//! Recorder settings
//!
//! Persisted as JSON. Missing fields take their defaults so older files
//! keep loading.

use crate::muxer::types::{MuxerConfig, QualityPreset};
use crate::utils::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// User-facing recording settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecorderSettings {
    /// Directory recordings are written to
    pub output_dir: PathBuf,

    /// File name prefix
    pub file_prefix: String,

    pub quality: QualityPreset,

    /// Capture and output frame rate
    pub fps: u32,

    /// Seconds to count down before capture starts (0 = none)
    pub countdown_seconds: u32,

    /// Display to record (None = primary)
    pub display_id: Option<u32>,

    pub capture_camera: bool,
    pub camera_device_id: Option<String>,

    pub capture_microphone: bool,
    pub microphone_device_id: Option<String>,

    pub capture_system_audio: bool,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("recordings"),
            file_prefix: "Recording".to_string(),
            quality: QualityPreset::default(),
            fps: 30,
            countdown_seconds: 3,
            display_id: None,
            capture_camera: false,
            camera_device_id: None,
            capture_microphone: true,
            microphone_device_id: None,
            capture_system_audio: false,
        }
    }
}

impl RecorderSettings {
    /// Load from `path`, falling back to defaults when it does not exist
    pub fn load(path: &Path) -> AppResult<Self> {
        if !path.exists() {
            tracing::debug!("No settings at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let settings: Self = serde_json::from_str(&content)?;
        settings.validate()?;
        tracing::debug!("Loaded settings from {:?}", path);
        Ok(settings)
    }

    /// Write as pretty JSON, creating parent directories
    pub fn save(&self, path: &Path) -> AppResult<()> {
        self.validate()?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        tracing::debug!("Saved settings to {:?}", path);
        Ok(())
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.fps == 0 || self.fps > 240 {
            return Err(AppError::Settings(format!(
                "fps must be between 1 and 240, got {}",
                self.fps
            )));
        }
        Ok(())
    }

    /// Output configuration for the muxer
    pub fn muxer_config(&self) -> MuxerConfig {
        let mut config = MuxerConfig::from_preset(self.quality, self.fps);
        config.include_camera = self.capture_camera;
        config.include_mic_audio = self.capture_microphone;
        config.include_system_audio = self.capture_system_audio;
        config
    }
}
