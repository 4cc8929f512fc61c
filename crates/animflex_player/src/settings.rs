// SPDX-License-Identifier: MIT OR Apache-2.0
//! Player settings file.

use animflex_sequencer::ControllerSettings;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Current settings format version
pub const SETTINGS_FORMAT_VERSION: u32 = 1;

/// Log filter used when neither `RUST_LOG` nor the settings file set one
pub const DEFAULT_LOG_FILTER: &str = "animflex=info,animflex_sequencer=info";

/// Errors from reading or writing settings
#[derive(Debug, Error)]
pub enum SettingsError {
    /// File access failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The RON text could not be parsed
    #[error("failed to parse settings: {0}")]
    Parse(#[from] ron::error::SpannedError),
    /// The settings could not be written as RON
    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] ron::Error),
    /// The file was written by a newer format
    #[error("settings version {found} is newer than supported version {supported}")]
    UnsupportedVersion {
        /// Version in the file
        found: u32,
        /// Newest version this build reads
        supported: u32,
    },
    /// A value is out of range
    #[error("invalid setting: {0}")]
    Invalid(String),
}

/// Playback settings for the headless player
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerSettings {
    /// Format version
    pub version: u32,
    /// Fixed updates per second
    pub frame_rate: f32,
    /// Multiplier applied to every frame delta
    pub time_scale: f32,
    /// Upper bound for a single scaled frame delta, in seconds
    pub max_delta_time: f32,
    /// Stop after this many frames even if sequences are still running
    pub max_frames: u64,
    /// `tracing` filter directives
    pub log_filter: String,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        let controller = ControllerSettings::default();
        Self {
            version: SETTINGS_FORMAT_VERSION,
            frame_rate: 60.0,
            time_scale: controller.time_scale,
            max_delta_time: controller.max_delta_time,
            max_frames: 36_000,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl PlayerSettings {
    /// Load settings from a file
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path)?;
        let settings: PlayerSettings = ron::from_str(&content)?;

        if settings.version > SETTINGS_FORMAT_VERSION {
            return Err(SettingsError::UnsupportedVersion {
                found: settings.version,
                supported: SETTINGS_FORMAT_VERSION,
            });
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Save settings to a file
    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        let config = ron::ser::PrettyConfig::default()
            .struct_names(true)
            .enumerate_arrays(false);

        let content = ron::ser::to_string_pretty(self, config)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject values the player cannot run with
    pub fn validate(&self) -> Result<(), SettingsError> {
        if !self.frame_rate.is_finite() || self.frame_rate <= 0.0 {
            return Err(SettingsError::Invalid(format!(
                "frame_rate must be positive, got {}",
                self.frame_rate
            )));
        }
        if !self.time_scale.is_finite() || self.time_scale < 0.0 {
            return Err(SettingsError::Invalid(format!(
                "time_scale must not be negative, got {}",
                self.time_scale
            )));
        }
        if !self.max_delta_time.is_finite() || self.max_delta_time <= 0.0 {
            return Err(SettingsError::Invalid(format!(
                "max_delta_time must be positive, got {}",
                self.max_delta_time
            )));
        }
        Ok(())
    }

    /// Seconds per fixed update
    pub fn frame_delta(&self) -> f32 {
        1.0 / self.frame_rate
    }

    /// The part of the settings the sequence controller uses
    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            time_scale: self.time_scale,
            max_delta_time: self.max_delta_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("animflex-{}-{name}.ron", std::process::id()))
    }

    #[test]
    fn test_settings_serialization() {
        let settings = PlayerSettings {
            frame_rate: 30.0,
            ..Default::default()
        };

        let path = temp_path("settings");
        settings.save(&path).unwrap();
        let loaded = PlayerSettings::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let settings: PlayerSettings = ron::from_str("(frame_rate: 24.0)").unwrap();
        assert_eq!(settings.frame_rate, 24.0);
        assert_eq!(settings.log_filter, DEFAULT_LOG_FILTER);
        assert_eq!(settings.max_frames, PlayerSettings::default().max_frames);
    }

    #[test]
    fn test_demo_settings_parse() {
        let settings: PlayerSettings = ron::from_str(include_str!("../../../demos/player.ron")).unwrap();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.max_frames, 3600);
    }

    #[test]
    fn test_newer_version_rejected() {
        let path = temp_path("future");
        std::fs::write(&path, "(version: 99)").unwrap();
        let result = PlayerSettings::load(&path);
        std::fs::remove_file(&path).unwrap();

        assert!(matches!(result, Err(SettingsError::UnsupportedVersion { found: 99, .. })));
    }

    #[test]
    fn test_validation() {
        let mut settings = PlayerSettings::default();
        assert!(settings.validate().is_ok());

        settings.frame_rate = 0.0;
        assert!(matches!(settings.validate(), Err(SettingsError::Invalid(_))));

        settings.frame_rate = 60.0;
        settings.time_scale = -1.0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_controller_settings() {
        let settings = PlayerSettings {
            frame_rate: 50.0,
            time_scale: 2.0,
            ..Default::default()
        };
        assert_eq!(settings.frame_delta(), 0.02);
        assert_eq!(settings.controller_settings().time_scale, 2.0);
    }
}
