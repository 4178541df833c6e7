use crate::apu::DEFAULT_BUFFER_LEN;
use emu_core::apu::TimingMode;
use emu_core::logging::{log, LogCategory, LogLevel};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot access config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Console options, stored as JSON. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatorConfig {
    pub timing: TimingMode,
    pub sample_rate: u32,
    /// Capacity of the APU sample buffer, in samples
    pub audio_buffer_len: usize,
    pub stereo: bool,
    pub sound_enabled: bool,
    /// Sleep the worker so frames come out at the console's real rate
    pub pace_frames: bool,
    /// Honour the PPUMASK colour emphasis bits
    pub emphasis: bool,
    /// Drop sprites past the eighth on a scanline
    pub sprite_limit: bool,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            timing: TimingMode::Ntsc,
            sample_rate: 44_100,
            audio_buffer_len: DEFAULT_BUFFER_LEN,
            stereo: false,
            sound_enabled: true,
            pace_frames: true,
            emphasis: true,
            sprite_limit: true,
        }
    }
}

impl EmulatorConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Load `path`, falling back to defaults (with a warning) if it is missing or broken.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(ConfigError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => {
                log(LogCategory::System, LogLevel::Warn, || {
                    format!("Config: {} ({}), using defaults", e, path.display())
                });
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn audio_channels(&self) -> u16 {
        if self.stereo {
            2
        } else {
            1
        }
    }
}
