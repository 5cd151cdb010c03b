//! User settings persisted as JSON.

use crate::audio::capture::TapConfig;
use crate::controller::ControllerConfig;
use crate::doppler::config::{BandConfiguration, ConfigError, Preset};
use crate::doppler::temperature::DEFAULT_TEMPERATURE_C;
use crate::util::audio::{DEFAULT_FRAME_SIZE, DEFAULT_SAMPLE_RATE};
use crate::util::units::{SpeedUnit, TemperatureUnit};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

pub fn config_dir() -> PathBuf {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("dopplermeter")
}

pub fn default_path() -> PathBuf {
    config_dir().join("settings.json")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub preset: Preset,
    pub temperature_c: f64,
    pub speed_unit: SpeedUnit,
    pub temperature_unit: TemperatureUnit,
    pub sample_rate: f32,
    pub frame_size: usize,
    pub samples_per_frame: usize,
    pub report_interval_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            preset: Preset::Default,
            temperature_c: DEFAULT_TEMPERATURE_C,
            speed_unit: SpeedUnit::default(),
            temperature_unit: TemperatureUnit::default(),
            sample_rate: DEFAULT_SAMPLE_RATE,
            frame_size: DEFAULT_FRAME_SIZE,
            samples_per_frame: DEFAULT_FRAME_SIZE,
            report_interval_ms: 500,
        }
    }
}

impl Settings {
    /// Reads `path`, falling back to defaults when the file is missing or
    /// unreadable as settings.
    pub fn load_or_default(path: &Path) -> Self {
        let mut settings: Settings = fs::read_to_string(path)
            .ok()
            .and_then(|s| {
                serde_json::from_str(&s)
                    .map_err(|e| warn!("[settings] parse error {path:?}: {e}"))
                    .ok()
            })
            .unwrap_or_default();
        settings.sanitize();
        settings
    }

    /// Writes through a temporary file so a crash never leaves a torn file.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating settings directory {parent:?}"))?;
        }
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, json).with_context(|| format!("writing {temp_path:?}"))?;
        fs::rename(&temp_path, path).with_context(|| format!("replacing {path:?}"))?;
        info!("[settings] saved {path:?}");
        Ok(())
    }

    fn sanitize(&mut self) {
        let defaults = Settings::default();
        if !self.temperature_c.is_finite() {
            self.temperature_c = defaults.temperature_c;
        }
        if !self.sample_rate.is_finite() || self.sample_rate <= 0.0 {
            warn!("[settings] invalid sample rate {}; using default", self.sample_rate);
            self.sample_rate = defaults.sample_rate;
        }
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms)
    }

    /// The selected preset rescaled to the configured frame geometry.
    pub fn band_configuration(&self) -> Result<BandConfiguration, ConfigError> {
        self.preset
            .configuration()
            .scale_frame_size(self.frame_size)?
            .scale_samples_per_frame(self.samples_per_frame)
    }

    pub fn controller_config(&self) -> Result<ControllerConfig, ConfigError> {
        Ok(ControllerConfig {
            band: self.band_configuration()?,
            sample_rate: self.sample_rate,
            temperature_c: self.temperature_c,
            report_interval: self.report_interval(),
        })
    }

    pub fn tap_config(&self) -> TapConfig {
        TapConfig {
            ring_len: self.frame_size,
            hop: self.samples_per_frame,
        }
    }
}
