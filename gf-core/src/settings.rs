//! Application Settings
//!
//! Persistent settings stored as JSON in ~/.config/gpufan/settings.json.
//! Every field has a serde default, so partial or older files still load.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use gf_gpu::Backend;

use crate::constants::{paths, timing};
use crate::data::{validate_fan_percent, validate_poll_interval_ms, validate_temp_limit, write_atomic};
use crate::engine::{CurvePreset, LimitConfig, MonitorConfig, RampConfig, SafetyConfig};
use crate::error::{GpufanError, Result};

/// Application settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AppSettings {
    /// General settings
    #[serde(default)]
    pub general: GeneralSettings,

    /// Ramp controller tuning
    #[serde(default)]
    pub ramp: RampConfig,

    /// Fail-safe speeds and thresholds
    #[serde(default)]
    pub safety: SafetyConfig,

    /// Thermal limit enforcement
    #[serde(default)]
    pub limit: LimitConfig,
}

/// General application settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneralSettings {
    /// Device backend
    #[serde(default)]
    pub backend: Backend,

    /// GPU index within the backend
    #[serde(default)]
    pub gpu_index: u32,

    /// Sensor polling interval in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Upper bound on shutdown wait in milliseconds
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_ms: u64,

    /// Curve file in line format; defaults to ~/.config/gpufan/curve.txt
    #[serde(default)]
    pub curve_file: Option<PathBuf>,

    /// Preset used when no curve file exists
    #[serde(default = "default_preset")]
    pub preset: String,

    /// Write the curve file after every edit
    #[serde(default = "default_true")]
    pub autosave_curve: bool,
}

fn default_poll_interval() -> u64 {
    timing::POLL_INTERVAL.as_millis() as u64
}
fn default_stop_timeout() -> u64 {
    timing::STOP_TIMEOUT.as_millis() as u64
}
fn default_preset() -> String {
    CurvePreset::Default.name().to_string()
}
fn default_true() -> bool {
    true
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            gpu_index: 0,
            poll_interval_ms: default_poll_interval(),
            stop_timeout_ms: default_stop_timeout(),
            curve_file: None,
            preset: default_preset(),
            autosave_curve: true,
        }
    }
}

impl AppSettings {
    /// Reject values the controller cannot run with
    pub fn validate(&self) -> Result<()> {
        validate_poll_interval_ms(self.general.poll_interval_ms)?;
        validate_temp_limit(self.limit.temp_limit)?;
        self.general.preset.parse::<CurvePreset>()?;

        validate_fan_percent("safety.max_fan", self.safety.max_fan)?;
        validate_fan_percent("safety.fallback_fan", self.safety.fallback_fan)?;
        validate_fan_percent("safety.rest_floor", self.safety.rest_floor)?;
        validate_fan_percent("safety.rest_default", self.safety.rest_default)?;
        validate_fan_percent("safety.init_fallback", self.safety.init_fallback)?;

        let ramp = &self.ramp;
        if [ramp.default_step, ramp.coarse_step, ramp.fine_step, ramp.urgent_step].contains(&0) {
            return Err(GpufanError::invalid_config("ramp", "step sizes must be at least 1"));
        }
        if ramp.fine_threshold > ramp.coarse_threshold {
            return Err(GpufanError::invalid_config(
                "ramp.fine_threshold",
                "must not exceed ramp.coarse_threshold",
            ));
        }
        Ok(())
    }

    pub fn preset(&self) -> CurvePreset {
        self.general.preset.parse().unwrap_or_default()
    }

    /// Curve file location, explicit or default
    pub fn curve_path(&self) -> Option<PathBuf> {
        self.general
            .curve_file
            .clone()
            .or_else(paths::default_curve_path)
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            poll_interval: Duration::from_millis(self.general.poll_interval_ms),
            stop_timeout: Duration::from_millis(self.general.stop_timeout_ms),
            safety: self.safety.clone(),
            limit_check_ticks: if self.limit.enforce_in_loop {
                self.limit.check_interval_ticks
            } else {
                0
            },
        }
    }
}

/// Get the settings file path
/// Linux: ~/.config/gpufan/settings.json (the sudo user's when elevated)
pub fn get_settings_path() -> Result<PathBuf> {
    paths::settings_path().ok_or_else(|| GpufanError::config("Could not determine config directory"))
}

/// Load settings from the default location, falling back to defaults
pub fn load_settings() -> Result<AppSettings> {
    load_settings_from(&get_settings_path()?)
}

/// Load and validate settings from `path`; a missing file yields defaults
pub fn load_settings_from(path: &Path) -> Result<AppSettings> {
    if !path.exists() {
        debug!(path = %path.display(), "No settings file, using defaults");
        return Ok(AppSettings::default());
    }

    let content = fs::read_to_string(path).map_err(|source| GpufanError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;
    let settings: AppSettings = serde_json::from_str(&content)?;
    settings.validate()?;

    info!(path = %path.display(), "Loaded settings");
    Ok(settings)
}

/// Save settings to the default location
pub fn save_settings(settings: &AppSettings) -> Result<()> {
    save_settings_to(&get_settings_path()?, settings)
}

pub fn save_settings_to(path: &Path, settings: &AppSettings) -> Result<()> {
    settings.validate()?;
    let json = serde_json::to_string_pretty(settings)?;
    write_atomic(path, json.as_bytes())?;
    debug!(path = %path.display(), "Saved settings");
    Ok(())
}
