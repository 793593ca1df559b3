//! Command line interface
//!
//! Every flag overrides the matching settings value for this run only,
//! unless `--save-settings` is given.

use clap::Parser;
use std::path::PathBuf;

use gf_core::{AppSettings, CurvePreset};
use gf_gpu::Backend;

#[derive(Debug, Parser)]
#[command(name = "gpufand", version, about = "GPU fan curve daemon")]
pub struct Cli {
    /// Settings file (default: ~/.config/gpufan/settings.json)
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Device backend: auto, nvidia, amdgpu, simulated
    #[arg(short, long, value_name = "BACKEND")]
    pub backend: Option<Backend>,

    /// GPU index within the backend
    #[arg(long, value_name = "N")]
    pub gpu_index: Option<u32>,

    /// Sensor polling interval in milliseconds
    #[arg(long, value_name = "MS")]
    pub interval_ms: Option<u64>,

    /// Curve file in line format
    #[arg(long, value_name = "FILE")]
    pub curve: Option<PathBuf>,

    /// Preset used when the curve file is missing or empty
    #[arg(long, value_name = "NAME")]
    pub preset: Option<CurvePreset>,

    /// Temperature limit in °C
    #[arg(long, value_name = "C")]
    pub temp_limit: Option<i32>,

    /// Print a JSON status snapshot and exit without controlling fans
    #[arg(long)]
    pub status: bool,

    /// Write a preset curve to FILE and exit
    #[arg(long, num_args = 2, value_names = ["NAME", "FILE"])]
    pub export_preset: Option<Vec<String>>,

    /// Persist the overrides above to the settings file
    #[arg(long)]
    pub save_settings: bool,
}

impl Cli {
    /// Fold command line overrides into loaded settings
    pub fn apply_overrides(&self, settings: &mut AppSettings) {
        let general = &mut settings.general;
        if let Some(backend) = self.backend {
            general.backend = backend;
        }
        if let Some(index) = self.gpu_index {
            general.gpu_index = index;
        }
        if let Some(ms) = self.interval_ms {
            general.poll_interval_ms = ms;
        }
        if let Some(curve) = &self.curve {
            general.curve_file = Some(curve.clone());
        }
        if let Some(preset) = self.preset {
            general.preset = preset.name().to_string();
        }
        if let Some(limit) = self.temp_limit {
            settings.limit.temp_limit = limit;
        }
    }

    /// `--export-preset NAME FILE`, parsed
    pub fn export_request(&self) -> anyhow::Result<Option<(CurvePreset, PathBuf)>> {
        match self.export_preset.as_deref() {
            Some([name, file]) => Ok(Some((name.parse()?, PathBuf::from(file)))),
            Some(other) => anyhow::bail!("--export-preset takes NAME FILE, got {:?}", other),
            None => Ok(None),
        }
    }
}
