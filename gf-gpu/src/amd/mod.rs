//! AMD GPU access
//!
//! Readings and fan control via sysfs (amdgpu driver).
//! Requires write access to `/sys/class/drm/card*/device/hwmon/*/pwm1`

use crate::{gpu_const, ClockKind, Device, Result};
use gf_error::GpufanError;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// An amdgpu card exposing a hwmon directory
#[derive(Debug, Clone)]
pub struct AmdCard {
    pub card_num: u32,
    pub device_path: PathBuf,
    pub hwmon_path: PathBuf,
}

pub struct AmdDevice {
    card: AmdCard,
    name: String,
}

impl AmdDevice {
    /// Bind to the `gpu_index`-th AMD card (ordered by DRM card number)
    pub fn open(gpu_index: u32) -> Result<Self> {
        let card = find_cards()?
            .into_iter()
            .nth(gpu_index as usize)
            .ok_or_else(|| {
                GpufanError::HardwareNotFound(format!("AMD GPU {} not found", gpu_index))
            })?;
        Ok(Self::from_card(card))
    }

    pub fn from_card(card: AmdCard) -> Self {
        let name = read_gpu_name(&card.device_path);
        info!("Opened AMD GPU card{} ({}) at {:?}", card.card_num, name, card.hwmon_path);
        Self { card, name }
    }

    fn hwmon(&self, file: &str) -> PathBuf {
        self.card.hwmon_path.join(file)
    }

    fn write_attr(&self, path: &Path, value: &str) -> Result<()> {
        fs::write(path, value).map_err(|source| GpufanError::FileWrite {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl Device for AmdDevice {
    fn name(&self) -> String {
        format!("{} (card{})", self.name, self.card.card_num)
    }

    fn read_temperature(&self) -> Result<i32> {
        let millidegrees: i64 = read_number(&self.hwmon("temp1_input"))
            .map_err(|e| GpufanError::sensor(e.to_string()))?;
        Ok((millidegrees / gpu_const::MILLIDEGREE_DIVISOR) as i32)
    }

    fn read_fan_speed(&self) -> Result<u8> {
        let raw: u32 = read_number(&self.hwmon("pwm1"))?;
        Ok(gpu_const::pwm::to_percent(raw.min(gpu_const::pwm::MAX as u32) as u8))
    }

    fn enable_fan_control(&self) -> Result<()> {
        let enable_path = self.hwmon("pwm1_enable");
        if !enable_path.exists() {
            return Err(GpufanError::ControlUnavailable(format!(
                "{} has no pwm1_enable",
                self.card.hwmon_path.display()
            )));
        }
        self.write_attr(&enable_path, gpu_const::pwm::MODE_MANUAL)
            .map_err(|e| GpufanError::ControlUnavailable(e.to_string()))?;
        debug!("Enabled manual fan control on card{}", self.card.card_num);
        Ok(())
    }

    fn write_fan_speed(&self, percent: u8) -> Result<()> {
        let pwm_value = gpu_const::pwm::from_percent(percent);
        self.write_attr(&self.hwmon("pwm1"), &pwm_value.to_string())
            .map_err(|e| GpufanError::actuator(e.to_string()))?;
        debug!("Set AMD GPU fan to {}% (PWM: {})", percent, pwm_value);
        Ok(())
    }

    fn read_clock(&self, kind: ClockKind) -> Result<i32> {
        let file = match kind {
            ClockKind::Core => "pp_dpm_sclk",
            ClockKind::Memory => "pp_dpm_mclk",
        };
        let path = self.card.device_path.join(file);
        let content = fs::read_to_string(&path).map_err(|source| GpufanError::FileRead {
            path: path.clone(),
            source,
        })?;
        parse_active_dpm_level(&content)
            .ok_or_else(|| GpufanError::Parse(format!("no active level in {}", path.display())))
    }

    fn write_clock_offset(&self, kind: ClockKind, _offset_mhz: i32) -> Result<()> {
        Err(GpufanError::NotSupported(format!(
            "{} clock offsets on amdgpu",
            kind
        )))
    }

    fn read_power_limit(&self) -> Result<u32> {
        let microwatts: u64 = read_number(&self.hwmon("power1_cap"))?;
        Ok((microwatts / gpu_const::MICROWATTS_PER_WATT) as u32)
    }

    fn write_power_limit(&self, watts: u32) -> Result<()> {
        let microwatts = watts as u64 * gpu_const::MICROWATTS_PER_WATT;
        self.write_attr(&self.hwmon("power1_cap"), &microwatts.to_string())?;
        info!("Set power cap on card{} to {} W", self.card.card_num, watts);
        Ok(())
    }
}

/// All amdgpu cards under the DRM class directory
pub fn find_cards() -> Result<Vec<AmdCard>> {
    find_cards_in(Path::new(gpu_const::DRM_PATH))
}

pub fn find_cards_in(drm_path: &Path) -> Result<Vec<AmdCard>> {
    if !drm_path.exists() {
        return Err(GpufanError::HardwareNotFound(format!(
            "DRM path {} not found",
            drm_path.display()
        )));
    }

    let mut cards = Vec::new();
    for entry in fs::read_dir(drm_path)? {
        let entry = entry?;
        let name = entry.file_name();
        let name_str = name.to_string_lossy();

        // Skip connectors such as card0-DP-1
        if !name_str.starts_with("card") || name_str.contains('-') {
            continue;
        }
        let Ok(card_num) = name_str.trim_start_matches("card").parse::<u32>() else {
            continue;
        };

        let device_path = entry.path().join("device");
        if !is_amd_gpu(&device_path) {
            continue;
        }
        let Some(hwmon_path) = find_hwmon(&device_path) else {
            debug!("AMD card{} has no hwmon directory", card_num);
            continue;
        };

        cards.push(AmdCard {
            card_num,
            device_path,
            hwmon_path,
        });
    }

    cards.sort_by_key(|c| c.card_num);
    Ok(cards)
}

fn is_amd_gpu(device_path: &Path) -> bool {
    fs::read_to_string(device_path.join("vendor"))
        .map(|id| id.trim() == gpu_const::AMD_VENDOR_ID)
        .unwrap_or(false)
}

fn find_hwmon(device_path: &Path) -> Option<PathBuf> {
    fs::read_dir(device_path.join("hwmon"))
        .ok()?
        .flatten()
        .map(|e| e.path())
        .find(|p| p.join("pwm1").exists())
}

fn read_gpu_name(device_path: &Path) -> String {
    match fs::read_to_string(device_path.join("product_name")) {
        Ok(name) if !name.trim().is_empty() => name.trim().to_string(),
        _ => "AMD GPU".to_string(),
    }
}

fn read_number<T: std::str::FromStr>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path).map_err(|source| GpufanError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;
    content
        .trim()
        .parse()
        .map_err(|_| GpufanError::Parse(format!("{}: '{}'", path.display(), content.trim())))
}

/// Extract the MHz of the line marked `*` in a `pp_dpm_*` table
pub fn parse_active_dpm_level(content: &str) -> Option<i32> {
    let line = content.lines().find(|l| l.trim_end().ends_with('*'))?;
    let value = line.split(':').nth(1)?.trim().trim_end_matches('*').trim();
    let digits = value.trim_end_matches(|c: char| c.is_ascii_alphabetic());
    digits.trim().parse().ok()
}
