//! GPU device interface for Gpufan
//!
//! The control core never touches hardware directly. It talks to a [`Device`],
//! which is implemented for:
//! - NVIDIA GPUs (via nvidia-smi and nvidia-settings)
//! - AMD GPUs (via amdgpu driver and sysfs)
//! - A simulated in-memory GPU used for dry runs and tests

pub mod amd;
pub mod nvidia;
pub mod simulated;

pub mod constants;
mod types;

pub use constants as gpu_const;
pub use simulated::{Actuation, SimulatedDevice};
pub use types::*;

use gf_error::GpufanError;
use std::sync::Arc;
use tracing::{debug, info};

pub type Result<T> = std::result::Result<T, GpufanError>;

/// Synchronous access to one GPU's sensors and actuators.
///
/// Every call may fail or return an implausible value; callers decide how to
/// substitute. Implementations must be shareable across the monitor task and
/// operator-initiated calls.
pub trait Device: Send + Sync {
    /// Human readable name for logs
    fn name(&self) -> String;

    /// Current core temperature in °C
    fn read_temperature(&self) -> Result<i32>;

    /// Current fan speed in percent
    fn read_fan_speed(&self) -> Result<u8>;

    /// Switch the fan to manual (software) control
    fn enable_fan_control(&self) -> Result<()>;

    /// Command every fan on the device to `percent`
    fn write_fan_speed(&self, percent: u8) -> Result<()>;

    /// Observed clock in MHz
    fn read_clock(&self, kind: ClockKind) -> Result<i32>;

    /// Apply an absolute clock offset in MHz
    fn write_clock_offset(&self, kind: ClockKind, offset_mhz: i32) -> Result<()>;

    /// Board power limit in watts
    fn read_power_limit(&self) -> Result<u32>;

    fn write_power_limit(&self, watts: u32) -> Result<()>;
}

/// Open the device for `gpu_index` on the requested backend
pub fn open_device(backend: Backend, gpu_index: u32) -> Result<Arc<dyn Device>> {
    match backend {
        Backend::Nvidia => Ok(Arc::new(nvidia::NvidiaDevice::open(gpu_index)?)),
        Backend::Amdgpu => Ok(Arc::new(amd::AmdDevice::open(gpu_index)?)),
        Backend::Simulated => Ok(Arc::new(SimulatedDevice::with_thermal_model(
            simulated::DEFAULT_IDLE_TEMP,
            simulated::DEFAULT_LOAD_TEMP,
        ))),
        Backend::Auto => {
            let backend = detect_backend()?;
            info!("Auto-detected {} backend", backend);
            open_device(backend, gpu_index)
        }
    }
}

/// Pick the first hardware backend that responds
pub fn detect_backend() -> Result<Backend> {
    match nvidia::probe() {
        Ok(count) if count > 0 => return Ok(Backend::Nvidia),
        Ok(_) => debug!("nvidia-smi reported no GPUs"),
        Err(e) => debug!("No NVIDIA GPUs detected: {}", e),
    }

    match amd::find_cards() {
        Ok(cards) if !cards.is_empty() => return Ok(Backend::Amdgpu),
        Ok(_) => debug!("No amdgpu cards with hwmon"),
        Err(e) => debug!("No AMD GPUs detected: {}", e),
    }

    Err(GpufanError::HardwareNotFound(
        "no supported GPU found (tried nvidia, amdgpu)".to_string(),
    ))
}
