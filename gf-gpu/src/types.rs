//! GPU data types

use gf_error::GpufanError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Clock domain addressed by clock reads and offset writes
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ClockKind {
    /// Graphics (core) clock
    Core,
    /// Memory transfer rate
    Memory,
}

impl std::fmt::Display for ClockKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClockKind::Core => write!(f, "core"),
            ClockKind::Memory => write!(f, "memory"),
        }
    }
}

/// Which device implementation backs a controller
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Probe NVIDIA first, then AMD
    #[default]
    Auto,
    Nvidia,
    Amdgpu,
    /// In-memory device, no hardware access
    Simulated,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Auto => write!(f, "auto"),
            Backend::Nvidia => write!(f, "nvidia"),
            Backend::Amdgpu => write!(f, "amdgpu"),
            Backend::Simulated => write!(f, "simulated"),
        }
    }
}

impl FromStr for Backend {
    type Err = GpufanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Backend::Auto),
            "nvidia" => Ok(Backend::Nvidia),
            "amd" | "amdgpu" => Ok(Backend::Amdgpu),
            "sim" | "simulated" => Ok(Backend::Simulated),
            other => Err(GpufanError::invalid_config(
                "backend",
                format!("unknown backend '{}'", other),
            )),
        }
    }
}
