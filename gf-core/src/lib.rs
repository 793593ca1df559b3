//! Gpufan Core Library
//!
//! Temperature-driven GPU fan control with fail-safe supervision.
//!
//! # Features
//!
//! - **Fan Curves**: Piecewise-linear temperature → fan speed mapping with presets
//! - **Ramping**: Rate-limited, stepped fan transitions
//! - **Safety Monitor**: Periodic loop that absorbs sensor and actuator faults
//! - **Thermal Limit**: Fan escalation and clock reduction above a user limit
//! - **Persistence**: Line-format curve files and JSON settings
//!
//! # Module Structure
//!
//! - `data/` - Data types, state, persistence, validation
//! - `engine/` - Curve, ramp controller, limit enforcer, safety monitor
//! - `controller` - Facade tying one device to all of the above
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use gf_core::{AppSettings, CurvePreset, GpuController};
//! use gf_gpu::SimulatedDevice;
//!
//! # async fn run() -> gf_core::Result<()> {
//! let device = Arc::new(SimulatedDevice::new(55));
//! let controller = GpuController::with_curve(
//!     device,
//!     CurvePreset::Default.to_curve(),
//!     &AppSettings::default(),
//! );
//!
//! controller.start().await?;
//! controller.add_or_update_point(60, 50);
//! let resting = controller.stop().await;
//! # Ok(())
//! # }
//! ```

// Grouped modules
pub mod data;
pub mod engine;

// Standalone modules
pub mod constants;
pub mod controller;
pub mod error;
pub mod settings;

#[cfg(test)]
mod test_utils;

// Re-export primary types from data/
pub use data::{ChartPosition, ControlPoint, ControllerSnapshot, ControllerState, GpuState};

// Re-export persistence functions from data/
pub use data::{format_curve, load_curve, parse_curve, save_curve, ParsedCurve};

// Re-export validation functions from data/
pub use data::{
    validate_curve_points, validate_fan_percent, validate_poll_interval_ms,
    validate_power_limit, validate_temp_limit,
};

// Re-export error types
pub use error::{GpufanError, Result};

// Re-export engine types
pub use engine::{
    evaluate_limit, Curve, CurvePreset, LimitConfig, LimitDecision, LimitInput, LimitOutcome,
    MonitorConfig, RampConfig, RampController, RampOutcome, SafetyConfig, SafetyMonitor, Sample,
    SharedCurve, SkipReason, ThermalLimitEnforcer, TickOutcome,
};

pub use controller::GpuController;

// Re-export settings functions
pub use settings::{
    get_settings_path, load_settings, load_settings_from, save_settings, save_settings_to,
    AppSettings, GeneralSettings,
};
