//! Input validation for operator-supplied values
//!
//! Everything that arrives from settings files or the command line passes
//! through here before it reaches the controller.

use crate::constants::{curve as curve_const, limit, timing};
use crate::data::ControlPoint;
use crate::error::{GpufanError, Result};

/// Validates a temperature limit (°C)
pub fn validate_temp_limit(value: i32) -> Result<i32> {
    if !(limit::MIN_LIMIT..=limit::MAX_LIMIT).contains(&value) {
        return Err(GpufanError::invalid_config(
            "temp_limit",
            format!(
                "{}°C is outside {}-{}°C",
                value,
                limit::MIN_LIMIT,
                limit::MAX_LIMIT
            ),
        ));
    }
    Ok(value)
}

/// Validates a poll interval in milliseconds
pub fn validate_poll_interval_ms(value: u64) -> Result<u64> {
    let min = timing::MIN_POLL_INTERVAL.as_millis() as u64;
    if value < min {
        return Err(GpufanError::invalid_config(
            "poll_interval_ms",
            format!("{} ms is below the minimum of {} ms", value, min),
        ));
    }
    Ok(value)
}

/// Validates a fan speed percentage (0-100)
pub fn validate_fan_percent(field: &str, value: u8) -> Result<u8> {
    if value > curve_const::MAX_FAN {
        return Err(GpufanError::invalid_config(
            field,
            format!("{}% is above 100%", value),
        ));
    }
    Ok(value)
}

/// Validates a power limit in watts
pub fn validate_power_limit(watts: u32) -> Result<u32> {
    if watts == 0 {
        return Err(GpufanError::invalid_config("power_limit", "must be positive"));
    }
    Ok(watts)
}

/// Validates points supplied as a whole curve
pub fn validate_curve_points(points: &[ControlPoint]) -> Result<()> {
    if points.is_empty() {
        return Err(GpufanError::EmptyCurve);
    }
    if let Some(p) = points.iter().find(|p| p.fan_speed > curve_const::MAX_FAN) {
        return Err(GpufanError::InvalidEdit(format!(
            "fan speed {}% at {}°C is above 100%",
            p.fan_speed, p.temperature
        )));
    }
    Ok(())
}
