//! Core data types for Gpufan

use serde::{Deserialize, Serialize};

use crate::constants::curve as curve_const;

/// One vertex of the temperature → fan speed response curve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ControlPoint {
    /// Temperature in °C
    pub temperature: i32,
    /// Fan speed in percent (0-100)
    pub fan_speed: u8,
}

impl ControlPoint {
    pub const fn new(temperature: i32, fan_speed: u8) -> Self {
        Self {
            temperature,
            fan_speed,
        }
    }

    /// Same point with both coordinates forced into the editable domain
    pub fn clamped(self) -> Self {
        Self {
            temperature: self
                .temperature
                .clamp(curve_const::MIN_TEMP, curve_const::MAX_TEMP),
            fan_speed: self.fan_speed.min(curve_const::MAX_FAN),
        }
    }
}

impl From<(i32, u8)> for ControlPoint {
    fn from((temperature, fan_speed): (i32, u8)) -> Self {
        Self::new(temperature, fan_speed)
    }
}

impl std::fmt::Display for ControlPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}°C → {}%", self.temperature, self.fan_speed)
    }
}

/// A continuous edit position (e.g. a pointer over a chart) in curve units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChartPosition {
    pub temperature: f64,
    pub fan_speed: f64,
}

impl ChartPosition {
    pub fn new(temperature: f64, fan_speed: f64) -> Self {
        Self {
            temperature,
            fan_speed,
        }
    }

    /// Truncate, snap each axis to the grid, then clamp to the curve domain
    pub fn to_control_point(self) -> ControlPoint {
        let temperature = snap_axis(self.temperature, curve_const::MIN_TEMP, curve_const::MAX_TEMP);
        let fan_speed = snap_axis(
            self.fan_speed,
            curve_const::MIN_FAN as i32,
            curve_const::MAX_FAN as i32,
        );

        ControlPoint::new(temperature, fan_speed as u8)
    }
}

/// Positions further than one axis span off the chart snap like the span edge
fn snap_axis(value: f64, min: i32, max: i32) -> i32 {
    let span = f64::from(max - min);
    let value = value.clamp(f64::from(min) - span, f64::from(max) + span) as i32;
    snap_to_grid(value, min, max).clamp(min, max)
}

/// Snap `value` to the nearest of `GRID_LINES` lines over `[min, max]` when
/// it lies within `SNAP_THRESHOLD` of that line; otherwise return it unchanged.
pub fn snap_to_grid(value: i32, min: i32, max: i32) -> i32 {
    let interval = max.saturating_sub(min) / curve_const::GRID_LINES;
    if interval <= 0 {
        return value;
    }

    let (value, min, interval) = (i64::from(value), i64::from(min), i64::from(interval));
    let nearest = min + (value - min + interval / 2).div_euclid(interval) * interval;

    if (value - nearest).abs() <= i64::from(curve_const::SNAP_THRESHOLD) {
        i32::try_from(nearest).unwrap_or(value as i32)
    } else {
        value as i32
    }
}
