//! Runtime state shared between the control components
//!
//! `ControllerState` belongs to the ramp controller; `GpuState` is shared by
//! the monitor, the limit enforcer and the facade. Neither is persisted.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::constants::{limit, ramp};
use crate::data::ControlPoint;

/// Fan actuation bookkeeping
#[derive(Debug, Clone)]
pub struct ControllerState {
    /// Last commanded fan speed; `None` until known
    pub current_fan: Option<u8>,
    pub previous_fan: Option<u8>,
    /// When the last change was applied
    pub last_change: Option<Instant>,
    pub fan_control_enabled: bool,
    /// Minimum spacing between applied changes
    pub rate_limit: Duration,
    /// Individual fan writes rejected by the device
    pub failed_writes: u64,
}

impl Default for ControllerState {
    fn default() -> Self {
        Self {
            current_fan: None,
            previous_fan: None,
            last_change: None,
            fan_control_enabled: false,
            rate_limit: ramp::RATE_LIMIT,
            failed_writes: 0,
        }
    }
}

impl ControllerState {
    /// Record an applied speed
    pub fn record(&mut self, percent: u8, at: Instant) {
        self.previous_fan = self.current_fan;
        self.current_fan = Some(percent);
        self.last_change = Some(at);
    }

    /// True while a new change would fall inside the rate-limit window
    pub fn rate_limited(&self, now: Instant) -> bool {
        self.last_change
            .is_some_and(|t| now.saturating_duration_since(t) < self.rate_limit)
    }
}

/// Observed and applied GPU parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuState {
    /// Observed core clock (MHz)
    pub core_clock: Option<i32>,
    /// Observed memory clock (MHz)
    pub memory_clock: Option<i32>,
    /// Applied core clock offset (MHz)
    pub core_offset: i32,
    /// Applied memory clock offset (MHz)
    pub memory_offset: i32,
    /// Board power limit (W)
    pub power_limit: Option<u32>,
    /// Temperature ceiling enforced by the limit enforcer (°C)
    pub temp_limit: i32,
    /// Most recent sample as read from the device, plausible or not
    pub last_temperature: Option<i32>,
    /// Most recent plausible sample
    pub last_good_temperature: Option<i32>,
}

impl Default for GpuState {
    fn default() -> Self {
        Self {
            core_clock: None,
            memory_clock: None,
            core_offset: 0,
            memory_offset: 0,
            power_limit: None,
            temp_limit: limit::DEFAULT_LIMIT,
            last_temperature: None,
            last_good_temperature: None,
        }
    }
}

impl GpuState {
    pub fn with_temp_limit(mut self, temp_limit: i32) -> Self {
        self.temp_limit = temp_limit;
        self
    }

    /// Best temperature to act on: the last plausible sample
    pub fn effective_temperature(&self) -> Option<i32> {
        self.last_good_temperature
    }
}

/// Point-in-time view for the reporting surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerSnapshot {
    pub device: String,
    pub running: bool,
    pub temperature: Option<i32>,
    pub fan_speed: Option<u8>,
    pub previous_fan_speed: Option<u8>,
    pub fan_control_enabled: bool,
    /// Milliseconds since the last applied fan change
    pub ms_since_last_change: Option<u64>,
    pub failed_writes: u64,
    /// Target the active curve yields for `temperature`
    pub curve_target: Option<u8>,
    pub curve: Vec<ControlPoint>,
    pub gpu: GpuState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_shifts_previous() {
        let mut state = ControllerState::default();
        let now = Instant::now();
        state.record(40, now);
        state.record(55, now);
        assert_eq!(state.current_fan, Some(55));
        assert_eq!(state.previous_fan, Some(40));
    }

    #[test]
    fn test_rate_limit_window() {
        let mut state = ControllerState::default();
        let now = Instant::now();
        assert!(!state.rate_limited(now));
        state.record(40, now);
        assert!(state.rate_limited(now + Duration::from_millis(100)));
        assert!(!state.rate_limited(now + ramp::RATE_LIMIT));
    }

    #[test]
    fn test_gpu_state_defaults_are_absent_not_zero() {
        let gpu = GpuState::default();
        assert_eq!(gpu.core_clock, None);
        assert_eq!(gpu.power_limit, None);
        assert_eq!(gpu.effective_temperature(), None);
        assert_eq!(gpu.temp_limit, limit::DEFAULT_LIMIT);
    }
}
