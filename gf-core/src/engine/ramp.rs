//! Ramp controller
//!
//! Turns a desired fan speed into a bounded sequence of actuations:
//! small differences are ignored, changes are rate limited, and large
//! differences are walked in steps with a short pause between them.
//!
//! The controller-state mutex is held for a whole call, so the monitor loop
//! and the limit enforcer never interleave their actuation sequences.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use gf_error::GpufanError;
use gf_gpu::Device;

use crate::constants::{curve as curve_const, ramp};
use crate::data::{ControllerState, GpuState};
use crate::error::Result;

/// Ramp tuning, persisted as the `ramp` settings section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RampConfig {
    /// Differences at or below this are skipped (non-initial calls)
    pub min_delta: u8,
    /// Minimum spacing between applied changes
    pub rate_limit_ms: u64,
    pub default_step: u8,
    pub coarse_step: u8,
    pub fine_step: u8,
    /// Differences above this use `coarse_step`
    pub coarse_threshold: u8,
    /// Differences below this use `fine_step`
    pub fine_threshold: u8,
    /// Above this temperature the step is at least `urgent_step`
    pub urgent_temp: i32,
    pub urgent_step: u8,
    /// Pause between intermediate steps
    pub step_pause_ms: u64,
}

impl Default for RampConfig {
    fn default() -> Self {
        Self {
            min_delta: ramp::MIN_DELTA,
            rate_limit_ms: ramp::RATE_LIMIT.as_millis() as u64,
            default_step: ramp::DEFAULT_STEP,
            coarse_step: ramp::COARSE_STEP,
            fine_step: ramp::FINE_STEP,
            coarse_threshold: ramp::COARSE_THRESHOLD,
            fine_threshold: ramp::FINE_THRESHOLD,
            urgent_temp: ramp::URGENT_TEMP,
            urgent_step: ramp::URGENT_STEP,
            step_pause_ms: ramp::STEP_PAUSE.as_millis() as u64,
        }
    }
}

impl RampConfig {
    pub fn rate_limit(&self) -> Duration {
        Duration::from_millis(self.rate_limit_ms)
    }

    pub fn step_pause(&self) -> Duration {
        Duration::from_millis(self.step_pause_ms)
    }

    /// Step size for a given difference
    pub fn step_for(&self, difference: u8, is_initial: bool, temperature: Option<i32>) -> u8 {
        let mut step = if difference > self.coarse_threshold {
            self.coarse_step
        } else if difference < self.fine_threshold {
            self.fine_step
        } else {
            self.default_step
        };

        let urgent = temperature.is_some_and(|t| t > self.urgent_temp);
        if is_initial || urgent {
            step = step.max(self.urgent_step);
        }
        step.max(1)
    }

    /// Intermediate and final values walked from `current` to `target`
    pub fn plan(&self, current: u8, target: u8, step: u8) -> Vec<u8> {
        let mut values = Vec::new();
        let mut position = current as i16;
        let target_i = target as i16;
        let direction: i16 = if target_i > position { 1 } else { -1 };

        while (target_i - position).abs() > step as i16 {
            position += direction * step as i16;
            values.push(position as u8);
        }
        if values.last().copied() != Some(target) {
            values.push(target);
        }
        values
    }
}

/// Why a call did not actuate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Difference at or below `min_delta`
    BelowThreshold,
    /// Inside the rate-limit window
    RateLimited,
}

/// Result of a ramp call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RampOutcome {
    Skipped(SkipReason),
    Applied {
        from: Option<u8>,
        to: u8,
        /// Every value written, in order
        writes: Vec<u8>,
        /// How many of those writes the device rejected
        failed: usize,
    },
}

impl RampOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, RampOutcome::Applied { .. })
    }
}

pub struct RampController {
    device: Arc<dyn Device>,
    gpu: Arc<RwLock<GpuState>>,
    config: RampConfig,
    state: Mutex<ControllerState>,
}

impl RampController {
    pub fn new(device: Arc<dyn Device>, gpu: Arc<RwLock<GpuState>>, config: RampConfig) -> Self {
        let state = ControllerState {
            rate_limit: config.rate_limit(),
            ..ControllerState::default()
        };
        Self {
            device,
            gpu,
            config,
            state: Mutex::new(state),
        }
    }

    pub fn config(&self) -> &RampConfig {
        &self.config
    }

    /// Copy of the actuation bookkeeping
    pub fn state(&self) -> ControllerState {
        self.state.lock().clone()
    }

    pub fn current_fan(&self) -> Option<u8> {
        self.state.lock().current_fan
    }

    /// Move the fan toward `target`.
    ///
    /// `is_initial` bypasses the delta and rate-limit checks and applies the
    /// target in a single actuation.
    pub fn move_towards(&self, target: u8, is_initial: bool) -> Result<RampOutcome> {
        let target = target.min(curve_const::MAX_FAN);
        let mut state = self.state.lock();

        if state.current_fan.is_none() && !is_initial {
            match self.device.read_fan_speed() {
                Ok(speed) => {
                    debug!(speed, "RAMP: read unknown current fan speed from device");
                    state.current_fan = Some(speed);
                }
                Err(e) => debug!(error = %e, "RAMP: current fan speed unknown"),
            }
        }

        let difference = state.current_fan.map(|c| c.abs_diff(target));

        if !is_initial {
            if difference.is_some_and(|d| d <= self.config.min_delta) {
                return Ok(RampOutcome::Skipped(SkipReason::BelowThreshold));
            }
            if state.rate_limited(Instant::now()) {
                debug!(target, "RAMP: rate limited");
                return Ok(RampOutcome::Skipped(SkipReason::RateLimited));
            }
        }

        if !state.fan_control_enabled {
            self.device.enable_fan_control().map_err(|e| match e {
                GpufanError::ControlUnavailable(_) => e,
                other => GpufanError::ControlUnavailable(other.to_string()),
            })?;
            info!(device = %self.device.name(), "Manual fan control enabled");
            state.fan_control_enabled = true;
        }

        let temperature = self.gpu.read().effective_temperature();
        let from = state.current_fan;

        let writes = match (from, difference) {
            (Some(current), Some(difference)) if !is_initial => {
                let step = self.config.step_for(difference, is_initial, temperature);
                if difference <= step {
                    vec![target]
                } else {
                    self.config.plan(current, target, step)
                }
            }
            _ => vec![target],
        };

        debug!(?from, target, steps = writes.len(), "RAMP: applying");

        let mut failed = 0;
        let last = writes.len().saturating_sub(1);
        for (i, &value) in writes.iter().enumerate() {
            if let Err(e) = self.device.write_fan_speed(value) {
                warn!(value, error = %e, "RAMP: fan write failed");
                failed += 1;
                state.failed_writes += 1;
            }
            // Bookkeeping follows the intended value even when a write fails
            state.record(value, Instant::now());

            if i < last {
                std::thread::sleep(self.config.step_pause());
            }
        }

        if failed == writes.len() {
            return Err(GpufanError::actuator(format!(
                "all {} write(s) toward {}% failed",
                failed, target
            )));
        }

        Ok(RampOutcome::Applied {
            from,
            to: target,
            writes,
            failed,
        })
    }

    /// Apply `target` immediately, bypassing stepping and rate limiting
    pub fn force(&self, target: u8) -> Result<RampOutcome> {
        self.move_towards(target, true)
    }
}
