//! Thermal limit enforcer
//!
//! Threshold policy with a hysteresis band:
//!
//! | Condition                         | Action                                   |
//! |-----------------------------------|------------------------------------------|
//! | `temp >= limit`                   | raise fan by 10 / 20 / max(+30, 90)%     |
//! | `temp >= limit + 3`               | additionally lower clock offsets         |
//! | `temp < limit - 10` and fan > 50% | lower fan by 5%                          |
//! | otherwise                         | nothing                                  |
//!
//! [`evaluate`] is the pure decision; [`ThermalLimitEnforcer`] applies it.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use gf_gpu::{ClockKind, Device};

use crate::constants::{curve as curve_const, limit, timing};
use crate::data::GpuState;
use crate::engine::ramp::{RampController, RampOutcome};

/// Limit settings, persisted as the `limit` settings section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitConfig {
    /// Temperature ceiling (°C)
    pub temp_limit: i32,
    /// Let the monitor loop re-check the limit periodically
    pub enforce_in_loop: bool,
    /// Ticks between periodic checks
    pub check_interval_ticks: u32,
    /// Allow clock offset reduction when far over the limit
    pub throttle_clocks: bool,
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            temp_limit: limit::DEFAULT_LIMIT,
            enforce_in_loop: true,
            check_interval_ticks: timing::LIMIT_CHECK_TICKS,
            throttle_clocks: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitInput {
    pub temperature: i32,
    pub limit: i32,
    /// Last commanded fan speed; `None` when unknown
    pub current_fan: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitDecision {
    /// Over the limit: raise fans, maybe throttle clocks
    Escalate {
        excess: i32,
        fan_target: u8,
        /// MHz to take off both clock offsets
        clock_reduction: Option<i32>,
    },
    /// Comfortably under the limit with fast fans
    Relax { fan_target: u8 },
    Hold,
}

/// Decide what to do for one temperature sample.
///
/// An unknown current fan speed escalates as if the excess were large,
/// since the bump would otherwise be relative to nothing.
pub fn evaluate(input: LimitInput) -> LimitDecision {
    let LimitInput {
        temperature,
        limit: ceiling,
        current_fan,
    } = input;

    if temperature >= ceiling {
        let excess = temperature - ceiling;
        let fan_target = match current_fan {
            Some(fan) if excess <= limit::SMALL_EXCESS => fan.saturating_add(limit::SMALL_BUMP),
            Some(fan) if excess <= limit::MEDIUM_EXCESS => fan.saturating_add(limit::MEDIUM_BUMP),
            Some(fan) => fan.saturating_add(limit::LARGE_BUMP).max(limit::LARGE_FLOOR),
            None => limit::LARGE_FLOOR,
        }
        .min(curve_const::MAX_FAN);

        let clock_reduction = (temperature >= ceiling + limit::THROTTLE_MARGIN).then(|| {
            (limit::THROTTLE_BASE + limit::THROTTLE_PER_DEGREE * excess).min(limit::THROTTLE_MAX)
        });

        return LimitDecision::Escalate {
            excess,
            fan_target,
            clock_reduction,
        };
    }

    match current_fan {
        Some(fan) if temperature < ceiling - limit::RELAX_MARGIN && fan > limit::RELAX_MIN_FAN => {
            LimitDecision::Relax {
                fan_target: fan - limit::RELAX_STEP,
            }
        }
        _ => LimitDecision::Hold,
    }
}

/// What an enforcement pass actually did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitOutcome {
    pub decision: LimitDecision,
    /// Ramp result for the fan request, if one was made and accepted
    pub fan: Option<RampOutcome>,
    pub fan_error: Option<String>,
    /// New offsets that were successfully written
    pub core_offset: Option<i32>,
    pub memory_offset: Option<i32>,
}

pub struct ThermalLimitEnforcer {
    device: Arc<dyn Device>,
    gpu: Arc<RwLock<GpuState>>,
    ramp: Arc<RampController>,
    throttle_clocks: bool,
}

impl ThermalLimitEnforcer {
    pub fn new(
        device: Arc<dyn Device>,
        gpu: Arc<RwLock<GpuState>>,
        ramp: Arc<RampController>,
        throttle_clocks: bool,
    ) -> Self {
        Self {
            device,
            gpu,
            ramp,
            throttle_clocks,
        }
    }

    /// Evaluate and apply the limit policy for `temperature`
    pub fn enforce(&self, temperature: i32) -> LimitOutcome {
        let ceiling = self.gpu.read().temp_limit;
        let current_fan = self
            .ramp
            .current_fan()
            .or_else(|| self.device.read_fan_speed().ok());

        let decision = evaluate(LimitInput {
            temperature,
            limit: ceiling,
            current_fan,
        });

        let mut outcome = LimitOutcome {
            decision,
            fan: None,
            fan_error: None,
            core_offset: None,
            memory_offset: None,
        };

        match decision {
            LimitDecision::Escalate {
                excess,
                fan_target,
                clock_reduction,
            } => {
                info!(
                    temp = temperature,
                    limit = ceiling,
                    excess,
                    fan_target,
                    "LIMIT: over temperature limit, taking corrective action"
                );
                self.request_fan(fan_target, &mut outcome);

                if let Some(reduction) = clock_reduction {
                    if self.throttle_clocks {
                        outcome.core_offset = self.reduce_clock(ClockKind::Core, reduction);
                        outcome.memory_offset = self.reduce_clock(ClockKind::Memory, reduction);
                    } else {
                        debug!(reduction, "LIMIT: clock throttling disabled");
                    }
                }
            }
            LimitDecision::Relax { fan_target } => {
                info!(
                    temp = temperature,
                    limit = ceiling,
                    fan_target,
                    "LIMIT: well below limit, relaxing fan"
                );
                self.request_fan(fan_target, &mut outcome);
            }
            LimitDecision::Hold => {
                debug!(temp = temperature, limit = ceiling, "LIMIT: within limits");
            }
        }

        outcome
    }

    fn request_fan(&self, target: u8, outcome: &mut LimitOutcome) {
        match self.ramp.move_towards(target, false) {
            Ok(result) => outcome.fan = Some(result),
            Err(e) => {
                warn!(target, error = %e, "LIMIT: fan request failed");
                outcome.fan_error = Some(e.to_string());
            }
        }
    }

    /// Lower one clock offset by `reduction` MHz, floored at 0
    fn reduce_clock(&self, kind: ClockKind, reduction: i32) -> Option<i32> {
        let current = {
            let gpu = self.gpu.read();
            match kind {
                ClockKind::Core => gpu.core_offset,
                ClockKind::Memory => gpu.memory_offset,
            }
        };
        let new_offset = (current - reduction).max(0);

        match self.device.write_clock_offset(kind, new_offset) {
            Ok(()) => {
                let mut gpu = self.gpu.write();
                match kind {
                    ClockKind::Core => gpu.core_offset = new_offset,
                    ClockKind::Memory => gpu.memory_offset = new_offset,
                }
                info!(%kind, from = current, to = new_offset, "LIMIT: clock offset reduced");
                Some(new_offset)
            }
            Err(e) => {
                warn!(%kind, error = %e, "LIMIT: clock offset write failed");
                None
            }
        }
    }
}
