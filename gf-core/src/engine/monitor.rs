//! Safety monitor loop
//!
//! Periodic task: sample temperature, look up the curve target, hand it to
//! the ramp controller. Anomalous readings and actuator faults are absorbed
//! here with fail-safe substitutions so the loop never dies.
//!
//! # Safety Features
//! - **Sensor fault**: failed or non-positive readings use the last good
//!   temperature, else 50°C
//! - **Runaway reading**: anything above 120°C forces 100% and skips the curve
//! - **Actuator fault**: one forced 70% fallback, further failures are logged
//! - **Shutdown**: fans are left at a computed resting speed, never "auto"

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use gf_error::GpufanError;
use gf_gpu::Device;

use crate::constants::{curve as curve_const, safety, timing};
use crate::data::GpuState;
use crate::engine::curve::SharedCurve;
use crate::engine::limit::{LimitDecision, LimitOutcome, ThermalLimitEnforcer};
use crate::engine::ramp::{RampController, RampOutcome};
use crate::error::Result;

/// Fail-safe values, persisted as the `safety` settings section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// Readings above this (°C) force `max_fan`
    pub sensor_ceiling: i32,
    /// Substitute when no good reading exists yet (°C)
    pub default_temp: i32,
    pub max_fan: u8,
    /// Forced once after an actuator fault
    pub fallback_fan: u8,
    /// Resting speed = max(rest_floor, last_temp - rest_offset)
    pub rest_floor: u8,
    pub rest_offset: i32,
    /// Resting speed when the last temperature is unknown or implausible
    pub rest_default: u8,
    /// Start-up speed when the first reading fails
    pub init_fallback: u8,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            sensor_ceiling: safety::SENSOR_CEILING,
            default_temp: safety::DEFAULT_TEMP,
            max_fan: safety::MAX_FAN,
            fallback_fan: safety::FALLBACK_FAN,
            rest_floor: safety::REST_FLOOR,
            rest_offset: safety::REST_OFFSET,
            rest_default: safety::REST_DEFAULT,
            init_fallback: safety::INIT_FALLBACK,
        }
    }
}

impl SafetyConfig {
    /// Speed to leave the fans at when control stops
    pub fn resting_speed(&self, last_temperature: Option<i32>) -> u8 {
        match last_temperature {
            Some(t) if t > 0 && t < safety::REST_PLAUSIBLE_MAX => {
                let wanted = (t - self.rest_offset).clamp(0, curve_const::MAX_FAN as i32) as u8;
                wanted.max(self.rest_floor).min(curve_const::MAX_FAN)
            }
            _ => self.rest_default,
        }
    }

    /// Speed applied when control starts
    pub fn initial_speed(&self, temperature: Option<i32>) -> u8 {
        match temperature {
            Some(t) if t > 0 => safety::INIT_BANDS
                .iter()
                .find(|(upper, _)| t <= *upper)
                .map(|(_, speed)| *speed)
                .unwrap_or(safety::INIT_HOT),
            _ => self.init_fallback,
        }
    }
}

/// Monitor loop parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    pub poll_interval: Duration,
    /// Bound on how long `stop` waits for the task
    pub stop_timeout: Duration,
    pub safety: SafetyConfig,
    /// Re-check the thermal limit every N ticks; 0 disables
    pub limit_check_ticks: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: timing::POLL_INTERVAL,
            stop_timeout: timing::STOP_TIMEOUT,
            safety: SafetyConfig::default(),
            limit_check_ticks: timing::LIMIT_CHECK_TICKS,
        }
    }
}

/// One temperature sample after fault substitution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub temperature: i32,
    /// True when `temperature` is a substitute for a failed reading
    pub substituted: bool,
}

/// What a single tick did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Ramped { sample: Sample, target: u8, outcome: RampOutcome },
    /// Reading above the sensor ceiling, fans forced to max
    Overheat { sample: Sample, forced: bool },
    /// Actuator fault, fallback speed applied
    Fallback { sample: Sample, applied: bool },
    /// Fan control could not be enabled; retried next tick
    ControlUnavailable { sample: Sample },
    /// Curve had no points; nothing actuated
    NoCurve { sample: Sample },
    /// Over the limit on a check tick; the enforcer acted instead of the curve.
    /// Its fan target stays a floor for the curve until the temperature drops
    /// below the limit.
    LimitEnforced { sample: Sample, outcome: LimitOutcome },
    Failed { sample: Sample, error: String },
}

impl TickOutcome {
    pub fn sample(&self) -> Sample {
        match self {
            TickOutcome::Ramped { sample, .. }
            | TickOutcome::Overheat { sample, .. }
            | TickOutcome::Fallback { sample, .. }
            | TickOutcome::ControlUnavailable { sample }
            | TickOutcome::NoCurve { sample }
            | TickOutcome::LimitEnforced { sample, .. }
            | TickOutcome::Failed { sample, .. } => *sample,
        }
    }
}

/// State shared between the monitor handle and its task
struct MonitorShared {
    device: Arc<dyn Device>,
    curve: SharedCurve,
    ramp: Arc<RampController>,
    enforcer: Arc<ThermalLimitEnforcer>,
    gpu: Arc<RwLock<GpuState>>,
    config: MonitorConfig,
    running: AtomicBool,
    wake: Notify,
    ticks: AtomicU64,
    limit_in_loop: AtomicBool,
    /// Last escalation target, held while the temperature stays at or over the limit
    limit_floor: Mutex<Option<u8>>,
}

impl MonitorShared {
    fn sample(&self) -> Sample {
        let ceiling = self.config.safety.sensor_ceiling;
        let reading = self.device.read_temperature();

        let fault = match reading {
            Ok(t) if t > 0 => {
                let mut gpu = self.gpu.write();
                gpu.last_temperature = Some(t);
                if t <= ceiling {
                    gpu.last_good_temperature = Some(t);
                }
                return Sample {
                    temperature: t,
                    substituted: false,
                };
            }
            Ok(t) => {
                self.gpu.write().last_temperature = Some(t);
                GpufanError::sensor(format!("implausible reading {}°C", t))
            }
            Err(e) => e,
        };

        let substitute = self
            .gpu
            .read()
            .last_good_temperature
            .unwrap_or(self.config.safety.default_temp);
        warn!(error = %fault, substitute, "MONITOR: sensor fault, substituting temperature");
        Sample {
            temperature: substitute,
            substituted: true,
        }
    }

    fn tick(&self) -> TickOutcome {
        let tick = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
        let sample = self.sample();
        let temp = sample.temperature;
        let safety = &self.config.safety;

        if temp > safety.sensor_ceiling {
            error!(temp, "CONTROL: reading above sensor ceiling, forcing {}%", safety.max_fan);
            let forced = match self.ramp.force(safety.max_fan) {
                Ok(_) => true,
                Err(e) => {
                    error!(error = %e, "CONTROL: failed to force max fan speed");
                    false
                }
            };
            return TickOutcome::Overheat { sample, forced };
        }

        let temp_limit = self.gpu.read().temp_limit;
        if temp < temp_limit {
            if let Some(floor) = self.limit_floor.lock().take() {
                debug!(temp, floor, "LIMIT: back under limit, releasing fan floor");
            }
        } else if self.limit_check_due(tick) {
            let outcome = self.enforcer.enforce(temp);
            if let LimitDecision::Escalate { fan_target, .. } = outcome.decision {
                *self.limit_floor.lock() = Some(fan_target);
                return TickOutcome::LimitEnforced { sample, outcome };
            }
        }

        let target = match self.curve.interpolate(temp) {
            Ok(target) => target,
            Err(GpufanError::EmptyCurve) => {
                warn!(temp, "CONTROL: curve is empty, skipping actuation");
                return TickOutcome::NoCurve { sample };
            }
            Err(e) => {
                return TickOutcome::Failed {
                    sample,
                    error: e.to_string(),
                }
            }
        };
        let target = match *self.limit_floor.lock() {
            Some(floor) if floor > target => floor,
            _ => target,
        };
        debug!(temp, target, "CONTROL: curve target");

        match self.ramp.move_towards(target, false) {
            Ok(outcome) => TickOutcome::Ramped {
                sample,
                target,
                outcome,
            },
            Err(GpufanError::ActuatorFault(msg)) => {
                warn!(error = %msg, fallback = safety.fallback_fan, "ACTION: actuator fault, applying fallback speed");
                let applied = match self.ramp.force(safety.fallback_fan) {
                    Ok(_) => true,
                    Err(e) => {
                        error!(error = %e, "ACTION: fallback fan speed also failed");
                        false
                    }
                };
                TickOutcome::Fallback { sample, applied }
            }
            Err(GpufanError::ControlUnavailable(msg)) => {
                warn!(error = %msg, "CONTROL: fan control unavailable, will retry");
                TickOutcome::ControlUnavailable { sample }
            }
            Err(e) => {
                if e.is_transient() {
                    warn!(error = %e, "CONTROL: ramp failed");
                } else {
                    error!(error = %e, "CONTROL: ramp failed");
                }
                TickOutcome::Failed {
                    sample,
                    error: e.to_string(),
                }
            }
        }
    }

    fn limit_check_due(&self, tick: u64) -> bool {
        let every = self.config.limit_check_ticks as u64;
        every > 0 && self.limit_in_loop.load(Ordering::SeqCst) && tick % every == 0
    }

    /// Choose and apply the start-up speed
    fn prime(&self) -> u8 {
        self.limit_floor.lock().take();
        let temperature = match self.device.read_temperature() {
            Ok(t) if t > 0 => {
                let mut gpu = self.gpu.write();
                gpu.last_temperature = Some(t);
                if t <= self.config.safety.sensor_ceiling {
                    gpu.last_good_temperature = Some(t);
                }
                Some(t)
            }
            Ok(t) => {
                warn!(temp = t, "MONITOR: implausible start-up reading");
                None
            }
            Err(e) => {
                warn!(error = %e, "MONITOR: start-up temperature unavailable");
                None
            }
        };

        let safety = &self.config.safety;
        let speed = if temperature.is_some_and(|t| t > safety.sensor_ceiling) {
            safety.max_fan
        } else {
            safety.initial_speed(temperature)
        };
        match self.ramp.force(speed) {
            Ok(_) => info!(?temperature, speed, "MONITOR: initial fan speed applied"),
            Err(e) => warn!(speed, error = %e, "MONITOR: initial fan speed not applied"),
        }
        speed
    }

    /// Leave the fans at the resting speed
    fn rest(&self) -> Result<u8> {
        let last = self.gpu.read().last_temperature;
        let speed = self.config.safety.resting_speed(last);
        match self.ramp.force(speed) {
            Ok(_) => {
                info!(last_temp = ?last, speed, "MONITOR: fans left at resting speed");
                Ok(speed)
            }
            Err(e) => {
                error!(speed, error = %e, "MONITOR: resting fan speed not applied");
                Err(e)
            }
        }
    }
}

async fn run_loop(shared: Arc<MonitorShared>) -> Option<u8> {
    info!(
        interval_ms = shared.config.poll_interval.as_millis() as u64,
        "Safety monitor loop starting"
    );

    while shared.running.load(Ordering::SeqCst) {
        let worker = shared.clone();
        match tokio::task::spawn_blocking(move || worker.tick()).await {
            Ok(outcome) => debug!(?outcome, "MONITOR: tick complete"),
            Err(e) => error!(error = %e, "MONITOR: tick panicked"),
        }

        if !shared.running.load(Ordering::SeqCst) {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(shared.config.poll_interval) => {}
            _ = shared.wake.notified() => {
                debug!("Monitor loop woken up");
            }
        }
    }

    let worker = shared.clone();
    let rested = tokio::task::spawn_blocking(move || worker.rest())
        .await
        .ok()
        .and_then(|rested| rested.ok());
    info!("Safety monitor loop stopped");
    rested
}

/// Handle to the periodic safety monitor
pub struct SafetyMonitor {
    shared: Arc<MonitorShared>,
    task: Mutex<Option<JoinHandle<Option<u8>>>>,
}

impl SafetyMonitor {
    pub fn new(
        device: Arc<dyn Device>,
        curve: SharedCurve,
        ramp: Arc<RampController>,
        enforcer: Arc<ThermalLimitEnforcer>,
        gpu: Arc<RwLock<GpuState>>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            shared: Arc::new(MonitorShared {
                device,
                curve,
                ramp,
                enforcer,
                gpu,
                config,
                running: AtomicBool::new(false),
                wake: Notify::new(),
                ticks: AtomicU64::new(0),
                limit_in_loop: AtomicBool::new(true),
                limit_floor: Mutex::new(None),
            }),
            task: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.shared.config
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Ticks executed since construction
    pub fn ticks(&self) -> u64 {
        self.shared.ticks.load(Ordering::SeqCst)
    }

    /// Toggle the periodic limit check without restarting
    pub fn set_limit_in_loop(&self, enabled: bool) {
        self.shared.limit_in_loop.store(enabled, Ordering::SeqCst);
        if !enabled {
            self.shared.limit_floor.lock().take();
        }
    }

    /// Fan speed the curve is currently held at or above, if any
    pub fn limit_floor(&self) -> Option<u8> {
        *self.shared.limit_floor.lock()
    }

    /// Read the temperature with fault substitution, without actuating
    pub fn sample(&self) -> Sample {
        self.shared.sample()
    }

    /// Run one tick synchronously on the calling thread
    pub fn tick_once(&self) -> TickOutcome {
        self.shared.tick()
    }

    /// Prime the fans and spawn the loop. Starting twice is a no-op.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn start(&self) -> Result<()> {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            debug!("Safety monitor already running");
            return Ok(());
        }

        let primer = self.shared.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || primer.prime()).await {
            error!(error = %e, "MONITOR: priming panicked");
        }

        let handle = tokio::spawn(run_loop(self.shared.clone()));
        *self.task.lock() = Some(handle);
        Ok(())
    }

    /// Stop the loop and leave the fans at their resting speed.
    ///
    /// Waits at most `stop_timeout` for the task; if it does not finish the
    /// task is aborted and the resting write is attempted once more.
    /// Returns the resting speed that was committed, if any.
    pub async fn stop(&self) -> Option<u8> {
        let was_running = self.shared.running.swap(false, Ordering::SeqCst);
        self.shared.wake.notify_one();

        let handle = self.task.lock().take();
        let Some(mut handle) = handle else {
            if was_running {
                warn!("Safety monitor flagged running without a task");
            }
            return None;
        };

        let timeout = self.shared.config.stop_timeout;
        let rested = match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(rested)) => return rested,
            Ok(Err(e)) => {
                error!(error = %e, "MONITOR: task ended abnormally, applying resting speed");
                self.rest_best_effort(timeout).await
            }
            Err(_) => {
                let err = GpufanError::Timeout(format!(
                    "monitor task did not stop within {} ms",
                    timeout.as_millis()
                ));
                warn!(error = %err, "MONITOR: aborting task");
                handle.abort();
                self.rest_best_effort(timeout).await
            }
        };

        match rested {
            Ok(speed) => Some(speed),
            Err(e) => {
                error!(error = %e, "MONITOR: no resting speed after stop");
                None
            }
        }
    }

    async fn rest_best_effort(&self, timeout: Duration) -> Result<u8> {
        let worker = self.shared.clone();
        match tokio::time::timeout(timeout, tokio::task::spawn_blocking(move || worker.rest())).await {
            Ok(Ok(rested)) => rested,
            Ok(Err(e)) => Err(GpufanError::actuator(format!("resting write panicked: {}", e))),
            Err(_) => Err(GpufanError::Timeout(format!(
                "resting write did not finish within {} ms",
                timeout.as_millis()
            ))),
        }
    }
}
