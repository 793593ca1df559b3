//! In-memory GPU
//!
//! Temperatures come from a script (consumed one per read) or, once the
//! script runs dry, from a first-order thermal model driven by the commanded
//! fan speed. Every actuation is recorded with its timestamp so callers can
//! inspect ramp behaviour, and each operation can be made to fail on demand.

use crate::{ClockKind, Device, Result};
use gf_error::GpufanError;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Instant;

/// Equilibrium temperature with the fan at 100%
pub const DEFAULT_IDLE_TEMP: i32 = 35;
/// Equilibrium temperature with the fan stopped
pub const DEFAULT_LOAD_TEMP: i32 = 85;
/// Most recent fan writes kept in the actuation log
pub const ACTUATION_LOG_CAPACITY: usize = 1024;

/// One fan speed write as seen by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actuation {
    pub percent: u8,
    pub at: Instant,
    /// False when the write was rejected by failure injection
    pub accepted: bool,
}

#[derive(Debug)]
struct SimState {
    script: VecDeque<i32>,
    temperature: i32,
    fan_speed: u8,
    manual: bool,
    model: Option<(i32, i32)>,
    core_clock: i32,
    memory_clock: i32,
    core_offset: i32,
    memory_offset: i32,
    power_limit: u32,
    actuations: VecDeque<Actuation>,
}

#[derive(Debug)]
pub struct SimulatedDevice {
    state: Mutex<SimState>,
    fail_temperature: AtomicBool,
    fail_enable: AtomicBool,
    fail_writes: AtomicBool,
    fail_clocks: AtomicBool,
    enable_calls: AtomicU32,
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new(50)
    }
}

impl SimulatedDevice {
    /// Device holding a constant temperature
    pub fn new(temperature: i32) -> Self {
        Self {
            state: Mutex::new(SimState {
                script: VecDeque::new(),
                temperature,
                fan_speed: 0,
                manual: false,
                model: None,
                core_clock: 1800,
                memory_clock: 7000,
                core_offset: 0,
                memory_offset: 0,
                power_limit: 250,
                actuations: VecDeque::with_capacity(ACTUATION_LOG_CAPACITY),
            }),
            fail_temperature: AtomicBool::new(false),
            fail_enable: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            fail_clocks: AtomicBool::new(false),
            enable_calls: AtomicU32::new(0),
        }
    }

    /// Device whose temperature settles between `idle` (fan 100%) and `load` (fan 0%)
    pub fn with_thermal_model(idle: i32, load: i32) -> Self {
        let device = Self::new((idle + load) / 2);
        device.state.lock().model = Some((idle, load));
        device
    }

    /// Queue readings returned by subsequent `read_temperature` calls
    pub fn with_script(self, temps: impl IntoIterator<Item = i32>) -> Self {
        self.state.lock().script.extend(temps);
        self
    }

    pub fn with_fan_speed(self, percent: u8) -> Self {
        self.state.lock().fan_speed = percent.min(100);
        self
    }

    pub fn set_temperature(&self, temperature: i32) {
        let mut state = self.state.lock();
        state.script.clear();
        state.temperature = temperature;
    }

    pub fn push_temperature(&self, temperature: i32) {
        self.state.lock().script.push_back(temperature);
    }

    pub fn fail_temperature_reads(&self, fail: bool) {
        self.fail_temperature.store(fail, Ordering::SeqCst);
    }

    pub fn fail_enable(&self, fail: bool) {
        self.fail_enable.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_clock_writes(&self, fail: bool) {
        self.fail_clocks.store(fail, Ordering::SeqCst);
    }

    /// Most recent fan writes, accepted or not, oldest first
    pub fn actuations(&self) -> Vec<Actuation> {
        self.state.lock().actuations.iter().copied().collect()
    }

    /// Percentages of accepted fan writes, in order
    pub fn fan_writes(&self) -> Vec<u8> {
        self.state
            .lock()
            .actuations
            .iter()
            .filter(|a| a.accepted)
            .map(|a| a.percent)
            .collect()
    }

    pub fn clear_actuations(&self) {
        self.state.lock().actuations.clear();
    }

    pub fn enable_calls(&self) -> u32 {
        self.enable_calls.load(Ordering::SeqCst)
    }

    pub fn is_manual(&self) -> bool {
        self.state.lock().manual
    }

    pub fn current_fan_speed(&self) -> u8 {
        self.state.lock().fan_speed
    }

    pub fn clock_offset(&self, kind: ClockKind) -> i32 {
        let state = self.state.lock();
        match kind {
            ClockKind::Core => state.core_offset,
            ClockKind::Memory => state.memory_offset,
        }
    }

    pub fn power_limit(&self) -> u32 {
        self.state.lock().power_limit
    }
}

impl Device for SimulatedDevice {
    fn name(&self) -> String {
        "Simulated GPU".to_string()
    }

    fn read_temperature(&self) -> Result<i32> {
        if self.fail_temperature.load(Ordering::SeqCst) {
            return Err(GpufanError::sensor("simulated sensor failure"));
        }

        let mut state = self.state.lock();
        if let Some(next) = state.script.pop_front() {
            state.temperature = next;
        } else if let Some((idle, load)) = state.model {
            let equilibrium = load - (load - idle) * state.fan_speed as i32 / 100;
            let delta = (equilibrium - state.temperature) / 5;
            state.temperature += if delta == 0 {
                (equilibrium - state.temperature).signum()
            } else {
                delta
            };
        }
        Ok(state.temperature)
    }

    fn read_fan_speed(&self) -> Result<u8> {
        Ok(self.state.lock().fan_speed)
    }

    fn enable_fan_control(&self) -> Result<()> {
        self.enable_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_enable.load(Ordering::SeqCst) {
            return Err(GpufanError::ControlUnavailable(
                "simulated enable failure".to_string(),
            ));
        }
        self.state.lock().manual = true;
        Ok(())
    }

    fn write_fan_speed(&self, percent: u8) -> Result<()> {
        let accepted = !self.fail_writes.load(Ordering::SeqCst);
        let mut state = self.state.lock();
        if state.actuations.len() == ACTUATION_LOG_CAPACITY {
            state.actuations.pop_front();
        }
        state.actuations.push_back(Actuation {
            percent,
            at: Instant::now(),
            accepted,
        });
        if !accepted {
            return Err(GpufanError::actuator(format!(
                "simulated write of {}% rejected",
                percent
            )));
        }
        state.fan_speed = percent.min(100);
        Ok(())
    }

    fn read_clock(&self, kind: ClockKind) -> Result<i32> {
        let state = self.state.lock();
        Ok(match kind {
            ClockKind::Core => state.core_clock + state.core_offset,
            ClockKind::Memory => state.memory_clock + state.memory_offset,
        })
    }

    fn write_clock_offset(&self, kind: ClockKind, offset_mhz: i32) -> Result<()> {
        if self.fail_clocks.load(Ordering::SeqCst) {
            return Err(GpufanError::GpuError(format!(
                "simulated {} offset write rejected",
                kind
            )));
        }
        let mut state = self.state.lock();
        match kind {
            ClockKind::Core => state.core_offset = offset_mhz,
            ClockKind::Memory => state.memory_offset = offset_mhz,
        }
        Ok(())
    }

    fn read_power_limit(&self) -> Result<u32> {
        Ok(self.state.lock().power_limit)
    }

    fn write_power_limit(&self, watts: u32) -> Result<()> {
        self.state.lock().power_limit = watts;
        Ok(())
    }
}
