//! GPU controller facade
//!
//! Owns one device and every control component built on it. This is the
//! surface the daemon (or any other front end) talks to: curve edits,
//! presets, curve files, limits, clock and power changes, reporting.

use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use gf_gpu::{ClockKind, Device};

use crate::data::{
    self, validate_curve_points, validate_power_limit, validate_temp_limit, ChartPosition,
    ControlPoint, ControllerSnapshot, GpuState,
};
use crate::engine::{
    Curve, CurvePreset, LimitOutcome, RampController, RampOutcome, SafetyMonitor, Sample,
    SharedCurve, ThermalLimitEnforcer,
};
use crate::error::Result;
use crate::settings::AppSettings;

pub struct GpuController {
    device: Arc<dyn Device>,
    curve: SharedCurve,
    gpu: Arc<RwLock<GpuState>>,
    ramp: Arc<RampController>,
    enforcer: Arc<ThermalLimitEnforcer>,
    monitor: SafetyMonitor,
    curve_path: Option<PathBuf>,
    autosave: bool,
}

impl GpuController {
    /// Build a controller around `device` with an explicit starting curve
    pub fn with_curve(device: Arc<dyn Device>, curve: Curve, settings: &AppSettings) -> Self {
        let gpu = Arc::new(RwLock::new(
            GpuState::default().with_temp_limit(settings.limit.temp_limit),
        ));
        let curve = SharedCurve::new(curve);
        let ramp = Arc::new(RampController::new(
            device.clone(),
            gpu.clone(),
            settings.ramp.clone(),
        ));
        let enforcer = Arc::new(ThermalLimitEnforcer::new(
            device.clone(),
            gpu.clone(),
            ramp.clone(),
            settings.limit.throttle_clocks,
        ));
        let monitor = SafetyMonitor::new(
            device.clone(),
            curve.clone(),
            ramp.clone(),
            enforcer.clone(),
            gpu.clone(),
            settings.monitor_config(),
        );

        let controller = Self {
            device,
            curve,
            gpu,
            ramp,
            enforcer,
            monitor,
            curve_path: None,
            autosave: false,
        };
        controller.refresh_gpu_state();
        controller
    }

    /// Build a controller from settings: the curve file if it holds a valid
    /// curve, otherwise the configured preset. Edits are saved back to the
    /// file when autosave is on.
    pub fn from_settings(device: Arc<dyn Device>, settings: &AppSettings) -> Self {
        let curve_path = settings.curve_path();
        let curve = curve_path
            .as_deref()
            .filter(|p| p.exists())
            .and_then(|p| match data::load_curve(p) {
                Ok(curve) => curve,
                Err(e) => {
                    warn!(error = %e, "Failed to load curve file, using preset");
                    None
                }
            })
            .unwrap_or_else(|| {
                let preset = settings.preset();
                info!(%preset, "Using preset curve");
                preset.to_curve()
            });

        let mut controller = Self::with_curve(device, curve, settings);
        controller.curve_path = curve_path;
        controller.autosave = settings.general.autosave_curve;
        controller
    }

    pub fn device_name(&self) -> String {
        self.device.name()
    }

    pub fn curve(&self) -> &SharedCurve {
        &self.curve
    }

    pub fn curve_points(&self) -> Vec<ControlPoint> {
        self.curve.points()
    }

    pub fn ramp(&self) -> &RampController {
        &self.ramp
    }

    pub fn enforcer(&self) -> &ThermalLimitEnforcer {
        &self.enforcer
    }

    pub fn monitor(&self) -> &SafetyMonitor {
        &self.monitor
    }

    pub fn is_running(&self) -> bool {
        self.monitor.is_running()
    }

    // ========================================================================
    // Curve editing
    // ========================================================================

    pub fn add_or_update_point(&self, temperature: i32, fan_speed: u8) -> usize {
        let index = self
            .curve
            .edit(|c| c.add_or_update_point(temperature, fan_speed));
        self.after_edit();
        index
    }

    /// Add (or update) a point at a chart position, snapped to the grid
    pub fn add_point_at(&self, position: ChartPosition) -> usize {
        let point = position.to_control_point();
        self.add_or_update_point(point.temperature, point.fan_speed)
    }

    /// Move a point; `None` means the edit was rejected
    pub fn move_point(&self, index: usize, temperature: i32, fan_speed: u8) -> Option<usize> {
        let moved = self
            .curve
            .edit(|c| c.move_point(index, temperature, fan_speed));
        match moved {
            Some(_) => self.after_edit(),
            None => debug!(index, temperature, "Rejected point move"),
        }
        moved
    }

    /// Drag a point to a chart position, snapped to the grid
    pub fn drag_point(&self, index: usize, position: ChartPosition) -> Option<usize> {
        let point = position.to_control_point();
        self.move_point(index, point.temperature, point.fan_speed)
    }

    pub fn remove_point(&self, temperature: i32) -> bool {
        let removed = self.curve.edit(|c| c.remove_point(temperature));
        if removed {
            self.after_edit();
        }
        removed
    }

    pub fn apply_preset(&self, preset: CurvePreset) {
        info!(%preset, "Applying preset");
        self.curve.replace(preset.to_curve());
        self.after_edit();
    }

    /// Replace the curve with explicit points
    pub fn set_curve(&self, points: Vec<ControlPoint>) -> Result<()> {
        validate_curve_points(&points)?;
        self.curve.replace(Curve::new(points));
        self.after_edit();
        Ok(())
    }

    /// Load a curve file. Returns false when the file had no valid point and
    /// the active curve was kept.
    pub fn load_curve(&self, path: &Path) -> Result<bool> {
        match data::load_curve(path)? {
            Some(curve) => {
                self.curve.replace(curve);
                self.apply_if_running();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn save_curve(&self, path: &Path) -> Result<()> {
        data::save_curve(path, &self.curve.snapshot())
    }

    fn after_edit(&self) {
        if self.autosave {
            if let Some(path) = &self.curve_path {
                if let Err(e) = self.save_curve(path) {
                    warn!(error = %e, "Failed to autosave curve");
                }
            }
        }
        self.apply_if_running();
    }

    fn apply_if_running(&self) {
        if self.monitor.is_running() {
            if let Err(e) = self.apply_current_curve() {
                debug!(error = %e, "Curve edit not applied immediately");
            }
        }
    }

    /// Push the curve target for the current temperature through the ramp
    pub fn apply_current_curve(&self) -> Result<RampOutcome> {
        let Sample { temperature, .. } = self.monitor.sample();
        let target = self.curve.interpolate(temperature)?;
        self.ramp.move_towards(target, false)
    }

    // ========================================================================
    // Limits, clocks, power
    // ========================================================================

    /// Store a new temperature limit and enforce it right away
    pub fn set_temp_limit(&self, limit: i32) -> Result<LimitOutcome> {
        let limit = validate_temp_limit(limit)?;
        self.gpu.write().temp_limit = limit;
        info!(limit, "Temperature limit set");

        let Sample { temperature, .. } = self.monitor.sample();
        Ok(self.enforcer.enforce(temperature))
    }

    pub fn set_clock_offset(&self, kind: ClockKind, offset_mhz: i32) -> Result<()> {
        self.device.write_clock_offset(kind, offset_mhz)?;
        {
            let mut gpu = self.gpu.write();
            match kind {
                ClockKind::Core => gpu.core_offset = offset_mhz,
                ClockKind::Memory => gpu.memory_offset = offset_mhz,
            }
        }
        self.refresh_gpu_state();
        Ok(())
    }

    pub fn set_power_limit(&self, watts: u32) -> Result<()> {
        let watts = validate_power_limit(watts)?;
        self.device.write_power_limit(watts)?;
        self.gpu.write().power_limit = Some(watts);
        Ok(())
    }

    /// Manual fan request, subject to the ramp rules
    pub fn set_fan_speed(&self, percent: u8) -> Result<RampOutcome> {
        self.ramp.move_towards(percent, false)
    }

    /// Best-effort re-read of clocks and power limit; failures leave `None`
    pub fn refresh_gpu_state(&self) {
        let core_clock = self.device.read_clock(ClockKind::Core).ok();
        let memory_clock = self.device.read_clock(ClockKind::Memory).ok();
        let power_limit = self.device.read_power_limit().ok();

        let mut gpu = self.gpu.write();
        gpu.core_clock = core_clock;
        gpu.memory_clock = memory_clock;
        gpu.power_limit = power_limit;
    }

    pub fn gpu_state(&self) -> GpuState {
        self.gpu.read().clone()
    }

    // ========================================================================
    // Monitor lifecycle and reporting
    // ========================================================================

    pub async fn start(&self) -> Result<()> {
        self.monitor.start().await
    }

    /// Stop monitoring; returns the resting fan speed that was committed
    pub async fn stop(&self) -> Option<u8> {
        self.monitor.stop().await
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        let state = self.ramp.state();
        let gpu = self.gpu.read().clone();
        let temperature = gpu.last_temperature;
        let curve = self.curve.points();
        let curve_target = temperature.and_then(|t| self.curve.interpolate(t).ok());

        ControllerSnapshot {
            device: self.device.name(),
            running: self.monitor.is_running(),
            temperature,
            fan_speed: state.current_fan,
            previous_fan_speed: state.previous_fan,
            fan_control_enabled: state.fan_control_enabled,
            ms_since_last_change: state.last_change.map(|t| t.elapsed().as_millis() as u64),
            failed_writes: state.failed_writes,
            curve_target,
            curve,
            gpu,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gf_gpu::SimulatedDevice;
    use tempfile::TempDir;

    fn settings() -> AppSettings {
        let mut settings = AppSettings::default();
        settings.ramp.step_pause_ms = 0;
        settings
    }

    #[test]
    fn test_initial_gpu_state_query() {
        let device = Arc::new(SimulatedDevice::new(60));
        let controller = GpuController::with_curve(device, CurvePreset::Default.to_curve(), &settings());
        let gpu = controller.gpu_state();
        assert!(gpu.core_clock.is_some());
        assert_eq!(gpu.power_limit, Some(250));
        assert_eq!(gpu.last_temperature, None);
    }

    #[test]
    fn test_from_settings_prefers_curve_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("curve.txt");
        std::fs::write(&path, "40,30\n80,90\n").unwrap();

        let mut settings = settings();
        settings.general.curve_file = Some(path.clone());
        let controller = GpuController::from_settings(Arc::new(SimulatedDevice::new(50)), &settings);
        assert_eq!(
            controller.curve_points(),
            vec![ControlPoint::new(40, 30), ControlPoint::new(80, 90)]
        );

        controller.add_or_update_point(60, 50);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "40,30\n60,50\n80,90\n");
    }

    #[test]
    fn test_from_settings_falls_back_to_preset() {
        let dir = TempDir::new().unwrap();
        let mut settings = settings();
        settings.general.curve_file = Some(dir.path().join("missing.txt"));
        settings.general.preset = "silent".into();

        let controller = GpuController::from_settings(Arc::new(SimulatedDevice::new(50)), &settings);
        assert_eq!(controller.curve_points(), CurvePreset::Silent.points());
    }

    #[test]
    fn test_set_clock_offset_and_power_limit() {
        let device = Arc::new(SimulatedDevice::new(50));
        let controller = GpuController::with_curve(device.clone(), Curve::default(), &settings());

        controller.set_clock_offset(ClockKind::Core, 120).unwrap();
        controller.set_power_limit(200).unwrap();

        let gpu = controller.gpu_state();
        assert_eq!(gpu.core_offset, 120);
        assert_eq!(gpu.power_limit, Some(200));
        assert_eq!(device.clock_offset(ClockKind::Core), 120);
        assert!(controller.set_power_limit(0).is_err());
    }

    #[test]
    fn test_drag_point_snaps() {
        let controller = GpuController::with_curve(
            Arc::new(SimulatedDevice::new(50)),
            CurvePreset::Default.to_curve(),
            &settings(),
        );
        let index = controller.drag_point(1, ChartPosition::new(57.6, 43.0)).unwrap();
        assert_eq!(controller.curve_points()[index], ControlPoint::new(55, 42));
    }

    #[test]
    fn test_snapshot_reports_state() {
        let device = Arc::new(SimulatedDevice::new(60));
        let controller = GpuController::with_curve(device, CurvePreset::Default.to_curve(), &settings());
        controller.monitor().tick_once();

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.temperature, Some(60));
        assert_eq!(snapshot.curve_target, Some(55));
        assert_eq!(snapshot.fan_speed, Some(55));
        assert!(snapshot.fan_control_enabled);
        assert!(!snapshot.running);
        assert!(serde_json::to_string(&snapshot).unwrap().contains("\"curve_target\":55"));
    }
}
