/*
 * Integration tests for Gpufan core
 *
 * Drive the control components end to end against the simulated device.
 */

use gf_core::{
    AppSettings, ControlPoint, Curve, CurvePreset, GpuController, GpuState, LimitDecision,
    RampConfig, RampController, RampOutcome, Sample, SkipReason, TickOutcome,
};
use gf_gpu::{ClockKind, SimulatedDevice};
use parking_lot::RwLock;
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn fast_settings() -> AppSettings {
    let mut settings = AppSettings::default();
    settings.ramp.step_pause_ms = 0;
    settings.general.poll_interval_ms = 50;
    settings
}

fn controller(device: &Arc<SimulatedDevice>) -> GpuController {
    GpuController::with_curve(device.clone(), CurvePreset::Default.to_curve(), &fast_settings())
}

// ============================================================================
// Curve
// ============================================================================

#[test]
fn test_default_curve_interpolation() {
    let curve = CurvePreset::Default.to_curve();
    assert_eq!(curve.interpolate(60).unwrap(), 55);
    assert_eq!(curve.interpolate(10).unwrap(), 20);
    assert_eq!(curve.interpolate(95).unwrap(), 100);
}

fn monotone_curve() -> impl Strategy<Value = Curve> {
    (
        prop::collection::btree_set(20..=100i32, 1..8),
        prop::collection::vec(0..=100u8, 8),
    )
        .prop_map(|(temps, mut fans)| {
            fans.sort_unstable();
            Curve::new(
                temps
                    .into_iter()
                    .zip(fans)
                    .map(|(t, f)| ControlPoint::new(t, f)),
            )
        })
}

proptest! {
    #[test]
    fn prop_interpolation_is_monotone(curve in monotone_curve(), a in 0..130i32, b in 0..130i32) {
        let (low, high) = (a.min(b), a.max(b));
        prop_assert!(curve.interpolate(low).unwrap() <= curve.interpolate(high).unwrap());
    }

    #[test]
    fn prop_interpolation_stays_within_points(
        points in prop::collection::vec((20..=100i32, 0..=100u8), 1..10),
        temp in -20..150i32,
    ) {
        let curve = Curve::new(points.into_iter().map(ControlPoint::from));
        let min = curve.points().iter().map(|p| p.fan_speed).min().unwrap();
        let max = curve.points().iter().map(|p| p.fan_speed).max().unwrap();
        let speed = curve.interpolate(temp).unwrap();
        prop_assert!(speed >= min && speed <= max);
    }
}

#[test]
fn test_curve_file_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("curves").join("curve.txt");
    let device = Arc::new(SimulatedDevice::new(50));
    let controller = controller(&device);

    controller.add_or_update_point(60, 62);
    controller.save_curve(&path).unwrap();

    let other = GpuController::with_curve(device, Curve::default(), &fast_settings());
    assert!(other.load_curve(&path).unwrap());
    assert_eq!(other.curve_points(), controller.curve_points());
}

#[test]
fn test_load_without_valid_points_keeps_curve() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("curve.txt");
    std::fs::write(&path, "hot,fast\n70,250\n").unwrap();

    let controller = controller(&Arc::new(SimulatedDevice::new(50)));
    assert!(!controller.load_curve(&path).unwrap());
    assert_eq!(controller.curve_points(), CurvePreset::Default.points());
}

// ============================================================================
// Ramp
// ============================================================================

#[test]
fn test_ramp_steps_with_pauses() {
    let device = Arc::new(SimulatedDevice::new(60).with_fan_speed(20));
    let ramp = RampController::new(
        device.clone(),
        Arc::new(RwLock::new(GpuState::default())),
        RampConfig::default(),
    );

    let outcome = ramp.move_towards(90, false).unwrap();
    assert!(outcome.is_applied());
    assert_eq!(device.fan_writes(), vec![30, 40, 50, 60, 70, 80, 90]);

    let actuations = device.actuations();
    for pair in actuations.windows(2) {
        assert!(pair[1].at.duration_since(pair[0].at) >= Duration::from_millis(95));
    }

    // Immediately afterwards a new request is rate limited
    assert_eq!(
        ramp.move_towards(40, false).unwrap(),
        RampOutcome::Skipped(SkipReason::RateLimited)
    );
}

#[test]
fn test_small_change_is_ignored() {
    let device = Arc::new(SimulatedDevice::new(60).with_fan_speed(50));
    let controller = controller(&device);

    assert_eq!(
        controller.set_fan_speed(53).unwrap(),
        RampOutcome::Skipped(SkipReason::BelowThreshold)
    );
    assert!(device.actuations().is_empty());
}

// ============================================================================
// Thermal limit
// ============================================================================

#[test]
fn test_limit_small_excess_bumps_fan() {
    let device = Arc::new(SimulatedDevice::new(84).with_fan_speed(50));
    let controller = controller(&device);

    let outcome = controller.set_temp_limit(83).unwrap();
    assert_eq!(
        outcome.decision,
        LimitDecision::Escalate {
            excess: 1,
            fan_target: 60,
            clock_reduction: None,
        }
    );
    assert_eq!(device.current_fan_speed(), 60);
    assert_eq!(device.clock_offset(ClockKind::Core), 0);
}

#[test]
fn test_limit_reduces_clocks_with_floor() {
    let device = Arc::new(SimulatedDevice::new(95).with_fan_speed(40));
    let controller = controller(&device);
    controller.set_clock_offset(ClockKind::Core, 150).unwrap();

    let outcome = controller.set_temp_limit(83).unwrap();
    assert_eq!(outcome.core_offset, Some(60));
    assert_eq!(outcome.memory_offset, Some(0));
    assert_eq!(device.clock_offset(ClockKind::Core), 60);
    assert_eq!(device.clock_offset(ClockKind::Memory), 0);
    assert_eq!(device.current_fan_speed(), 90);
}

#[test]
fn test_limit_relaxes_when_far_below() {
    let device = Arc::new(SimulatedDevice::new(60).with_fan_speed(80));
    let controller = controller(&device);

    let outcome = controller.set_temp_limit(83).unwrap();
    assert_eq!(outcome.decision, LimitDecision::Relax { fan_target: 75 });
    assert_eq!(device.current_fan_speed(), 75);
}

#[test]
fn test_invalid_limit_rejected() {
    let controller = controller(&Arc::new(SimulatedDevice::new(60)));
    assert!(controller.set_temp_limit(150).is_err());
    assert_eq!(controller.gpu_state().temp_limit, 83);
}

// ============================================================================
// Safety monitor
// ============================================================================

#[test]
fn test_sensor_fault_uses_last_good_reading() {
    let device = Arc::new(SimulatedDevice::new(60));
    let controller = controller(&device);

    controller.monitor().tick_once();
    device.fail_temperature_reads(true);
    let outcome = controller.monitor().tick_once();

    assert_eq!(
        outcome.sample(),
        Sample {
            temperature: 60,
            substituted: true,
        }
    );
}

#[test]
fn test_runaway_reading_forces_max() {
    let device = Arc::new(SimulatedDevice::new(60).with_script([125]));
    let controller = controller(&device);

    let outcome = controller.monitor().tick_once();
    assert!(matches!(outcome, TickOutcome::Overheat { forced: true, .. }));
    assert_eq!(device.current_fan_speed(), 100);
}

#[test]
fn test_actuator_fault_attempts_fallback() {
    let device = Arc::new(SimulatedDevice::new(60));
    let controller = controller(&device);
    device.fail_writes(true);

    let outcome = controller.monitor().tick_once();
    assert!(matches!(outcome, TickOutcome::Fallback { applied: false, .. }));
    assert_eq!(device.actuations().last().map(|a| a.percent), Some(70));
}

#[test]
fn test_control_unavailable_is_retried() {
    let device = Arc::new(SimulatedDevice::new(60));
    let controller = controller(&device);
    device.fail_enable(true);

    let outcome = controller.monitor().tick_once();
    assert!(matches!(outcome, TickOutcome::ControlUnavailable { .. }));
    assert!(device.actuations().is_empty());

    device.fail_enable(false);
    let outcome = controller.monitor().tick_once();
    assert!(matches!(outcome, TickOutcome::Ramped { .. }));
    assert_eq!(device.enable_calls(), 2);
    assert!(device.is_manual());
    assert_eq!(device.current_fan_speed(), 55);
}

#[test]
fn test_limit_escalation_holds_across_ticks() {
    let device = Arc::new(SimulatedDevice::new(72).with_fan_speed(40));
    let mut settings = fast_settings();
    settings.ramp.rate_limit_ms = 0;
    settings.limit.temp_limit = 70;
    let controller =
        GpuController::with_curve(device.clone(), CurvePreset::Default.to_curve(), &settings);
    let monitor = controller.monitor();

    let mut speeds = Vec::new();
    for _ in 0..11 {
        let outcome = monitor.tick_once();
        speeds.push((outcome, device.current_fan_speed()));
    }

    // Curve target at 72°C is 74%; every fifth tick the enforcer adds 10%
    assert_eq!(speeds[0].1, 74);
    assert!(matches!(speeds[4].0, TickOutcome::LimitEnforced { .. }));
    assert_eq!(speeds[4].1, 84);
    for (outcome, speed) in &speeds[5..9] {
        assert!(matches!(outcome, TickOutcome::Ramped { .. }));
        assert_eq!(*speed, 84);
    }
    assert_eq!(speeds[9].1, 94);
    assert_eq!(speeds[10].1, 94);
    assert_eq!(monitor.limit_floor(), Some(94));

    let writes = device.fan_writes();
    let first_escalated = writes.iter().position(|&w| w == 84).unwrap();
    assert!(writes[first_escalated..].iter().all(|&w| w >= 84));

    // Back under the limit the curve takes over again
    device.set_temperature(65);
    monitor.tick_once();
    assert_eq!(monitor.limit_floor(), None);
    assert_eq!(device.current_fan_speed(), 62);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_leaves_resting_speed() {
    let device = Arc::new(SimulatedDevice::new(75));
    let controller = controller(&device);

    controller.start().await.unwrap();
    assert!(controller.is_running());
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(controller.stop().await, Some(35));
    assert!(!controller.is_running());
    assert_eq!(device.current_fan_speed(), 35);
    assert!(controller.monitor().ticks() >= 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_start_twice_is_noop() {
    let device = Arc::new(SimulatedDevice::new(50));
    let controller = controller(&device);

    controller.start().await.unwrap();
    controller.start().await.unwrap();
    // Initial band for 50°C
    assert_eq!(device.fan_writes().first(), Some(&45));
    controller.stop().await;
    assert_eq!(controller.stop().await, None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_curve_edits_while_running() {
    let device = Arc::new(SimulatedDevice::new(65));
    let controller = Arc::new(controller(&device));
    controller.start().await.unwrap();

    let editors: Vec<_> = (0..4)
        .map(|i| {
            let controller = controller.clone();
            tokio::task::spawn_blocking(move || {
                for t in 0..20 {
                    let temp = 20 + (t * 4 + i) % 80;
                    controller.add_or_update_point(temp, (temp as u8).min(100));
                    if t % 3 == 0 {
                        controller.remove_point(temp);
                    }
                }
            })
        })
        .collect();
    for editor in editors {
        editor.await.unwrap();
    }

    controller.stop().await;
    let points = controller.curve_points();
    assert!(points.windows(2).all(|w| w[0].temperature < w[1].temperature));
}
