/*
 * Test utilities and mock helpers for Gpufan
 *
 * A mockall device for exact call expectations, plus builders for the
 * control components with fast (pause-free) ramp settings.
 */

use mockall::mock;
use parking_lot::RwLock;
use std::sync::Arc;

use gf_gpu::{ClockKind, Device};

use crate::data::GpuState;
use crate::engine::{
    Curve, MonitorConfig, RampConfig, RampController, SafetyMonitor, SharedCurve,
    ThermalLimitEnforcer,
};
use crate::error::Result;

mock! {
    pub Gpu {}

    impl Device for Gpu {
        fn name(&self) -> String;
        fn read_temperature(&self) -> Result<i32>;
        fn read_fan_speed(&self) -> Result<u8>;
        fn enable_fan_control(&self) -> Result<()>;
        fn write_fan_speed(&self, percent: u8) -> Result<()>;
        fn read_clock(&self, kind: ClockKind) -> Result<i32>;
        fn write_clock_offset(&self, kind: ClockKind, offset_mhz: i32) -> Result<()>;
        fn read_power_limit(&self) -> Result<u32>;
        fn write_power_limit(&self, watts: u32) -> Result<()>;
    }
}

/// Mock with a name; every other call must be set up by the test
pub fn mock_gpu() -> MockGpu {
    let mut gpu = MockGpu::new();
    gpu.expect_name().returning(|| "Mock GPU".to_string());
    gpu
}

/// Ramp settings without inter-step pauses
pub fn fast_ramp_config() -> RampConfig {
    RampConfig {
        step_pause_ms: 0,
        ..RampConfig::default()
    }
}

pub fn gpu_state(temp_limit: i32) -> Arc<RwLock<GpuState>> {
    Arc::new(RwLock::new(GpuState::default().with_temp_limit(temp_limit)))
}

/// Every control component wired to one device
pub struct Rig {
    pub gpu: Arc<RwLock<GpuState>>,
    pub ramp: Arc<RampController>,
    pub enforcer: Arc<ThermalLimitEnforcer>,
    pub monitor: SafetyMonitor,
}

pub fn rig(device: Arc<dyn Device>, curve: Curve, temp_limit: i32) -> Rig {
    let gpu = gpu_state(temp_limit);
    let ramp = Arc::new(RampController::new(device.clone(), gpu.clone(), fast_ramp_config()));
    let enforcer = Arc::new(ThermalLimitEnforcer::new(
        device.clone(),
        gpu.clone(),
        ramp.clone(),
        true,
    ));
    let monitor = SafetyMonitor::new(
        device,
        SharedCurve::new(curve),
        ramp.clone(),
        enforcer.clone(),
        gpu.clone(),
        MonitorConfig::default(),
    );
    Rig {
        gpu,
        ramp,
        enforcer,
        monitor,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{CurvePreset, LimitDecision, RampOutcome, Sample, SkipReason, TickOutcome};
    use gf_error::GpufanError;
    use mockall::predicate::eq;
    use mockall::Sequence;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::{Duration, Instant};

    #[test]
    fn test_control_unavailable_blocks_writes() {
        let mut gpu = mock_gpu();
        gpu.expect_read_fan_speed().returning(|| Ok(30));
        gpu.expect_enable_fan_control()
            .times(1)
            .returning(|| Err(GpufanError::ControlUnavailable("no X display".into())));
        gpu.expect_write_fan_speed().never();

        let rig = rig(Arc::new(gpu), CurvePreset::Default.to_curve(), 83);
        let err = rig.ramp.move_towards(60, false).unwrap_err();
        assert!(matches!(err, GpufanError::ControlUnavailable(_)));
        assert!(!rig.ramp.state().fan_control_enabled);
    }

    #[test]
    fn test_enable_happens_once() {
        let mut gpu = mock_gpu();
        gpu.expect_enable_fan_control().times(1).returning(|| Ok(()));
        gpu.expect_write_fan_speed().times(2).returning(|_| Ok(()));

        let rig = rig(Arc::new(gpu), Curve::default(), 83);
        rig.ramp.force(40).unwrap();
        rig.ramp.force(60).unwrap();
        assert_eq!(rig.ramp.current_fan(), Some(60));
    }

    #[test]
    fn test_steps_written_in_order() {
        let mut seq = Sequence::new();
        let mut gpu = mock_gpu();
        gpu.expect_read_fan_speed().returning(|| Ok(40));
        gpu.expect_enable_fan_control().returning(|| Ok(()));
        for value in [45, 50, 55, 60] {
            gpu.expect_write_fan_speed()
                .with(eq(value))
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_| Ok(()));
        }

        let rig = rig(Arc::new(gpu), Curve::default(), 83);
        let outcome = rig.ramp.move_towards(60, false).unwrap();
        assert_eq!(
            outcome,
            RampOutcome::Applied {
                from: Some(40),
                to: 60,
                writes: vec![45, 50, 55, 60],
                failed: 0,
            }
        );
    }

    #[test]
    fn test_partial_write_failure_is_not_an_error() {
        let mut gpu = mock_gpu();
        gpu.expect_read_fan_speed().returning(|| Ok(40));
        gpu.expect_enable_fan_control().returning(|| Ok(()));
        gpu.expect_write_fan_speed()
            .with(eq(45))
            .returning(|_| Err(GpufanError::actuator("busy")));
        gpu.expect_write_fan_speed().returning(|_| Ok(()));

        let rig = rig(Arc::new(gpu), Curve::default(), 83);
        let outcome = rig.ramp.move_towards(60, false).unwrap();
        assert!(matches!(outcome, RampOutcome::Applied { failed: 1, .. }));
        assert_eq!(rig.ramp.current_fan(), Some(60));
        assert_eq!(rig.ramp.state().failed_writes, 1);
    }

    #[test]
    fn test_enforcer_large_excess_writes_floored_offsets() {
        let mut gpu = mock_gpu();
        gpu.expect_read_fan_speed().returning(|| Ok(40));
        gpu.expect_enable_fan_control().returning(|| Ok(()));
        gpu.expect_write_fan_speed().times(5).returning(|_| Ok(()));
        gpu.expect_write_clock_offset()
            .with(eq(ClockKind::Core), eq(0))
            .times(1)
            .returning(|_, _| Ok(()));
        gpu.expect_write_clock_offset()
            .with(eq(ClockKind::Memory), eq(0))
            .times(1)
            .returning(|_, _| Ok(()));

        let rig = rig(Arc::new(gpu), Curve::default(), 83);
        let outcome = rig.enforcer.enforce(95);

        assert_eq!(
            outcome.decision,
            LimitDecision::Escalate {
                excess: 12,
                fan_target: 90,
                clock_reduction: Some(90),
            }
        );
        assert_eq!(outcome.core_offset, Some(0));
        assert_eq!(outcome.memory_offset, Some(0));
        assert_eq!(rig.ramp.current_fan(), Some(90));
    }

    #[test]
    fn test_enforcer_clock_failure_keeps_offset() {
        let mut gpu = mock_gpu();
        gpu.expect_read_fan_speed().returning(|| Ok(95));
        gpu.expect_enable_fan_control().returning(|| Ok(()));
        gpu.expect_write_fan_speed().returning(|_| Ok(()));
        gpu.expect_write_clock_offset()
            .returning(|_, _| Err(GpufanError::NotSupported("clock offsets".into())));

        let rig = rig(Arc::new(gpu), Curve::default(), 83);
        rig.gpu.write().core_offset = 150;
        let outcome = rig.enforcer.enforce(90);

        assert_eq!(outcome.core_offset, None);
        assert_eq!(rig.gpu.read().core_offset, 150);
    }

    #[test]
    fn test_tick_substitutes_failed_reading() {
        let mut gpu = mock_gpu();
        gpu.expect_read_temperature()
            .returning(|| Err(GpufanError::sensor("read timeout")));
        gpu.expect_read_fan_speed().returning(|| Ok(40));
        gpu.expect_write_fan_speed().never();

        let rig = rig(Arc::new(gpu), CurvePreset::Default.to_curve(), 83);
        let outcome = rig.monitor.tick_once();

        assert_eq!(
            outcome,
            TickOutcome::Ramped {
                sample: Sample {
                    temperature: 50,
                    substituted: true,
                },
                target: 40,
                outcome: RampOutcome::Skipped(SkipReason::BelowThreshold),
            }
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_rests_fans_when_tick_hangs() {
        let reads = AtomicU32::new(0);
        let mut gpu = mock_gpu();
        // Priming read returns at once; the first loop tick then hangs
        gpu.expect_read_temperature().returning(move || {
            if reads.fetch_add(1, Ordering::SeqCst) > 0 {
                std::thread::sleep(Duration::from_millis(400));
            }
            Ok(75)
        });
        gpu.expect_enable_fan_control().returning(|| Ok(()));
        gpu.expect_write_fan_speed().returning(|_| Ok(()));

        let device: Arc<dyn Device> = Arc::new(gpu);
        let state = gpu_state(83);
        let ramp = Arc::new(RampController::new(device.clone(), state.clone(), fast_ramp_config()));
        let enforcer = Arc::new(ThermalLimitEnforcer::new(
            device.clone(),
            state.clone(),
            ramp.clone(),
            true,
        ));
        let monitor = SafetyMonitor::new(
            device,
            SharedCurve::new(CurvePreset::Default.to_curve()),
            ramp.clone(),
            enforcer,
            state,
            MonitorConfig {
                stop_timeout: Duration::from_millis(50),
                ..MonitorConfig::default()
            },
        );

        monitor.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let started = Instant::now();
        assert_eq!(monitor.stop().await, Some(35));
        assert!(started.elapsed() < Duration::from_millis(300));
        assert_eq!(ramp.current_fan(), Some(35));
    }
}
