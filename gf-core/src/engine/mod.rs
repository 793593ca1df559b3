//! Control engine
//!
//! - `curve` - temperature → fan speed model
//! - `ramp` - rate-limited, stepped actuation
//! - `limit` - thermal limit policy
//! - `monitor` - periodic safety loop tying the above together

mod curve;
pub mod limit;
pub mod monitor;
pub mod ramp;

pub use curve::{Curve, CurvePreset, SharedCurve};
pub use limit::{evaluate as evaluate_limit, LimitConfig, LimitDecision, LimitInput, LimitOutcome, ThermalLimitEnforcer};
pub use monitor::{MonitorConfig, SafetyConfig, SafetyMonitor, Sample, TickOutcome};
pub use ramp::{RampConfig, RampController, RampOutcome, SkipReason};
