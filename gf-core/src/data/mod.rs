//! Data types, state, persistence and validation

mod persistence;
mod state;
mod types;
mod validation;

pub use persistence::{format_curve, load_curve, parse_curve, save_curve, write_atomic, ParsedCurve};
pub use state::{ControllerSnapshot, ControllerState, GpuState};
pub use types::{snap_to_grid, ChartPosition, ControlPoint};
pub use validation::{
    validate_curve_points, validate_fan_percent, validate_poll_interval_ms,
    validate_power_limit, validate_temp_limit,
};
