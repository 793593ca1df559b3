//! Constants and configuration values for Gpufan
//!
//! Centralizes all magic numbers, paths, and configuration defaults.
//! This is the SINGLE SOURCE OF TRUTH for all tuning values; settings
//! defaults are seeded from here. Add new numbers here first.

use std::time::Duration;

/// File locations
pub mod paths {
    use std::path::PathBuf;

    /// Directory name under the user's config directory
    pub const APP_DIR: &str = "gpufan";

    /// JSON settings file
    pub const SETTINGS_FILE: &str = "settings.json";

    /// Active curve in line format
    pub const CURVE_FILE: &str = "curve.txt";

    /// User configuration directory
    ///
    /// The daemon usually runs as root via sudo; in that case the invoking
    /// user's config is used so the daemon and the operator share one curve.
    pub fn user_config_dir() -> Option<PathBuf> {
        let base = std::env::var("SUDO_USER")
            .ok()
            .and_then(|user| home_of(&user))
            .map(|home| home.join(".config"))
            .or_else(dirs::config_dir);

        base.map(|p| p.join(APP_DIR))
    }

    pub fn settings_path() -> Option<PathBuf> {
        user_config_dir().map(|d| d.join(SETTINGS_FILE))
    }

    pub fn default_curve_path() -> Option<PathBuf> {
        user_config_dir().map(|d| d.join(CURVE_FILE))
    }

    /// Home directory for a username, from /etc/passwd
    fn home_of(username: &str) -> Option<PathBuf> {
        let passwd = std::fs::read_to_string("/etc/passwd").ok()?;
        passwd.lines().find_map(|line| {
            let parts: Vec<&str> = line.split(':').collect();
            (parts.len() >= 6 && parts[0] == username).then(|| PathBuf::from(parts[5]))
        })
    }
}

/// Curve domain and editing parameters
pub mod curve {
    /// Lowest temperature a control point may take (°C)
    pub const MIN_TEMP: i32 = 20;

    /// Highest temperature a control point may take (°C)
    pub const MAX_TEMP: i32 = 100;

    pub const MIN_FAN: u8 = 0;
    pub const MAX_FAN: u8 = 100;

    /// Grid lines per axis used for snapping edits
    pub const GRID_LINES: i32 = 16;

    /// Distance (in axis units) within which an edit snaps to a grid line
    pub const SNAP_THRESHOLD: i32 = 5;
}

/// Ramp controller tuning
pub mod ramp {
    use super::*;

    /// Differences at or below this are not worth actuating (non-initial calls)
    pub const MIN_DELTA: u8 = 3;

    /// Minimum spacing between two applied changes
    pub const RATE_LIMIT: Duration = Duration::from_millis(500);

    pub const DEFAULT_STEP: u8 = 5;
    pub const COARSE_STEP: u8 = 10;
    pub const FINE_STEP: u8 = 3;

    /// Differences above this use the coarse step
    pub const COARSE_THRESHOLD: u8 = 30;

    /// Differences below this use the fine step
    pub const FINE_THRESHOLD: u8 = 10;

    /// Above this temperature (°C) the step is at least `URGENT_STEP`
    pub const URGENT_TEMP: i32 = 80;
    pub const URGENT_STEP: u8 = 10;

    /// Pause between intermediate steps
    pub const STEP_PAUSE: Duration = Duration::from_millis(100);
}

/// Fail-safe values used by the monitor loop
pub mod safety {
    /// Readings above this (°C) bypass the curve entirely
    pub const SENSOR_CEILING: i32 = 120;

    /// Substitute temperature when no reading has ever succeeded
    pub const DEFAULT_TEMP: i32 = 50;

    /// Fan speed forced when the ceiling is exceeded
    pub const MAX_FAN: u8 = 100;

    /// Fan speed attempted once after an actuator fault
    pub const FALLBACK_FAN: u8 = 70;

    /// Resting speed = max(REST_FLOOR, last_temp - REST_OFFSET)
    pub const REST_FLOOR: u8 = 30;
    pub const REST_OFFSET: i32 = 40;

    /// Resting speed when the last temperature is unknown or implausible
    pub const REST_DEFAULT: u8 = 50;

    /// Upper bound (exclusive) of a temperature trusted for the resting write
    pub const REST_PLAUSIBLE_MAX: i32 = 100;

    /// Initial speed when the first temperature read fails
    pub const INIT_FALLBACK: u8 = 40;

    /// Start-up bands: (temperature upper bound inclusive, fan speed)
    pub const INIT_BANDS: [(i32, u8); 3] = [(40, 30), (60, 45), (75, 65)];

    /// Start-up speed above the last band
    pub const INIT_HOT: u8 = 80;
}

/// Thermal limit enforcement
pub mod limit {
    /// Default temperature limit (°C)
    pub const DEFAULT_LIMIT: i32 = 83;

    /// Accepted range for the limit
    pub const MIN_LIMIT: i32 = 50;
    pub const MAX_LIMIT: i32 = 100;

    /// Excess (°C) up to which the small fan bump applies
    pub const SMALL_EXCESS: i32 = 5;
    pub const SMALL_BUMP: u8 = 10;

    /// Excess (°C) up to which the medium fan bump applies
    pub const MEDIUM_EXCESS: i32 = 10;
    pub const MEDIUM_BUMP: u8 = 20;

    /// Large excess: max(current + LARGE_BUMP, LARGE_FLOOR)
    pub const LARGE_BUMP: u8 = 30;
    pub const LARGE_FLOOR: u8 = 90;

    /// Clocks are throttled once temp >= limit + THROTTLE_MARGIN
    pub const THROTTLE_MARGIN: i32 = 3;

    /// Clock reduction = min(THROTTLE_BASE + THROTTLE_PER_DEGREE * excess, THROTTLE_MAX)
    pub const THROTTLE_BASE: i32 = 30;
    pub const THROTTLE_PER_DEGREE: i32 = 5;
    pub const THROTTLE_MAX: i32 = 100;

    /// Fans may relax once temp < limit - RELAX_MARGIN
    pub const RELAX_MARGIN: i32 = 10;

    /// ...and only while the fan is above this speed
    pub const RELAX_MIN_FAN: u8 = 50;
    pub const RELAX_STEP: u8 = 5;
}

/// Timing constants for the monitor task
pub mod timing {
    use super::*;

    /// Default sampling period
    pub const POLL_INTERVAL: Duration = Duration::from_millis(1000);

    /// Shortest accepted sampling period
    pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

    /// How long stop() waits for the task before aborting it
    pub const STOP_TIMEOUT: Duration = Duration::from_secs(2);

    /// Re-check the thermal limit every N ticks (0 disables)
    pub const LIMIT_CHECK_TICKS: u32 = 5;
}

/// Built-in curves as (temperature, fan speed) pairs
pub mod presets {
    pub const DEFAULT: [(i32, u8); 4] = [(30, 20), (50, 40), (70, 70), (85, 100)];

    pub const SILENT: [(i32, u8); 5] = [(30, 0), (50, 20), (65, 40), (75, 60), (85, 100)];

    pub const PERFORMANCE: [(i32, u8); 5] = [(30, 30), (45, 50), (60, 70), (70, 90), (80, 100)];
}
