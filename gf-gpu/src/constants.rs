//! GPU-related constants

/// PCI vendor ID for AMD GPUs
pub const AMD_VENDOR_ID: &str = "0x1002";

/// Path to DRM (Direct Rendering Manager) devices
pub const DRM_PATH: &str = "/sys/class/drm";

/// Microwatts per watt (for power conversion)
pub const MICROWATTS_PER_WATT: u64 = 1_000_000;

/// Temperature readings are in millidegrees, divide by this to get Celsius
pub const MILLIDEGREE_DIVISOR: i64 = 1000;

/// Maximum number of fans per GPU (safety cap)
pub const MAX_FANS_PER_GPU: u32 = 4;

/// nvidia-smi / nvidia-settings specifics
pub mod nvidia {
    /// Substring nvidia-settings prints when an assignment was accepted
    pub const ASSIGNED_MARKER: &str = "assigned value";

    /// Performance level whose clock offsets are adjusted
    pub const PERF_LEVEL: u32 = 3;

    /// Values nvidia-smi prints instead of a number
    pub const UNAVAILABLE: [&str; 4] = ["N/A", "[N/A]", "[Not Supported]", "[Unknown Error]"];
}

/// PWM constants
pub mod pwm {
    /// Raw PWM maximum on hwmon
    pub const MAX: u8 = 255;

    /// Value of `pwm1_enable` selecting manual control
    pub const MODE_MANUAL: &str = "1";

    /// Convert percentage (0-100) to PWM value (0-255)
    #[inline]
    pub fn from_percent(percent: u8) -> u8 {
        ((percent.min(100) as u32 * MAX as u32 + 50) / 100) as u8
    }

    /// Convert PWM value (0-255) to percentage (0-100)
    #[inline]
    pub fn to_percent(value: u8) -> u8 {
        ((value as u32 * 100 + MAX as u32 / 2) / MAX as u32) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::pwm;

    #[test]
    fn test_pwm_conversion_endpoints() {
        assert_eq!(pwm::from_percent(0), 0);
        assert_eq!(pwm::from_percent(100), 255);
        assert_eq!(pwm::from_percent(150), 255);
        assert_eq!(pwm::to_percent(0), 0);
        assert_eq!(pwm::to_percent(255), 100);
    }

    #[test]
    fn test_pwm_conversion_is_stable() {
        for percent in 0..=100u8 {
            assert_eq!(pwm::to_percent(pwm::from_percent(percent)), percent);
        }
    }
}
