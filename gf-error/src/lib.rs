//! Unified error handling for Gpufan
//!
//! Every crate in the workspace returns [`GpufanError`]. The control-path
//! variants (`SensorFault`, `ActuatorFault`, `ControlUnavailable`,
//! `EmptyCurve`, `InvalidEdit`) are handled inside the monitor loop and
//! must never be turned into a panic.

use std::io;
use std::path::PathBuf;

/// Result type alias using GpufanError
pub type Result<T> = std::result::Result<T, GpufanError>;

/// Unified error type for all Gpufan operations
#[derive(thiserror::Error, Debug)]
pub enum GpufanError {
    // ============================================================================
    // I/O and File System Errors
    // ============================================================================
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: io::Error,
    },

    // ============================================================================
    // Control Path Errors
    // ============================================================================
    /// Temperature could not be read or was implausible
    #[error("Sensor fault: {0}")]
    SensorFault(String),

    /// A fan speed write was rejected by the device
    #[error("Actuator fault: {0}")]
    ActuatorFault(String),

    /// Manual fan control mode could not be enabled
    #[error("Fan control unavailable: {0}")]
    ControlUnavailable(String),

    #[error("Curve has no control points")]
    EmptyCurve,

    #[error("Invalid curve edit: {0}")]
    InvalidEdit(String),

    // ============================================================================
    // Device Access Errors
    // ============================================================================
    #[error("Command `{command}` failed: {reason}")]
    CommandFailed {
        command: String,
        reason: String,
    },

    #[error("Failed to parse device output: {0}")]
    Parse(String),

    #[error("Hardware not found: {0}")]
    HardwareNotFound(String),

    #[error("GPU error: {0}")]
    GpuError(String),

    // ============================================================================
    // Configuration and Settings Errors
    // ============================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidConfig {
        field: String,
        reason: String,
    },

    // ============================================================================
    // Other Errors
    // ============================================================================
    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),
}

impl GpufanError {
    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn sensor(msg: impl Into<String>) -> Self {
        Self::SensorFault(msg.into())
    }

    pub fn actuator(msg: impl Into<String>) -> Self {
        Self::ActuatorFault(msg.into())
    }

    /// Create a command failure for an external tool invocation
    pub fn command(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CommandFailed {
            command: command.into(),
            reason: reason.into(),
        }
    }

    /// True for faults the control loop substitutes or retries instead of surfacing
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::SensorFault(_) | Self::ActuatorFault(_) | Self::ControlUnavailable(_) | Self::Timeout(_)
        )
    }
}
