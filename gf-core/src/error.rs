//! Error types re-exported from gf-error

pub use gf_error::{GpufanError, Result};
