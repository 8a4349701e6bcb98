//! Error types for the crossflow engine.
//!
//! Only two things can go wrong inside the engine: the configuration is
//! unusable, or the control loop's plumbing is gone. Degenerate observations and
//! missing frames are not errors and never show up here.

use thiserror::Error;

/// Result alias for configuration loading and validation.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Rejected configuration. Always fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Minimum green exceeds maximum green
    #[error("min_green_time ({min}s) must not exceed max_green_time ({max}s)")]
    GreenTimeOrder { min: f64, max: f64 },

    /// A duration or threshold that must be non-negative is not
    #[error("{field} must be non-negative and finite, got {value}")]
    Negative { field: &'static str, value: f64 },

    /// A (lower, upper) bound pair that admits nothing
    #[error("{field}: lower bound {lower} must be below upper bound {upper}")]
    EmptyRange {
        field: &'static str,
        lower: f64,
        upper: f64,
    },

    /// A span that must be strictly positive is not
    #[error("{field} must be greater than zero, got {value}")]
    NotPositive { field: &'static str, value: f64 },

    /// A value above the largest one the engine can schedule or store
    #[error("{field} must not exceed {limit}, got {value}")]
    TooLarge {
        field: &'static str,
        value: f64,
        limit: f64,
    },

    /// A count that must be at least one is zero
    #[error("{0} must be at least 1")]
    Zero(&'static str),

    /// An override value that does not parse
    #[error("cannot parse override {key}={value:?}")]
    InvalidOverride { key: String, value: String },

    /// Config file could not be read
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid YAML for the schema
    #[error("cannot parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Failures of the running control loop.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControlError {
    #[error("control loop is no longer accepting frames")]
    FramesClosed,

    #[error("control loop task failed: {0}")]
    TaskFailed(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown direction {0:?} (expected north, south, east or west)")]
pub struct ParseDirectionError(pub String);
