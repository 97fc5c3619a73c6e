use std::{io, path::PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Error, Debug)]
pub enum SensorError {
    #[error("Sensor is not open")]
    NotOpen,

    #[error("Sensor device error: {message}")]
    Device { message: String },
}

/// Failures talking to the machine controller or writing the coordinate artifact.
///
/// None of these end an acquisition session; the loop logs them and carries on.
#[derive(Error, Debug)]
pub enum HandoffError {
    #[error("Controller transport error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to encode controller request: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("Failed to decode controller response: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("Controller did not answer within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Controller rejected request for `{name}`: {message}")]
    Rejected { name: String, message: String },

    #[error("Unknown controller variable `{name}`")]
    UnknownVariable { name: String },

    #[error("Controller variable `{name}` holds {found}, expected {expected}")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Failed to write coordinate file {path}")]
    Artifact {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
