//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for this schema
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// An environment override could not be parsed
    #[error("Invalid value '{value}' for environment variable {var}")]
    InvalidEnv { var: &'static str, value: String },

    /// A duration setting is zero
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    /// A numeric setting is outside its usable range
    #[error("{field} is out of range: {reason}")]
    OutOfRange { field: &'static str, reason: String },
}
