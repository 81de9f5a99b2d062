//! Configuration errors.

use gateway_core::GatewayError;
use std::path::PathBuf;

/// Errors raised while loading or validating configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("Failed to read config file {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The configuration file could not be parsed
    #[error("Failed to parse config file {path}: {message}")]
    Parse {
        /// File path
        path: PathBuf,
        /// Parser message
        message: String,
    },

    /// The file extension is not one of `toml`, `yaml`, `yml`, `json`
    #[error("Unsupported config format: {0}")]
    UnsupportedFormat(String),

    /// An environment override could not be applied
    #[error("Invalid value for {var}: {message}")]
    Env {
        /// Environment variable
        var: String,
        /// Reason
        message: String,
    },

    /// Validation failed
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<validator::ValidationErrors> for ConfigError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Invalid(errors.to_string())
    }
}

impl From<ConfigError> for GatewayError {
    fn from(err: ConfigError) -> Self {
        Self::configuration(err.to_string())
    }
}
