//! Structured logging setup.
//!
//! Installs a `tracing-subscriber` registry with an `EnvFilter` and a single
//! `fmt` layer, either human readable or one JSON object per line.

use gateway_config::{LogFormat, LoggingSettings};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Service name attached to the startup line
    pub service_name: String,
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
    /// Emit JSON lines instead of pretty output
    pub json: bool,
    /// Include the event target
    pub with_target: bool,
    /// Include source file and line
    pub with_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            service_name: "llm-routing-gateway".to_string(),
            level: "info".to_string(),
            json: false,
            with_target: true,
            with_location: false,
        }
    }
}

impl LoggingConfig {
    /// Create a configuration for `service_name`
    #[must_use]
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    /// Set the default filter directive
    #[must_use]
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Switch to JSON output
    #[must_use]
    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    /// Include source locations
    #[must_use]
    pub fn with_location(mut self, enabled: bool) -> Self {
        self.with_location = enabled;
        self
    }

    /// Filter from `RUST_LOG`, falling back to the configured level
    pub fn env_filter(&self) -> Result<EnvFilter, LoggingError> {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => EnvFilter::try_new(&self.level)
                .map_err(|e| LoggingError::InvalidFilter(format!("{}: {e}", self.level))),
        }
    }
}

impl From<&LoggingSettings> for LoggingConfig {
    fn from(settings: &LoggingSettings) -> Self {
        Self {
            level: settings.level.clone(),
            json: settings.format == LogFormat::Json,
            ..Self::default()
        }
    }
}

/// Install the global subscriber
///
/// # Errors
/// Returns error if the filter is invalid or a subscriber is already set
pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingError> {
    let filter = config.env_filter()?;

    let layer = if config.json {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(config.with_target)
            .with_file(config.with_location)
            .with_line_number(config.with_location)
            .boxed()
    } else {
        fmt::layer()
            .with_target(config.with_target)
            .with_file(config.with_location)
            .with_line_number(config.with_location)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(layer.with_filter(filter))
        .try_init()
        .map_err(|e| LoggingError::Init(e.to_string()))?;

    info!(
        service = %config.service_name,
        level = %config.level,
        json = config.json,
        "Logging initialized"
    );
    Ok(())
}

/// Logging initialization error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    /// The filter directive could not be parsed
    #[error("Invalid log filter: {0}")]
    InvalidFilter(String),
    /// A global subscriber is already installed
    #[error("Failed to initialize logging: {0}")]
    Init(String),
}

/// Create a span for one routed request
#[macro_export]
macro_rules! request_span {
    ($request_id:expr, $model:expr) => {
        tracing::info_span!(
            "chat_completion",
            request_id = %$request_id,
            model = %$model,
        )
    };
}
