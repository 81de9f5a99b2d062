//! Configuration loading: defaults, then file, then environment.

use std::path::{Path, PathBuf};
use tracing::{debug, info};
use validator::Validate;

use crate::config::{GatewayConfig, LogFormat};
use crate::error::ConfigError;

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "GATEWAY_CONFIG";

/// Configuration loader
#[derive(Debug, Default)]
pub struct ConfigLoader {
    file: Option<PathBuf>,
    skip_env: bool,
}

impl ConfigLoader {
    /// Create a loader with no file
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a file; the format follows the extension
    #[must_use]
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Do not apply `GATEWAY_*` environment overrides
    #[must_use]
    pub fn without_env(mut self) -> Self {
        self.skip_env = true;
        self
    }

    /// Load, override and validate
    pub async fn load(self) -> Result<GatewayConfig, ConfigError> {
        let mut config = match &self.file {
            Some(path) => {
                info!(path = %path.display(), "Loading configuration file");
                let content = tokio::fs::read_to_string(path)
                    .await
                    .map_err(|source| ConfigError::Io {
                        path: path.clone(),
                        source,
                    })?;
                parse_config(path, &content)?
            }
            None => GatewayConfig::default(),
        };

        if !self.skip_env {
            apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
        }

        config.validate()?;
        Ok(config)
    }
}

/// Load using `GATEWAY_CONFIG` when set
pub async fn load_config() -> Result<GatewayConfig, ConfigError> {
    let loader = match std::env::var(CONFIG_PATH_ENV) {
        Ok(path) if !path.is_empty() => ConfigLoader::new().with_file(path),
        _ => ConfigLoader::new(),
    };
    loader.load().await
}

/// Parse configuration text, choosing the format by file extension
pub fn parse_config(path: &Path, content: &str) -> Result<GatewayConfig, ConfigError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();

    let parse_err = |message: String| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    };

    match ext.as_str() {
        "toml" => toml::from_str(content).map_err(|e| parse_err(e.to_string())),
        "yaml" | "yml" => serde_yaml::from_str(content).map_err(|e| parse_err(e.to_string())),
        "json" => serde_json::from_str(content).map_err(|e| parse_err(e.to_string())),
        other => Err(ConfigError::UnsupportedFormat(other.to_string())),
    }
}

/// Apply `GATEWAY_*` overrides read through `lookup`
pub fn apply_env_overrides<F>(config: &mut GatewayConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(host) = lookup("GATEWAY_HOST") {
        debug!(host = %host, "Overriding server host from environment");
        config.server.host = host;
    }

    if let Some(port) = lookup("GATEWAY_PORT") {
        config.server.port = port.parse().map_err(|_| ConfigError::Env {
            var: "GATEWAY_PORT".to_string(),
            message: format!("'{port}' is not a valid port"),
        })?;
    }

    if let Some(level) = lookup("GATEWAY_LOG_LEVEL") {
        config.logging.level = level;
    }

    if let Some(format) = lookup("GATEWAY_LOG_FORMAT") {
        config.logging.format = match format.to_ascii_lowercase().as_str() {
            "json" => LogFormat::Json,
            "pretty" | "text" => LogFormat::Pretty,
            other => {
                return Err(ConfigError::Env {
                    var: "GATEWAY_LOG_FORMAT".to_string(),
                    message: format!("unknown format '{other}'"),
                })
            }
        };
    }

    if let Some(path) = lookup("GATEWAY_CATALOG_PATH") {
        config.catalog_path = Some(PathBuf::from(path));
    }

    if let Some(path) = lookup("GATEWAY_METADATA_PATH") {
        config.metadata_path = Some(PathBuf::from(path));
    }

    Ok(())
}
