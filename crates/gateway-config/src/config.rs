//! Configuration model.
//!
//! Every section has defaults, so an empty file (or no file) yields a
//! working configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use validator::{Validate, ValidationError};

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct GatewayConfig {
    /// HTTP listener
    #[serde(default)]
    #[validate(nested)]
    pub server: ServerSettings,

    /// Fallback loop tuning
    #[serde(default)]
    #[validate(nested)]
    pub routing: RoutingSettings,

    /// Key health tracking
    #[serde(default)]
    #[validate(nested)]
    pub key_health: KeyHealthSettings,

    /// Metadata cache
    #[serde(default)]
    #[validate(nested)]
    pub cache: CacheSettings,

    /// Logging
    #[serde(default)]
    #[validate(nested)]
    pub logging: LoggingSettings,

    /// Model catalog file; the built-in catalog is used when unset
    #[serde(default)]
    pub catalog_path: Option<PathBuf>,

    /// Metadata snapshot (API keys, projects, organizations, provider keys
    /// and IAM rules) loaded into the in-process store
    #[serde(default)]
    pub metadata_path: Option<PathBuf>,

    /// Upstream providers
    #[serde(default)]
    #[validate(nested)]
    pub providers: Vec<ProviderSettings>,
}

impl GatewayConfig {
    /// Settings of an enabled provider
    #[must_use]
    pub fn provider(&self, id: &str) -> Option<&ProviderSettings> {
        self.providers.iter().find(|p| p.enabled && p.id == id)
    }
}

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerSettings {
    /// Bind address
    #[serde(default = "default_host")]
    #[validate(length(min = 1))]
    pub host: String,

    /// Bind port
    #[serde(default = "default_port")]
    #[validate(range(min = 1))]
    pub port: u16,

    /// Grace period for in-flight requests on shutdown
    #[serde(default = "default_shutdown_timeout", with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Fallback loop settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_routing"))]
pub struct RoutingSettings {
    /// Timeout of a single upstream attempt (until headers for streams)
    #[serde(default = "default_attempt_timeout", with = "humantime_serde")]
    pub attempt_timeout: Duration,

    /// Time allowed between stream headers and the first body chunk
    #[serde(default = "default_first_byte_timeout", with = "humantime_serde")]
    pub first_byte_timeout: Duration,

    /// Maximum silence between two stream chunks
    #[serde(default = "default_stream_idle_timeout", with = "humantime_serde")]
    pub stream_idle_timeout: Duration,

    /// Maximum dispatched attempts per request, 0 tries every candidate
    #[serde(default)]
    pub max_attempts: usize,
}

impl Default for RoutingSettings {
    fn default() -> Self {
        Self {
            attempt_timeout: default_attempt_timeout(),
            first_byte_timeout: default_first_byte_timeout(),
            stream_idle_timeout: default_stream_idle_timeout(),
            max_attempts: 0,
        }
    }
}

fn default_attempt_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_first_byte_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_stream_idle_timeout() -> Duration {
    Duration::from_secs(120)
}

fn validate_routing(routing: &RoutingSettings) -> Result<(), ValidationError> {
    if routing.attempt_timeout.is_zero()
        || routing.first_byte_timeout.is_zero()
        || routing.stream_idle_timeout.is_zero()
    {
        return Err(ValidationError::new("zero_timeout"));
    }
    Ok(())
}

/// Key health settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct KeyHealthSettings {
    /// Consecutive errors that exclude a key
    #[serde(default = "default_error_threshold")]
    #[validate(range(min = 1))]
    pub error_threshold: u32,

    /// How long an excluded key stays out
    #[serde(default = "default_blacklist_duration", with = "humantime_serde")]
    pub blacklist_duration: Duration,
}

impl Default for KeyHealthSettings {
    fn default() -> Self {
        Self {
            error_threshold: default_error_threshold(),
            blacklist_duration: default_blacklist_duration(),
        }
    }
}

fn default_error_threshold() -> u32 {
    3
}

fn default_blacklist_duration() -> Duration {
    Duration::from_secs(30)
}

/// Metadata cache settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_cache"))]
pub struct CacheSettings {
    /// Prefix prepended to every cache key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Age after which a hit triggers a background refresh
    #[serde(default = "default_stale_time", with = "humantime_serde")]
    pub stale_time: Duration,

    /// Age after which an entry is refetched synchronously
    #[serde(default = "default_max_age", with = "humantime_serde")]
    pub max_age: Duration,

    /// Max age of a cached "not found"
    #[serde(default = "default_negative_max_age", with = "humantime_serde")]
    pub negative_max_age: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
            stale_time: default_stale_time(),
            max_age: default_max_age(),
            negative_max_age: default_negative_max_age(),
        }
    }
}

fn default_key_prefix() -> String {
    "gw".to_string()
}

fn default_stale_time() -> Duration {
    Duration::from_secs(10)
}

fn default_max_age() -> Duration {
    Duration::from_secs(60)
}

fn default_negative_max_age() -> Duration {
    Duration::from_secs(5)
}

fn validate_cache(cache: &CacheSettings) -> Result<(), ValidationError> {
    if cache.stale_time > cache.max_age {
        return Err(ValidationError::new("stale_time_exceeds_max_age"));
    }
    Ok(())
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    #[validate(length(min = 1))]
    pub level: String,

    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Settings of one upstream provider
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ProviderSettings {
    /// Provider id, matches catalog mappings
    #[validate(length(min = 1))]
    pub id: String,

    /// Disabled providers are never dispatched to
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Secret holding the comma-separated token list
    #[validate(length(min = 1))]
    pub secret_name: String,

    /// Base URL override
    #[serde(default)]
    #[validate(url)]
    pub base_url: Option<String>,

    /// Setting name to secret name of correlated multi-valued settings,
    /// aligned to the key index (e.g. `resource = "AZURE_RESOURCE"`)
    #[serde(default)]
    pub companion_settings: HashMap<String, String>,
}

impl ProviderSettings {
    /// Settings for a provider reading its keys from `secret_name`
    #[must_use]
    pub fn new(id: impl Into<String>, secret_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            enabled: true,
            secret_name: secret_name.into(),
            base_url: None,
            companion_settings: HashMap::new(),
        }
    }

    /// Add a companion setting
    #[must_use]
    pub fn with_companion(mut self, setting: impl Into<String>, secret: impl Into<String>) -> Self {
        self.companion_settings.insert(setting.into(), secret.into());
        self
    }

    /// Set the base URL
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }
}

fn default_true() -> bool {
    true
}
