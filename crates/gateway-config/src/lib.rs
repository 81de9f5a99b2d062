//! # Gateway Config
//!
//! Configuration for the LLM routing gateway.
//!
//! Loading order is defaults, then an optional TOML/YAML/JSON file, then
//! `GATEWAY_*` environment overrides, then validation. Provider credentials
//! are not part of the file; they are read through a [`SecretSource`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod loader;
pub mod secrets;

pub use config::{
    CacheSettings, GatewayConfig, KeyHealthSettings, LogFormat, LoggingSettings,
    ProviderSettings, RoutingSettings, ServerSettings,
};
pub use error::ConfigError;
pub use loader::{apply_env_overrides, load_config, parse_config, ConfigLoader};
pub use secrets::{EnvSecretSource, SecretSource, StaticSecretSource};
