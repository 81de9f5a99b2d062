//! Secret sources.
//!
//! A secret value may hold several comma-separated entries; splitting and
//! rotation happen in the credential rotator, not here.

use parking_lot::RwLock;
use secrecy::SecretString;
use std::collections::HashMap;

/// Read access to provider-scoped secrets
pub trait SecretSource: Send + Sync {
    /// Raw value of a secret, `None` when unset
    fn get(&self, name: &str) -> Option<SecretString>;
}

/// Secrets read from the process environment
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSecretSource;

impl SecretSource for EnvSecretSource {
    fn get(&self, name: &str) -> Option<SecretString> {
        std::env::var(name)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(SecretString::new)
    }
}

/// In-memory secrets
#[derive(Debug, Default)]
pub struct StaticSecretSource {
    values: RwLock<HashMap<String, SecretString>>,
}

impl StaticSecretSource {
    /// Create an empty source
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a secret
    #[must_use]
    pub fn with(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    /// Set or replace a secret
    pub fn set(&self, name: impl Into<String>, value: impl Into<String>) {
        self.values
            .write()
            .insert(name.into(), SecretString::new(value.into()));
    }

    /// Remove a secret
    pub fn remove(&self, name: &str) {
        self.values.write().remove(name);
    }
}

impl SecretSource for StaticSecretSource {
    fn get(&self, name: &str) -> Option<SecretString> {
        self.values.read().get(name).cloned()
    }
}
