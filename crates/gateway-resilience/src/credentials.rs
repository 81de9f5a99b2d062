//! Healthy credential resolution.
//!
//! Combines the secret source, the rotator and the health tracker: rotation
//! advances past unhealthy indices until a healthy key is found or every
//! index has been tried once.

use gateway_config::SecretSource;
use gateway_core::{GatewayError, GatewayResult};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tracing::debug;

use crate::key_health::KeyHealthTracker;
use crate::rotation::{nth_value, split_values, CredentialRotator};

/// A token picked for one upstream attempt
#[derive(Debug, Clone)]
pub struct ResolvedCredential {
    /// Secret the token came from; health is tracked under this name
    pub secret_name: String,
    /// Index of the token within the secret
    pub index: usize,
    /// Number of tokens configured for the secret
    pub key_count: usize,
    /// The token
    pub token: SecretString,
}

/// Resolves secrets to healthy tokens
pub struct CredentialResolver {
    secrets: Arc<dyn SecretSource>,
    rotator: Arc<CredentialRotator>,
    health: Arc<KeyHealthTracker>,
}

impl std::fmt::Debug for CredentialResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialResolver").finish_non_exhaustive()
    }
}

impl CredentialResolver {
    /// Create a resolver
    #[must_use]
    pub fn new(
        secrets: Arc<dyn SecretSource>,
        rotator: Arc<CredentialRotator>,
        health: Arc<KeyHealthTracker>,
    ) -> Self {
        Self {
            secrets,
            rotator,
            health,
        }
    }

    /// Health tracker shared with the router
    #[must_use]
    pub fn health(&self) -> &Arc<KeyHealthTracker> {
        &self.health
    }

    /// Rotator shared with the router
    #[must_use]
    pub fn rotator(&self) -> &Arc<CredentialRotator> {
        &self.rotator
    }

    /// Pick a healthy token from the named secret
    pub fn resolve(&self, secret_name: &str) -> GatewayResult<ResolvedCredential> {
        let raw = self.secrets.get(secret_name).ok_or_else(|| {
            GatewayError::configuration(format!("{secret_name} is not configured"))
        })?;
        self.resolve_value(secret_name, raw.expose_secret())
    }

    /// Pick a healthy token from a raw comma-separated value
    pub fn resolve_value(&self, secret_name: &str, raw: &str) -> GatewayResult<ResolvedCredential> {
        let values = split_values(raw);
        if values.is_empty() {
            return Err(GatewayError::configuration(format!(
                "{secret_name} has no usable values"
            )));
        }

        for _ in 0..values.len() {
            let index = self.rotator.next_index(secret_name, values.len());
            if self.health.is_healthy(secret_name, index) {
                return Ok(ResolvedCredential {
                    secret_name: secret_name.to_string(),
                    index,
                    key_count: values.len(),
                    token: SecretString::new(values[index].to_string()),
                });
            }
            debug!(secret = %secret_name, key_index = index, "Skipping unhealthy key");
        }

        Err(GatewayError::NoHealthyCredential {
            secret_name: secret_name.to_string(),
            total: values.len(),
        })
    }

    /// Value of a companion setting aligned to a key index
    pub fn companion(
        &self,
        secret_name: &str,
        index: usize,
        default: Option<&str>,
    ) -> GatewayResult<String> {
        let raw = self.secrets.get(secret_name);
        nth_value(raw.as_ref().map(|s| s.expose_secret().as_str()), index, default).map_err(
            |_| GatewayError::configuration(format!("{secret_name} is not configured")),
        )
    }
}
