//! Per-key health ledger.
//!
//! Keys are identified by `(secret name, index)`. A key becomes unhealthy
//! after `error_threshold` consecutive errors and recovers once
//! `blacklist_duration` has elapsed. 401/403 responses blacklist a key for
//! the lifetime of the process; success never clears that.

use dashmap::DashMap;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Key health configuration
#[derive(Debug, Clone)]
pub struct KeyHealthConfig {
    /// Consecutive errors before the key is excluded
    pub error_threshold: u32,
    /// How long an excluded key stays out
    pub blacklist_duration: Duration,
}

impl Default for KeyHealthConfig {
    fn default() -> Self {
        Self {
            error_threshold: 3,
            blacklist_duration: Duration::from_secs(30),
        }
    }
}

/// Health record of a single key
#[derive(Debug, Clone, Default)]
pub struct KeyHealth {
    /// Errors since the last success
    pub consecutive_errors: u32,
    /// Time of the last error
    pub last_error_at: Option<Instant>,
    /// Set by an authentication failure, never cleared by success
    pub permanently_blacklisted: bool,
}

/// Point-in-time view of a key, for admin endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyHealthSnapshot {
    /// Secret name
    pub secret_name: String,
    /// Key index within the secret
    pub index: usize,
    /// Errors since the last success
    pub consecutive_errors: u32,
    /// Permanently blacklisted
    pub permanently_blacklisted: bool,
    /// Whether the key would be used right now
    pub healthy: bool,
}

/// Process-wide key health tracker
#[derive(Debug, Default)]
pub struct KeyHealthTracker {
    config: KeyHealthConfig,
    keys: DashMap<(String, usize), KeyHealth>,
}

impl KeyHealthTracker {
    /// Create a tracker
    #[must_use]
    pub fn new(config: KeyHealthConfig) -> Self {
        Self {
            config,
            keys: DashMap::new(),
        }
    }

    /// Create with default configuration
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(KeyHealthConfig::default())
    }

    /// Configuration in use
    #[must_use]
    pub fn config(&self) -> &KeyHealthConfig {
        &self.config
    }

    /// Whether a key may be used. Unknown keys are healthy.
    pub fn is_healthy(&self, secret_name: &str, index: usize) -> bool {
        let Some(mut health) = self.keys.get_mut(&(secret_name.to_string(), index)) else {
            return true;
        };

        if health.permanently_blacklisted {
            return false;
        }
        if health.consecutive_errors < self.config.error_threshold {
            return true;
        }

        let expired = health
            .last_error_at
            .map_or(true, |at| at.elapsed() >= self.config.blacklist_duration);
        if expired {
            health.consecutive_errors = 0;
            info!(secret = %secret_name, key_index = index, "Key blacklist expired");
        }
        expired
    }

    /// Record a successful call
    pub fn report_success(&self, secret_name: &str, index: usize) {
        if let Some(mut health) = self.keys.get_mut(&(secret_name.to_string(), index)) {
            if !health.permanently_blacklisted && health.consecutive_errors > 0 {
                debug!(secret = %secret_name, key_index = index, "Key recovered");
                health.consecutive_errors = 0;
            }
        }
    }

    /// Record a failed call. 401 and 403 blacklist the key permanently.
    pub fn report_error(&self, secret_name: &str, index: usize, status_code: Option<u16>) {
        let mut health = self
            .keys
            .entry((secret_name.to_string(), index))
            .or_default();

        health.last_error_at = Some(Instant::now());

        if matches!(status_code, Some(401 | 403)) {
            if !health.permanently_blacklisted {
                warn!(
                    secret = %secret_name,
                    key_index = index,
                    status = status_code,
                    "Key permanently blacklisted after authentication failure"
                );
            }
            health.permanently_blacklisted = true;
            return;
        }

        health.consecutive_errors = health.consecutive_errors.saturating_add(1);
        if health.consecutive_errors == self.config.error_threshold {
            warn!(
                secret = %secret_name,
                key_index = index,
                errors = health.consecutive_errors,
                blacklist_secs = self.config.blacklist_duration.as_secs(),
                "Key temporarily blacklisted"
            );
        }
    }

    /// Forget all health records
    pub fn reset(&self) {
        self.keys.clear();
        info!("Key health reset");
    }

    /// Forget the record of one key, including a permanent blacklist
    pub fn reset_key(&self, secret_name: &str, index: usize) {
        self.keys.remove(&(secret_name.to_string(), index));
    }

    /// Health record of a key, if any
    #[must_use]
    pub fn get(&self, secret_name: &str, index: usize) -> Option<KeyHealth> {
        self.keys
            .get(&(secret_name.to_string(), index))
            .map(|h| h.clone())
    }

    /// All recorded keys, sorted by secret name and index
    #[must_use]
    pub fn snapshot(&self) -> Vec<KeyHealthSnapshot> {
        let mut out: Vec<KeyHealthSnapshot> = self
            .keys
            .iter()
            .map(|entry| {
                let ((secret_name, index), health) = entry.pair();
                let in_window = health.consecutive_errors >= self.config.error_threshold
                    && health
                        .last_error_at
                        .is_some_and(|at| at.elapsed() < self.config.blacklist_duration);
                KeyHealthSnapshot {
                    secret_name: secret_name.clone(),
                    index: *index,
                    consecutive_errors: health.consecutive_errors,
                    permanently_blacklisted: health.permanently_blacklisted,
                    healthy: !health.permanently_blacklisted && !in_window,
                }
            })
            .collect();
        out.sort_by(|a, b| (&a.secret_name, a.index).cmp(&(&b.secret_name, b.index)));
        out
    }
}
