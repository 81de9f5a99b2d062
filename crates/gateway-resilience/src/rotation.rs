//! Round-robin rotation over comma-separated secret values.

use dashmap::DashMap;
use gateway_core::{GatewayError, GatewayResult};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Split a comma-separated secret value, trimming entries and dropping empties
#[must_use]
pub fn split_values(raw: &str) -> Vec<&str> {
    raw.split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .collect()
}

/// Value at `index` of a comma-separated list, clamped to the last entry.
///
/// Keeps correlated multi-valued settings (one region per key, ...) aligned
/// with the key index without requiring equal list lengths.
pub fn nth_value(raw: Option<&str>, index: usize, default: Option<&str>) -> GatewayResult<String> {
    let values = raw.map(split_values).unwrap_or_default();
    match values.get(index).or_else(|| values.last()) {
        Some(value) => Ok((*value).to_string()),
        None => default.map(ToString::to_string).ok_or_else(|| {
            GatewayError::configuration("setting is empty and no default was supplied")
        }),
    }
}

/// Per-secret rotation cursors
#[derive(Debug, Default)]
pub struct CredentialRotator {
    cursors: DashMap<String, AtomicUsize>,
}

impl CredentialRotator {
    /// Create a rotator with no cursors
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Next index for a list of `len` entries, advancing the cursor.
    ///
    /// Lists with a single entry always yield 0 and leave no cursor behind.
    pub fn next_index(&self, secret_name: &str, len: usize) -> usize {
        if len <= 1 {
            return 0;
        }

        let advance = |cursor: &AtomicUsize| {
            let prev = cursor
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| Some((c + 1) % len))
                .unwrap_or_else(|c| c);
            prev % len
        };

        if let Some(cursor) = self.cursors.get(secret_name) {
            return advance(&cursor);
        }
        let cursor = self
            .cursors
            .entry(secret_name.to_string())
            .or_insert_with(|| AtomicUsize::new(0));
        advance(&cursor)
    }

    /// Next token of a comma-separated value with its index
    pub fn next_token(&self, secret_name: &str, raw: &str) -> GatewayResult<(String, usize)> {
        let values = split_values(raw);
        if values.is_empty() {
            return Err(GatewayError::configuration(format!(
                "{secret_name} has no usable values"
            )));
        }
        let index = self.next_index(secret_name, values.len());
        Ok((values[index].to_string(), index))
    }

    /// Forget all cursors
    pub fn reset(&self) {
        self.cursors.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_split_values() {
        assert_eq!(split_values(" a, b ,,c ,"), vec!["a", "b", "c"]);
        assert!(split_values(" , ").is_empty());
    }

    #[test]
    fn test_cyclic_fairness() {
        let rotator = CredentialRotator::new();
        let raw = "k0,k1,k2";
        let visited: Vec<usize> = (0..6)
            .map(|_| rotator.next_token("OPENAI_API_KEY", raw).expect("token").1)
            .collect();
        assert_eq!(visited, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn test_single_entry_does_not_rotate() {
        let rotator = CredentialRotator::new();
        for _ in 0..3 {
            let (token, index) = rotator.next_token("ANTHROPIC_API_KEY", "only").expect("token");
            assert_eq!((token.as_str(), index), ("only", 0));
        }
        assert!(rotator.cursors.is_empty());
    }

    #[test]
    fn test_cursors_are_per_secret() {
        let rotator = CredentialRotator::new();
        assert_eq!(rotator.next_index("A", 2), 0);
        assert_eq!(rotator.next_index("B", 2), 0);
        assert_eq!(rotator.next_index("A", 2), 1);
    }

    #[test]
    fn test_empty_value_is_config_error() {
        let rotator = CredentialRotator::new();
        let result = rotator.next_token("X", " , ");
        assert!(matches!(result, Err(GatewayError::Configuration { .. })));
    }

    #[test]
    fn test_nth_value_clamps() {
        assert_eq!(nth_value(Some("eastus,westus"), 0, None).expect("value"), "eastus");
        assert_eq!(nth_value(Some("eastus,westus"), 5, None).expect("value"), "westus");
        assert_eq!(nth_value(None, 1, Some("default")).expect("value"), "default");
        assert!(nth_value(Some(""), 0, None).is_err());
    }

    #[test]
    fn test_concurrent_indices_stay_in_range() {
        let rotator = Arc::new(CredentialRotator::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let rotator = Arc::clone(&rotator);
                std::thread::spawn(move || {
                    (0..1000)
                        .map(|_| rotator.next_index("SHARED", 3))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for index in handle.join().expect("thread") {
                assert!(index < 3);
                seen.insert(index);
            }
        }
        assert_eq!(seen.len(), 3);
    }
}
