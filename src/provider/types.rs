//! Provider-facing types: kind schemas, retry policy, call results.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use crate::config::Value;

/// Schema a provider declares for a resource kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KindSchema {
    /// The resource kind this schema describes.
    pub kind: String,
    /// Attributes that cannot be changed in place. A diff touching one of
    /// these forces a replace instead of an update.
    pub immutable: BTreeSet<String>,
    /// Whether create calls are idempotent when retried with the same
    /// request token. Gates retry of mutating calls.
    pub supports_request_tokens: bool,
}

impl KindSchema {
    /// Creates a schema with no immutable attributes.
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            immutable: BTreeSet::new(),
            supports_request_tokens: true,
        }
    }

    /// Marks attributes as immutable.
    #[must_use]
    pub fn with_immutable(mut self, attrs: &[&str]) -> Self {
        self.immutable = attrs.iter().map(|a| (*a).to_string()).collect();
        self
    }

    /// Returns true if the attribute cannot be updated in place.
    #[must_use]
    pub fn is_immutable(&self, attribute: &str) -> bool {
        self.immutable.contains(attribute)
    }
}

/// Retry behavior for transient provider failures.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Base delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Cap on the backoff delay, in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    /// Returns the backoff delay before retry number `attempt` (1-based),
    /// doubling each time up to the cap.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let delay = self
            .base_delay_ms
            .saturating_mul(1_u64 << exp)
            .min(self.max_delay_ms);
        Duration::from_millis(delay)
    }
}

/// Result of a successful create call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateResponse {
    /// Provider-assigned identifier for the new resource.
    pub provider_id: String,
    /// Full attribute set as observed after creation, including computed
    /// attributes such as `id`.
    pub attributes: BTreeMap<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 2_000,
        };

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(2_000));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(2_000));
    }

    #[test]
    fn test_schema_immutable_lookup() {
        let schema = KindSchema::new("subnet").with_immutable(&["network_id", "cidr_block"]);
        assert!(schema.is_immutable("network_id"));
        assert!(!schema.is_immutable("tags"));
    }
}
