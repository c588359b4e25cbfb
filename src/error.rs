//! Error types for the Terraplane reconciliation engine.
//!
//! This module provides a comprehensive error hierarchy for every phase of a
//! run: configuration, dependency resolution, state management, provider
//! operations, planning, and execution.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the Terraplane engine.
#[derive(Debug, Error)]
pub enum TerraplaneError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Provider capability errors.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Planning errors.
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// Execution errors.
    #[error("Execution error: {0}")]
    Exec(#[from] ExecError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
///
/// These are fatal and abort a run before any plan is built.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// Duplicate resource declaration.
    #[error("Duplicate resource: {address}")]
    DuplicateResource {
        /// Address of the duplicated resource (kind.name).
        address: String,
    },

    /// A reference or `depends_on` entry names a resource that is not declared.
    #[error("Unknown resource: {address}{}", referrer.as_ref().map(|r| format!(" (referenced by {r})")).unwrap_or_default())]
    UnknownResource {
        /// Address of the missing resource.
        address: String,
        /// Resource that made the reference, if any.
        referrer: Option<String>,
    },

    /// A malformed reference expression.
    #[error("Invalid reference expression '{expression}': {message}")]
    InvalidReference {
        /// The offending expression.
        expression: String,
        /// Why it could not be parsed.
        message: String,
    },

    /// Cyclic dependency detected between declared resources.
    #[error("Cyclic dependency detected: {}", cycle.join(" -> "))]
    CyclicDependency {
        /// Addresses of the cycle's member resources, in traversal order.
        cycle: Vec<String>,
    },
}

/// State management errors.
///
/// A state error is fatal for the run: the run must never report success if
/// the final state could not be durably saved.
#[derive(Debug, Error)]
pub enum StateError {
    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// State lock is held by another process.
    #[error("State is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// Persistence backend error.
    #[error("State backend error: {message}")]
    BackendError {
        /// Description of the backend error.
        message: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// State version mismatch.
    #[error("State version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected state version.
        expected: String,
        /// Found state version.
        found: String,
    },
}

/// Provider capability errors.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Transient failure (timeout, rate limit). Retried with backoff up to a
    /// bounded attempt count, then escalated.
    #[error("Transient provider error: {message}")]
    Transient {
        /// Description of the transient failure.
        message: String,
        /// Suggested delay before retrying, in seconds.
        retry_after_secs: Option<u64>,
    },

    /// Permanent rejection (invalid attribute, quota, policy). Fails only the
    /// affected resource and its dependents.
    #[error("Provider rejected {address}: {message}")]
    Rejected {
        /// Address of the affected resource.
        address: String,
        /// Rejection reason.
        message: String,
    },

    /// The provider has no record of the given identifier.
    #[error("Provider object not found: {provider_id}")]
    NotFound {
        /// Provider-assigned identifier.
        provider_id: String,
    },

    /// The provider does not support the given resource kind.
    #[error("Unsupported resource kind: {kind}")]
    UnsupportedKind {
        /// The unknown kind.
        kind: String,
    },

    /// Retry budget exhausted for a transient failure.
    #[error("Provider error persisted after {attempts} attempts: {message}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Last transient failure message.
        message: String,
    },
}

/// Planning errors.
///
/// These are fatal and abort a run before any provider call is made.
#[derive(Debug, Error)]
pub enum PlanError {
    /// Conflicting actions for a single resource identity.
    #[error("Plan conflict for {address}: {message}")]
    Conflict {
        /// Address of the conflicting resource.
        address: String,
        /// Description of the conflict.
        message: String,
    },

    /// A planned action refers to a state record that is missing a provider id.
    #[error("Cannot plan {action} for {address}: no provider id recorded")]
    MissingProviderId {
        /// The action that could not be planned.
        action: String,
        /// Address of the resource.
        address: String,
    },
}

/// Execution errors.
#[derive(Debug, Error)]
pub enum ExecError {
    /// One or more actions ended in a failed state.
    #[error("{failed} of {total} actions failed")]
    ActionsFailed {
        /// Number of failed actions.
        failed: usize,
        /// Total actions in the plan.
        total: usize,
    },

    /// The run was cancelled before all actions were scheduled.
    #[error("Run cancelled: {completed} of {total} actions completed")]
    Cancelled {
        /// Actions that reached a terminal state before cancellation.
        completed: usize,
        /// Total actions in the plan.
        total: usize,
    },

    /// A reference could not be resolved from applied outputs or prior state.
    #[error("Unresolved reference {expression} while applying {address}")]
    UnresolvedReference {
        /// The reference expression.
        expression: String,
        /// Address of the resource being applied.
        address: String,
    },
}

/// Result type alias for Terraplane operations.
pub type Result<T> = std::result::Result<T, TerraplaneError>;

impl TerraplaneError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Provider(ProviderError::Transient { .. })
                | Self::State(StateError::LockFailed { .. })
        )
    }

    /// Returns the suggested retry delay in seconds, if applicable.
    #[must_use]
    pub const fn retry_delay_secs(&self) -> Option<u64> {
        match self {
            Self::Provider(ProviderError::Transient {
                retry_after_secs: Some(secs),
                ..
            }) => Some(*secs),
            Self::Provider(ProviderError::Transient { .. }) => Some(5),
            Self::State(StateError::LockFailed { .. }) => Some(2),
            _ => None,
        }
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a validation error without a specific field.
    #[must_use]
    pub fn validation_general(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: None,
        }
    }
}

impl StateError {
    /// Creates a backend error with the given message.
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::BackendError {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }
}

impl ProviderError {
    /// Creates a transient error without a retry hint.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            retry_after_secs: None,
        }
    }

    /// Creates a permanent rejection for a resource address.
    #[must_use]
    pub fn rejected(address: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            address: address.into(),
            message: message.into(),
        }
    }

    /// Returns true if this error may be retried.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_is_retryable() {
        let err = TerraplaneError::Provider(ProviderError::transient("timeout"));
        assert!(err.is_retryable());
        assert_eq!(err.retry_delay_secs(), Some(5));
    }

    #[test]
    fn test_rejection_is_not_retryable() {
        let err = TerraplaneError::Provider(ProviderError::rejected("network.main", "bad cidr"));
        assert!(!err.is_retryable());
        assert_eq!(err.retry_delay_secs(), None);
    }

    #[test]
    fn test_cycle_message_names_members() {
        let err = ConfigError::CyclicDependency {
            cycle: vec![
                String::from("subnet.a"),
                String::from("network.b"),
                String::from("subnet.a"),
            ],
        };
        assert!(err.to_string().contains("subnet.a -> network.b -> subnet.a"));
    }
}
