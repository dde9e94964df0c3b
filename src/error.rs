//! Error types for the stackform planner.
//!
//! This module provides the error hierarchy for every stage of a run:
//! configuration, declaration and graph building, planning, applying,
//! provider calls and state management.

use std::path::PathBuf;
use thiserror::Error;

use crate::state::StateSnapshot;

/// The main error type for stackform.
#[derive(Debug, Error)]
pub enum StackformError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Declaration and dependency graph errors.
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// Planning errors.
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// Apply errors.
    #[error("Apply error: {0}")]
    Apply(#[from] ApplyError),

    /// Resource provider errors.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
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

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },
}

/// Declaration and dependency graph errors.
///
/// All of these are raised before any provider call is made.
#[derive(Debug, Error)]
pub enum GraphError {
    /// A resource identifier was declared twice.
    #[error("Duplicate resource id: {id}")]
    DuplicateId {
        /// The duplicated identifier.
        id: String,
    },

    /// A resource references or depends on itself.
    #[error("Resource '{id}' references itself")]
    SelfReference {
        /// The offending identifier.
        id: String,
    },

    /// A resource identifier is malformed.
    #[error("Invalid resource id '{id}': {reason}")]
    InvalidId {
        /// The offending identifier.
        id: String,
        /// Why the identifier was rejected.
        reason: String,
    },

    /// A reference or explicit dependency names an undeclared resource.
    #[error("Resource '{from}' references unknown resource '{target}'")]
    UnknownReference {
        /// Resource holding the reference.
        from: String,
        /// The undeclared target.
        target: String,
    },

    /// The dependency graph contains a cycle.
    #[error("Cyclic dependency detected: {}", cycle.join(" -> "))]
    CyclicDependency {
        /// Cycle members in traversal order, first member repeated at the end.
        cycle: Vec<String>,
    },
}

/// Planning errors.
#[derive(Debug, Error)]
pub enum PlanError {
    /// A replacement would leave live resources pointing at a deleted instance.
    #[error(
        "Replacing '{resource}' is unsafe: still referenced by {}",
        dependents.join(", ")
    )]
    UnsafeReplace {
        /// Resource that requires replacement.
        resource: String,
        /// Surviving resources that still reference it.
        dependents: Vec<String>,
    },

    /// The stored state moved since the plan was computed.
    #[error("Plan for stack '{stack}' is stale: planned against serial {planned}, state is at {current}")]
    StalePlan {
        /// Stack identifier.
        stack: String,
        /// Serial the plan was computed against.
        planned: u64,
        /// Serial currently stored.
        current: u64,
    },
}

/// Apply-time errors.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// An entry failed; entries before it (and any in flight) are recorded.
    #[error("Apply halted at entry {position} ({resource}): {source}")]
    PartialApply {
        /// 1-based position of the failed entry in the plan.
        position: usize,
        /// Resource the failed entry acted on.
        resource: String,
        /// Underlying cause.
        #[source]
        source: Box<StackformError>,
        /// State reflecting every entry that completed successfully.
        snapshot: Box<StateSnapshot>,
    },

    /// The run was cancelled before every entry could start.
    #[error("Apply cancelled after {completed} of {total} entries")]
    Cancelled {
        /// Entries that completed successfully.
        completed: usize,
        /// Entries in the plan.
        total: usize,
        /// State reflecting every entry that completed successfully.
        snapshot: Box<StateSnapshot>,
    },

    /// A reference could not be resolved against the applied state.
    #[error("Resource '{resource}' references output '{output}' of '{target}', which is not available")]
    UnresolvedReference {
        /// Resource holding the reference.
        resource: String,
        /// Referenced resource.
        target: String,
        /// Referenced output name.
        output: String,
    },
}

/// Resource provider errors.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Authentication failed.
    #[error("Provider authentication failed: {message}")]
    AuthenticationFailed {
        /// Description of the auth failure.
        message: String,
    },

    /// API request failed.
    #[error("Provider request failed: {status} - {message}")]
    ApiRequestFailed {
        /// HTTP status code.
        status: u16,
        /// Error message from the API.
        message: String,
    },

    /// Rate limited.
    #[error("Provider rate limited, retry after {retry_after_secs} seconds")]
    RateLimited {
        /// Seconds to wait before retrying.
        retry_after_secs: u64,
    },

    /// The provider does not know the resource.
    #[error("Resource not found at provider: {provider_id}")]
    NotFound {
        /// Provider-assigned identifier.
        provider_id: String,
    },

    /// Network error.
    #[error("Network error communicating with provider: {message}")]
    Network {
        /// Description of the network error.
        message: String,
    },

    /// Invalid response from the provider.
    #[error("Invalid response from provider: {message}")]
    InvalidResponse {
        /// Description of the response issue.
        message: String,
    },

    /// The provider refused the operation.
    #[error("Provider rejected {operation} of {resource_type}: {message}")]
    Rejected {
        /// Operation that was refused (create, update, delete).
        operation: String,
        /// Resource type the operation targeted.
        resource_type: String,
        /// Provider message.
        message: String,
    },
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// State could not be written.
    #[error("Failed to write state: {message}")]
    WriteFailed {
        /// Description of the write failure.
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

    /// S3 backend error.
    #[error("S3 state backend error: {message}")]
    S3Error {
        /// Description of the S3 error.
        message: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// Simulated and real runs tried to share one state.
    #[error("State of '{stack}' was written by a {recorded} run and cannot be used by a {requested} run")]
    SimulationMismatch {
        /// Stack identifier.
        stack: String,
        /// Kind of run that wrote the state (`simulated` or `real`).
        recorded: &'static str,
        /// Kind of run that was requested.
        requested: &'static str,
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

/// Result type alias for stackform operations.
pub type Result<T> = std::result::Result<T, StackformError>;

impl StackformError {
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
            Self::Provider(ProviderError::RateLimited { .. } | ProviderError::Network { .. })
                | Self::State(StateError::LockFailed { .. })
        )
    }

    /// Returns the suggested retry delay in seconds, if applicable.
    #[must_use]
    pub const fn retry_delay_secs(&self) -> Option<u64> {
        match self {
            Self::Provider(ProviderError::RateLimited { retry_after_secs }) => {
                Some(*retry_after_secs)
            }
            Self::Provider(ProviderError::Network { .. }) => Some(5),
            Self::State(StateError::LockFailed { .. }) => Some(2),
            _ => None,
        }
    }

    /// Returns true if the provider reported the resource as missing.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::Provider(ProviderError::NotFound { .. }))
    }

    /// Returns the resource identifiers this error names, if any.
    #[must_use]
    pub fn resource_ids(&self) -> Vec<String> {
        match self {
            Self::Graph(
                GraphError::DuplicateId { id }
                | GraphError::SelfReference { id }
                | GraphError::InvalidId { id, .. },
            ) => vec![id.clone()],
            Self::Graph(GraphError::UnknownReference { from, target }) => {
                vec![from.clone(), target.clone()]
            }
            Self::Graph(GraphError::CyclicDependency { cycle }) => {
                let mut ids = cycle.clone();
                ids.dedup();
                if ids.len() > 1 && ids.first() == ids.last() {
                    ids.pop();
                }
                ids
            }
            Self::Plan(PlanError::UnsafeReplace {
                resource,
                dependents,
            }) => {
                let mut ids = vec![resource.clone()];
                ids.extend(dependents.iter().cloned());
                ids
            }
            Self::Apply(ApplyError::PartialApply { resource, .. }) => vec![resource.clone()],
            Self::Apply(ApplyError::UnresolvedReference {
                resource, target, ..
            }) => vec![resource.clone(), target.clone()],
            _ => vec![],
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
}

impl StateError {
    /// Creates an S3 error with the given message.
    #[must_use]
    pub fn s3(message: impl Into<String>) -> Self {
        Self::S3Error {
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

    /// Creates a write error with the given message.
    #[must_use]
    pub fn write(message: impl Into<String>) -> Self {
        Self::WriteFailed {
            message: message.into(),
        }
    }
}

impl ProviderError {
    /// Creates an API request error.
    #[must_use]
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiRequestFailed {
            status,
            message: message.into(),
        }
    }

    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_names_members() {
        let err = StackformError::from(GraphError::CyclicDependency {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        });
        assert!(err.to_string().contains("a -> b -> a"));
        assert_eq!(err.resource_ids(), vec!["a", "b"]);
    }

    #[test]
    fn test_unsafe_replace_names_resources() {
        let err = StackformError::from(PlanError::UnsafeReplace {
            resource: String::from("vpc"),
            dependents: vec![String::from("subnet")],
        });
        assert_eq!(err.resource_ids(), vec!["vpc", "subnet"]);
        assert!(err.to_string().contains("still referenced by subnet"));
    }

    #[test]
    fn test_retryable() {
        assert!(StackformError::from(ProviderError::network("reset")).is_retryable());
        assert!(!StackformError::from(ProviderError::api_error(500, "boom")).is_retryable());
        assert_eq!(
            StackformError::from(ProviderError::RateLimited {
                retry_after_secs: 7
            })
            .retry_delay_secs(),
            Some(7)
        );
    }
}
