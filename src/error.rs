//! Error types for the tagsync reconciliation engine.
//!
//! This module provides the error hierarchy for every stage of a tag
//! reconciliation: building tag sets, talking to remote tagging backends,
//! applying diffs, and loading configuration.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for tagsync.
#[derive(Debug, Error)]
pub enum TagSyncError {
    /// Tag set construction errors.
    #[error("Tag error: {0}")]
    Tag(#[from] TagError),

    /// Remote tagging backend errors.
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    /// Reconciliation errors.
    #[error("Reconciliation error: {0}")]
    Reconcile(#[from] ReconcileError),

    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors raised while building a [`TagSet`](crate::tags::TagSet).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TagError {
    /// A declared value is not representable as a tag value.
    #[error("Tag '{key}' has a {kind} value, only strings are allowed")]
    InvalidTagKind {
        /// Key of the offending tag.
        key: String,
        /// Kind of value that was supplied.
        kind: &'static str,
    },

    /// A tag key is empty.
    #[error("Tag keys must not be empty")]
    InvalidTagKey,
}

/// Errors reported by a [`RemoteTagClient`](crate::client::RemoteTagClient).
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Authentication failed.
    #[error("Authentication failed: {message}")]
    AuthenticationFailed {
        /// Description of the auth failure.
        message: String,
    },

    /// API request failed.
    #[error("API request failed: {status} - {message}")]
    ApiRequestFailed {
        /// HTTP status code.
        status: u16,
        /// Error message from the API.
        message: String,
    },

    /// Rate limited.
    #[error("Rate limited, retry after {retry_after_secs} seconds")]
    RateLimited {
        /// Seconds to wait before retrying.
        retry_after_secs: u64,
    },

    /// The addressed resource does not exist.
    #[error("Resource not found: {identifier}")]
    ResourceNotFound {
        /// Identifier of the missing resource.
        identifier: String,
    },

    /// Network error.
    #[error("Network error: {message}")]
    NetworkError {
        /// Description of the network error.
        message: String,
    },

    /// Invalid response from the backend.
    #[error("Invalid response: {message}")]
    InvalidResponse {
        /// Description of the response issue.
        message: String,
    },

    /// Storage backend error (local file or object store).
    #[error("Storage error: {message}")]
    Storage {
        /// Description of the storage error.
        message: String,
    },

    /// The operation was cancelled through its context.
    #[error("Operation cancelled")]
    Cancelled,

    /// The context deadline passed before the call completed.
    #[error("Deadline exceeded")]
    DeadlineExceeded,
}

/// Which step of a reconciliation a remote call belonged to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Removing tags that are no longer declared.
    Remove,
    /// Adding new tags or updating changed values.
    Upsert,
}

/// Reconciliation errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A remote call failed. When the phase is `Upsert` the removal already
    /// went through, so the resource may be partially converged.
    #[error("{phase} failed for resource ({identifier}): {cause}")]
    RemoteCallFailed {
        /// Step that failed.
        phase: Phase,
        /// Resource identifier.
        identifier: String,
        /// Error reported by the client.
        #[source]
        cause: RemoteError,
    },
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

    /// A resource selected on the command line is not configured.
    #[error("Resource not found in configuration: {identifier}")]
    UnknownResource {
        /// The requested identifier.
        identifier: String,
    },
}

/// Result type alias for tagsync operations.
pub type Result<T> = std::result::Result<T, TagSyncError>;

/// Result type alias for remote client calls.
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

impl TagSyncError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns the failed phase if this is a remote call failure.
    #[must_use]
    pub const fn phase(&self) -> Option<Phase> {
        match self {
            Self::Reconcile(ReconcileError::RemoteCallFailed { phase, .. }) => Some(*phase),
            _ => None,
        }
    }
}

impl RemoteError {
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
        Self::NetworkError {
            message: message.into(),
        }
    }

    /// Creates a storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::NetworkError { .. } => true,
            Self::ApiRequestFailed { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns the suggested retry delay in seconds, if applicable.
    #[must_use]
    pub const fn retry_delay_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            Self::NetworkError { .. } => Some(1),
            Self::ApiRequestFailed { status, .. } if *status >= 500 => Some(1),
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

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remove => write!(f, "untagging"),
            Self::Upsert => write!(f, "tagging"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_call_failed_message() {
        let err = TagSyncError::from(ReconcileError::RemoteCallFailed {
            phase: Phase::Remove,
            identifier: String::from("arn:aws:dx:us-east-1:123:dxcon/abc"),
            cause: RemoteError::network("connection reset"),
        });

        assert_eq!(err.phase(), Some(Phase::Remove));
        assert!(err.to_string().contains("untagging failed for resource"));
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn test_retryable_errors() {
        assert!(RemoteError::network("reset").is_retryable());
        assert!(RemoteError::RateLimited { retry_after_secs: 3 }.is_retryable());
        assert!(RemoteError::api_error(503, "unavailable").is_retryable());
        assert!(!RemoteError::api_error(400, "bad request").is_retryable());
        assert!(!RemoteError::Cancelled.is_retryable());

        assert_eq!(
            RemoteError::RateLimited { retry_after_secs: 3 }.retry_delay_secs(),
            Some(3)
        );
        assert_eq!(RemoteError::DeadlineExceeded.retry_delay_secs(), None);
    }
}
