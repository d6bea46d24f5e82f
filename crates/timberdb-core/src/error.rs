use thiserror::Error;

/// Canonical error type for all TimberDB operations.
///
/// Each variant corresponds to one caller-visible error kind. Storage-layer
/// failures are wrapped with operation context before crossing a crate
/// boundary; backing-store messages never leak into validation or conflict
/// payloads.
#[derive(Debug, Error)]
pub enum TimberError {
    /// Malformed input, unknown operator, or empty required field.
    #[error("validation error: {message}")]
    Validation {
        /// Human-readable description of the invalid input.
        message: String,
    },

    /// Entity was not found.
    #[error("{entity} `{id}` was not found")]
    NotFound {
        /// Entity type name (e.g. `"branch"`).
        entity: &'static str,
        /// Identifier of the missing entity.
        id: String,
    },

    /// Duplicate name, live children, or another state conflict.
    #[error("conflict: {message}")]
    Conflict {
        /// Human-readable conflict description.
        message: String,
    },

    /// LSN or timestamp outside the valid range, or a monotonicity violation.
    #[error("out of range: {message}")]
    OutOfRange {
        /// Human-readable range violation description.
        message: String,
    },

    /// Storage backpressure; retrying with backoff is appropriate.
    #[error("busy: {message}")]
    Busy {
        /// What resource is saturated.
        message: String,
    },

    /// Underlying store failure; may be retryable.
    #[error("storage error in {context}: {message}")]
    Storage {
        /// Operation context (component, branch, LSN).
        context: String,
        /// Underlying failure description.
        message: String,
    },

    /// Ambient cancellation was signaled.
    #[error("operation canceled")]
    Canceled,

    /// Invariant violation; non-retryable, report as a bug.
    #[error("internal error: {message}")]
    Internal {
        /// Details for debugging purposes.
        message: String,
    },

    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization failed (corrupt or truncated data).
    #[error("deserialization error: {0}")]
    Deserialization(String),
}

impl TimberError {
    /// Creates a `Validation` variant.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a `NotFound` variant.
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Creates a `Conflict` variant.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates an `OutOfRange` variant.
    #[must_use]
    pub fn out_of_range(message: impl Into<String>) -> Self {
        Self::OutOfRange {
            message: message.into(),
        }
    }

    /// Creates a `Busy` variant.
    #[must_use]
    pub fn busy(message: impl Into<String>) -> Self {
        Self::Busy {
            message: message.into(),
        }
    }

    /// Creates a `Storage` variant carrying operation context.
    #[must_use]
    pub fn storage(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Storage {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Creates an `Internal` variant.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` for errors where a retry with backoff may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Busy { .. } | Self::Storage { .. })
    }

    /// Stable lowercase tag for metrics labels and logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::NotFound { .. } => "not_found",
            Self::Conflict { .. } => "conflict",
            Self::OutOfRange { .. } => "out_of_range",
            Self::Busy { .. } => "busy",
            Self::Storage { .. } => "storage",
            Self::Canceled => "canceled",
            Self::Internal { .. } => "internal",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
            Self::Deserialization(_) => "deserialization",
        }
    }
}

impl From<serde_json::Error> for TimberError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_eof() || err.is_syntax() || err.is_data() {
            Self::Deserialization(err.to_string())
        } else {
            Self::Serialization(err.to_string())
        }
    }
}

impl From<bincode::Error> for TimberError {
    fn from(err: bincode::Error) -> Self {
        Self::Deserialization(err.to_string())
    }
}

/// Convenient result alias for TimberDB operations.
pub type TimberResult<T> = Result<T, TimberError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(TimberError::validation("x").kind(), "validation");
        assert_eq!(TimberError::not_found("branch", "b1").kind(), "not_found");
        assert_eq!(TimberError::Canceled.kind(), "canceled");
    }

    #[test]
    fn test_retryable() {
        assert!(TimberError::busy("append queue full").is_retryable());
        assert!(TimberError::storage("wal append", "disk full").is_retryable());
        assert!(!TimberError::validation("bad filter").is_retryable());
        assert!(!TimberError::Canceled.is_retryable());
    }

    #[test]
    fn test_display_carries_context() {
        let err = TimberError::storage("wal append lsn=42", "fsync failed");
        let text = err.to_string();
        assert!(text.contains("wal append lsn=42"));
        assert!(text.contains("fsync failed"));
    }
}
