//! Common error types for offcache.

use thiserror::Error;

/// Top-level error type for offcache operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The concurrency arbiter rejected the operation. Retrying later is safe.
    #[error("Locked: {0}")]
    Locked(String),

    /// The remote gateway answered with a non-success status.
    #[error("Remote error (status {status})")]
    Remote {
        status: u16,
        body: Option<serde_json::Value>,
    },

    /// The embedded store rejected an operation.
    #[error("Local store error: {0}")]
    Store(String),

    /// The cache password is missing or wrong.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// A required precondition does not hold.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Cryptographic operation failed.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Operation not permitted.
    #[error("Not permitted: {0}")]
    NotPermitted(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),
}

/// Coarse classification callers use to pick a recovery strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Locked,
    Remote,
    LocalStore,
    InvalidState,
    Other,
}

impl Error {
    /// Classify this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Locked(_) => ErrorCategory::Locked,
            Error::Remote { .. } => ErrorCategory::Remote,
            Error::Store(_) | Error::Authentication(_) => ErrorCategory::LocalStore,
            Error::InvalidState(_) => ErrorCategory::InvalidState,
            _ => ErrorCategory::Other,
        }
    }

    /// True for arbiter rejections.
    pub fn is_locked(&self) -> bool {
        matches!(self, Error::Locked(_))
    }

    /// Status code of a remote error, if this is one.
    pub fn remote_status(&self) -> Option<u16> {
        match self {
            Error::Remote { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert_eq!(
            Error::Locked("busy".into()).category(),
            ErrorCategory::Locked
        );
        assert_eq!(
            Error::Remote {
                status: 409,
                body: None
            }
            .category(),
            ErrorCategory::Remote
        );
        assert_eq!(
            Error::Authentication("wrong password".into()).category(),
            ErrorCategory::LocalStore
        );
        assert_eq!(
            Error::InvalidState("no scope".into()).category(),
            ErrorCategory::InvalidState
        );
        assert_eq!(
            Error::NotFound("x".into()).category(),
            ErrorCategory::Other
        );
    }

    #[test]
    fn test_remote_status() {
        let err = Error::Remote {
            status: 404,
            body: Some(serde_json::json!({"errorCode": "OBJECT_NOT_FOUND"})),
        };
        assert_eq!(err.remote_status(), Some(404));
        assert!(!err.is_locked());
        assert_eq!(err.to_string(), "Remote error (status 404)");
    }
}
