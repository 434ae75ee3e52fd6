//! FFI error handling
//!
//! Thread-local error storage for FFI functions.

use std::cell::RefCell;
use std::fmt;

use offcache_app::Error;
use offcache_common::ErrorCategory;

use crate::types::FFIStatus;

/// FFI-specific errors
#[derive(Debug, Clone)]
pub enum FFIError {
    /// Null pointer passed to FFI function
    NullPointer(String),
    /// Invalid UTF-8 in string parameter
    InvalidUtf8(String),
    /// Malformed JSON argument
    InvalidJson(String),
    /// Runtime initialization error
    RuntimeError(String),
    /// String conversion error
    StringConversionError,
    /// Arbiter rejection
    Locked(String),
    /// Remote gateway error
    Remote(String),
    /// Local store error, including authentication
    LocalStore(String),
    /// Missing precondition
    InvalidState(String),
    /// Any other cache error
    Cache(String),
}

impl FFIError {
    /// Status code reported to the host.
    pub fn status(&self) -> FFIStatus {
        match self {
            FFIError::NullPointer(_)
            | FFIError::InvalidUtf8(_)
            | FFIError::InvalidJson(_)
            | FFIError::StringConversionError => FFIStatus::InvalidArgument,
            FFIError::RuntimeError(_) => FFIStatus::Runtime,
            FFIError::Locked(_) => FFIStatus::Locked,
            FFIError::Remote(_) => FFIStatus::Remote,
            FFIError::LocalStore(_) => FFIStatus::LocalStore,
            FFIError::InvalidState(_) => FFIStatus::InvalidState,
            FFIError::Cache(_) => FFIStatus::Failed,
        }
    }
}

impl fmt::Display for FFIError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FFIError::NullPointer(msg) => write!(f, "Null pointer: {}", msg),
            FFIError::InvalidUtf8(param) => write!(f, "Invalid UTF-8 in parameter: {}", param),
            FFIError::InvalidJson(msg) => write!(f, "Invalid JSON: {}", msg),
            FFIError::RuntimeError(msg) => write!(f, "Runtime error: {}", msg),
            FFIError::StringConversionError => write!(f, "String conversion error"),
            FFIError::Locked(msg)
            | FFIError::Remote(msg)
            | FFIError::LocalStore(msg)
            | FFIError::InvalidState(msg)
            | FFIError::Cache(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for FFIError {}

impl From<Error> for FFIError {
    fn from(e: Error) -> Self {
        let msg = e.to_string();
        match e.category() {
            ErrorCategory::Locked => FFIError::Locked(msg),
            ErrorCategory::Remote => FFIError::Remote(msg),
            ErrorCategory::LocalStore => FFIError::LocalStore(msg),
            ErrorCategory::InvalidState => FFIError::InvalidState(msg),
            ErrorCategory::Other => FFIError::Cache(msg),
        }
    }
}

/// Result type for FFI operations
pub type FFIResult<T> = Result<T, FFIError>;

thread_local! {
    static LAST_ERROR: RefCell<Option<FFIError>> = const { RefCell::new(None) };
}

/// Set the last error for the current thread.
pub fn set_last_error(error: FFIError) {
    tracing::warn!("FFI call failed: {}", error);
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = Some(error);
    });
}

/// Take the last error from the current thread.
pub fn take_last_error() -> Option<FFIError> {
    LAST_ERROR.with(|e| e.borrow_mut().take())
}

/// Record `error` and return its status for the host.
pub fn fail(error: FFIError) -> FFIStatus {
    let status = error.status();
    set_last_error(error);
    status
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_errors_map_by_category() {
        let locked: FFIError = Error::Locked("sync in progress".into()).into();
        assert_eq!(locked.status(), FFIStatus::Locked);

        let auth: FFIError = Error::Authentication("wrong password".into()).into();
        assert_eq!(auth.status(), FFIStatus::LocalStore);

        let missing: FFIError = Error::NotFound("x".into()).into();
        assert_eq!(missing.status(), FFIStatus::Failed);
    }

    #[test]
    fn test_last_error_is_taken_once() {
        assert_eq!(
            fail(FFIError::NullPointer("handle".into())),
            FFIStatus::InvalidArgument
        );
        assert!(take_last_error().is_some());
        assert!(take_last_error().is_none());
    }
}
