//! Tokio runtime management for FFI
//!
//! One multi-threaded runtime drives every blocking FFI call.

use std::future::Future;

use once_cell::sync::OnceCell;
use tokio::runtime::Runtime;

use crate::error::{FFIError, FFIResult};

static RUNTIME: OnceCell<Runtime> = OnceCell::new();

/// Get or create the global Tokio runtime.
pub fn get_runtime() -> FFIResult<&'static Runtime> {
    RUNTIME.get_or_try_init(|| {
        Runtime::new()
            .map_err(|e| FFIError::RuntimeError(format!("Failed to create Tokio runtime: {}", e)))
    })
}

/// Run `future` to completion on the global runtime.
pub fn block_on<F: Future>(future: F) -> FFIResult<F::Output> {
    Ok(get_runtime()?.block_on(future))
}
