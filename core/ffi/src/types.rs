//! FFI-safe types
//!
//! Types that can cross the FFI boundary safely.

use std::ffi::c_int;

use offcache_app::OfflineCache;

/// Internal cache handle data (opaque to C code)
pub struct CacheHandleData {
    pub(crate) cache: OfflineCache,
}

/// Opaque handle to an open cache
///
/// C code should treat this as an opaque pointer and release it with
/// `offcache_close`.
pub type FFICacheHandle = CacheHandleData;

/// Status returned by every FFI call that does not return a pointer.
///
/// Negative values are failures; `offcache_last_error` has the message.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FFIStatus {
    Ok = 0,
    /// Null pointer, bad UTF-8 or malformed JSON argument.
    InvalidArgument = -1,
    /// The async runtime could not be started.
    Runtime = -2,
    /// A sync holds the cache; retry later.
    Locked = -3,
    /// The server rejected a request.
    Remote = -4,
    /// Store failure or wrong cache password.
    LocalStore = -5,
    /// The cache is closed or was cleared underneath the caller.
    InvalidState = -6,
    /// Any other failure.
    Failed = -7,
}

impl From<FFIStatus> for c_int {
    fn from(status: FFIStatus) -> Self {
        status as c_int
    }
}
