//! FFI bindings for the offcache core
//!
//! This module provides C-ABI compatible functions for mobile platforms (iOS/Android).
//! Documents, queries and configuration cross the boundary as JSON strings.
//! Functions returning `c_int` return an `FFIStatus`; functions returning a
//! pointer return null on failure. Either way the message is available from
//! `offcache_last_error` on the same thread.

#![allow(clippy::missing_safety_doc)]

pub mod cache_ops;
pub mod error;
pub mod runtime;
pub mod types;

use std::ffi::{c_char, c_int, CStr, CString};
use std::ptr;

use tracing_subscriber::EnvFilter;

use crate::error::{fail, FFIError, FFIResult};
use crate::runtime::get_runtime;
use crate::types::{FFICacheHandle, FFIStatus};

/// Read a required string argument.
unsafe fn required_str<'a>(ptr: *const c_char, name: &str) -> FFIResult<&'a str> {
    if ptr.is_null() {
        return Err(FFIError::NullPointer(format!("{} is null", name)));
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map_err(|_| FFIError::InvalidUtf8(name.to_string()))
}

/// Read an optional string argument; null means absent.
unsafe fn optional_str<'a>(ptr: *const c_char, name: &str) -> FFIResult<Option<&'a str>> {
    if ptr.is_null() {
        Ok(None)
    } else {
        required_str(ptr, name).map(Some)
    }
}

unsafe fn handle_ref<'a>(handle: *const FFICacheHandle) -> FFIResult<&'a FFICacheHandle> {
    handle
        .as_ref()
        .ok_or_else(|| FFIError::NullPointer("handle is null".into()))
}

fn into_c_string(result: FFIResult<String>) -> *mut c_char {
    match result.and_then(|s| CString::new(s).map_err(|_| FFIError::StringConversionError)) {
        Ok(s) => s.into_raw(),
        Err(e) => {
            fail(e);
            ptr::null_mut()
        }
    }
}

fn into_status(result: FFIResult<()>) -> c_int {
    match result {
        Ok(()) => FFIStatus::Ok.into(),
        Err(e) => fail(e).into(),
    }
}

/// Initialize logging and the async runtime. Call once before anything else.
///
/// Log filtering follows `RUST_LOG`, defaulting to `info`.
#[no_mangle]
pub extern "C" fn offcache_init() -> c_int {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    match get_runtime() {
        Ok(_) => {
            tracing::info!("offcache FFI initialized");
            FFIStatus::Ok.into()
        }
        Err(e) => fail(e).into(),
    }
}

/// Get the version of the offcache library.
///
/// # Safety
/// Returns a pointer to a static string. Do not free.
#[no_mangle]
pub extern "C" fn offcache_version() -> *const c_char {
    static VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "\0");
    VERSION.as_ptr() as *const c_char
}

/// Open (or create) a cache and enable offline mode.
///
/// # Safety
/// - `config_json` must be a valid null-terminated UTF-8 JSON string
/// - `password` may be null for an unencrypted cache
/// - Returns a handle that must be released with `offcache_close`
#[no_mangle]
pub unsafe extern "C" fn offcache_open(
    config_json: *const c_char,
    password: *const c_char,
) -> *mut FFICacheHandle {
    let result = required_str(config_json, "config_json").and_then(|config| {
        let password = optional_str(password, "password")?;
        cache_ops::open_cache(config, password)
    });
    match result {
        Ok(handle) => Box::into_raw(Box::new(handle)),
        Err(e) => {
            fail(e);
            ptr::null_mut()
        }
    }
}

/// Close a cache and free its handle.
///
/// # Safety
/// - `handle` must come from `offcache_open` and is invalid afterwards
#[no_mangle]
pub unsafe extern "C" fn offcache_close(handle: *mut FFICacheHandle) -> c_int {
    if handle.is_null() {
        return fail(FFIError::NullPointer("handle is null".into())).into();
    }
    let handle = Box::from_raw(handle);
    into_status(cache_ops::close_cache(&handle))
}

/// Create a document. `id` may be null to generate one.
///
/// # Safety
/// - `handle` must be a valid cache handle
/// - `bucket` and `payload_json` must be valid null-terminated UTF-8 strings
/// - Returns the stored object as JSON; free it with `offcache_string_free`
#[no_mangle]
pub unsafe extern "C" fn offcache_bucket_create(
    handle: *const FFICacheHandle,
    bucket: *const c_char,
    id: *const c_char,
    payload_json: *const c_char,
) -> *mut c_char {
    into_c_string((|| {
        let handle = handle_ref(handle)?;
        let bucket = required_str(bucket, "bucket")?;
        let id = optional_str(id, "id")?;
        let payload = required_str(payload_json, "payload_json")?;
        cache_ops::create(handle, bucket, id, payload)
    })())
}

/// Read a live document.
///
/// # Safety
/// - `handle` must be a valid cache handle
/// - `bucket` and `id` must be valid null-terminated UTF-8 strings
/// - Returned string must be freed with `offcache_string_free`
#[no_mangle]
pub unsafe extern "C" fn offcache_bucket_read(
    handle: *const FFICacheHandle,
    bucket: *const c_char,
    id: *const c_char,
) -> *mut c_char {
    into_c_string((|| {
        let handle = handle_ref(handle)?;
        let bucket = required_str(bucket, "bucket")?;
        let id = required_str(id, "id")?;
        cache_ops::read(handle, bucket, id)
    })())
}

/// Query a bucket. Returns a JSON array of objects.
///
/// # Safety
/// - `handle` must be a valid cache handle
/// - `bucket` and `query_json` must be valid null-terminated UTF-8 strings
/// - Returned string must be freed with `offcache_string_free`
#[no_mangle]
pub unsafe extern "C" fn offcache_bucket_query(
    handle: *const FFICacheHandle,
    bucket: *const c_char,
    query_json: *const c_char,
) -> *mut c_char {
    into_c_string((|| {
        let handle = handle_ref(handle)?;
        let bucket = required_str(bucket, "bucket")?;
        let query = required_str(query_json, "query_json")?;
        cache_ops::query(handle, bucket, query)
    })())
}

/// Replace a document's payload.
///
/// # Safety
/// - `handle` must be a valid cache handle
/// - `bucket`, `id` and `payload_json` must be valid null-terminated UTF-8 strings
/// - Returned string must be freed with `offcache_string_free`
#[no_mangle]
pub unsafe extern "C" fn offcache_bucket_update(
    handle: *const FFICacheHandle,
    bucket: *const c_char,
    id: *const c_char,
    payload_json: *const c_char,
) -> *mut c_char {
    into_c_string((|| {
        let handle = handle_ref(handle)?;
        let bucket = required_str(bucket, "bucket")?;
        let id = required_str(id, "id")?;
        let payload = required_str(payload_json, "payload_json")?;
        cache_ops::update(handle, bucket, id, payload)
    })())
}

/// Delete a document. A non-zero `soft` keeps a tombstone for the next sync.
///
/// # Safety
/// - `handle` must be a valid cache handle
/// - `bucket` and `id` must be valid null-terminated UTF-8 strings
#[no_mangle]
pub unsafe extern "C" fn offcache_bucket_delete(
    handle: *const FFICacheHandle,
    bucket: *const c_char,
    id: *const c_char,
    soft: c_int,
) -> c_int {
    into_status((|| {
        let handle = handle_ref(handle)?;
        let bucket = required_str(bucket, "bucket")?;
        let id = required_str(id, "id")?;
        cache_ops::delete(handle, bucket, id, soft != 0)
    })())
}

/// Re-encrypt the cache. A null or empty `new_password` removes encryption.
///
/// # Safety
/// - `handle` must be a valid cache handle
/// - `new_password` must be null or a valid null-terminated UTF-8 string
#[no_mangle]
pub unsafe extern "C" fn offcache_change_password(
    handle: *const FFICacheHandle,
    new_password: *const c_char,
) -> c_int {
    into_status((|| {
        let handle = handle_ref(handle)?;
        let new_password = optional_str(new_password, "new_password")?;
        cache_ops::change_password(handle, new_password)
    })())
}

/// Remove every cached object, login and pull mark.
///
/// # Safety
/// - `handle` must be a valid cache handle
#[no_mangle]
pub unsafe extern "C" fn offcache_delete_all(handle: *const FFICacheHandle) -> c_int {
    into_status(handle_ref(handle).and_then(cache_ops::delete_all))
}

/// Get the last error message.
///
/// # Safety
/// - Returned string must be freed with `offcache_string_free`
/// - Returns null if no error occurred
#[no_mangle]
pub extern "C" fn offcache_last_error() -> *mut c_char {
    error::take_last_error()
        .and_then(|e| CString::new(e.to_string()).ok())
        .map_or(ptr::null_mut(), CString::into_raw)
}

/// Free a string returned by an FFI function.
///
/// # Safety
/// - `s` must be a valid pointer returned by an offcache FFI function
/// - After this call, the pointer is invalid
#[no_mangle]
pub unsafe extern "C" fn offcache_string_free(s: *mut c_char) {
    if !s.is_null() {
        let _ = CString::from_raw(s);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn c(s: &str) -> CString {
        CString::new(s).unwrap()
    }

    unsafe fn take_string(ptr: *mut c_char) -> String {
        assert!(!ptr.is_null());
        let s = CStr::from_ptr(ptr).to_str().unwrap().to_string();
        offcache_string_free(ptr);
        s
    }

    #[test]
    fn test_version() {
        let version = unsafe { CStr::from_ptr(offcache_version()) };
        assert_eq!(version.to_str().unwrap(), env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_null_arguments_set_last_error() {
        let handle = unsafe { offcache_open(ptr::null(), ptr::null()) };
        assert!(handle.is_null());
        let message = unsafe { take_string(offcache_last_error()) };
        assert!(message.contains("config_json"));
        assert!(offcache_last_error().is_null());

        let status = unsafe { offcache_delete_all(ptr::null()) };
        assert_eq!(status, c_int::from(FFIStatus::InvalidArgument));
    }

    #[test]
    fn test_c_abi_session() {
        let dir = TempDir::new().unwrap();
        let config = serde_json::json!({
            "data_dir": dir.path(),
            "tenant_id": "acme",
            "app_id": "ffi",
            "kdf_params": {"memory_cost": 1024, "time_cost": 1, "parallelism": 1}
        })
        .to_string();

        unsafe {
            let handle = offcache_open(c(&config).as_ptr(), c("secret").as_ptr());
            assert!(!handle.is_null());

            let bucket = c("notes");
            let created = take_string(offcache_bucket_create(
                handle,
                bucket.as_ptr(),
                c("a").as_ptr(),
                c(r#"{"n": 1}"#).as_ptr(),
            ));
            assert!(created.contains("\"a\""));

            let missing = offcache_bucket_read(handle, bucket.as_ptr(), c("zz").as_ptr());
            assert!(missing.is_null());
            assert!(take_string(offcache_last_error()).contains("zz"));

            let status = offcache_bucket_delete(handle, bucket.as_ptr(), c("a").as_ptr(), 1);
            assert_eq!(status, 0);
            let listed = take_string(offcache_bucket_query(
                handle,
                bucket.as_ptr(),
                c(r#"{"filter": {}, "include_deleted": true}"#).as_ptr(),
            ));
            let listed: serde_json::Value = serde_json::from_str(&listed).unwrap();
            assert_eq!(listed.as_array().unwrap().len(), 1);

            assert_eq!(offcache_change_password(handle, ptr::null()), 0);
            assert_eq!(offcache_delete_all(handle), 0);
            assert_eq!(offcache_close(handle), 0);
        }
    }
}
