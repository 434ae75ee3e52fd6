//! Common utilities and types shared across offcache modules.
//!
//! This module provides the error taxonomy and the validated identifiers
//! used throughout the codebase.

pub mod error;
pub mod types;

pub use error::{Error, ErrorCategory, Result};
pub use types::{BucketName, ObjectId, SecretString};
