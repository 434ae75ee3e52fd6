//! Common types used throughout offcache.

use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroize;

/// Name of a bucket, local and remote.
///
/// Bucket names double as part of SQLite table names, so the character set is
/// restricted to ASCII letters, digits, `_` and `-`, 2 to 64 characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BucketName(String);

impl BucketName {
    /// Create a new BucketName.
    ///
    /// # Errors
    /// - Returns error if the name is too short, too long, or contains
    ///   characters outside `[A-Za-z0-9_-]`
    pub fn new(name: impl Into<String>) -> crate::Result<Self> {
        let name = name.into();
        if name.len() < 2 || name.len() > 64 {
            return Err(crate::Error::InvalidInput(format!(
                "Bucket name must be 2-64 characters: {:?}",
                name
            )));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(crate::Error::InvalidInput(format!(
                "Bucket name contains invalid characters: {:?}",
                name
            )));
        }
        Ok(Self(name))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for BucketName {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::new(value)
    }
}

impl From<BucketName> for String {
    fn from(value: BucketName) -> Self {
        value.0
    }
}

impl fmt::Display for BucketName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a document within a bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectId(String);

impl ObjectId {
    /// Create an ObjectId from a string.
    ///
    /// # Errors
    /// - Returns error if id is empty, longer than 100 bytes, or contains
    ///   control characters or `/`
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        if id.is_empty() || id.len() > 100 {
            return Err(crate::Error::InvalidInput(
                "Object id must be 1-100 bytes".to_string(),
            ));
        }
        if id.chars().any(|c| c.is_control() || c == '/') {
            return Err(crate::Error::InvalidInput(format!(
                "Object id contains invalid characters: {:?}",
                id
            )));
        }
        Ok(Self(id))
    }

    /// Generate a fresh random id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ObjectId {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::new(value)
    }
}

impl From<ObjectId> for String {
    fn from(value: ObjectId) -> Self {
        value.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Secret string (session tokens, passwords) that zeroizes on drop.
#[derive(Clone, PartialEq, Eq, Zeroize)]
#[zeroize(drop)]
pub struct SecretString(String);

impl SecretString {
    /// Wrap a secret.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the secret. Use immediately, do not store the borrow.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretString([REDACTED; {} bytes])", self.0.len())
    }
}
