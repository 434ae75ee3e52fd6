//! Key types with secure memory handling.
//!
//! All key types zeroize their memory on drop.

use chacha20poly1305::aead::{rand_core::RngCore, OsRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of encryption keys in bytes (256-bit).
pub const KEY_LENGTH: usize = 32;

/// Length of KDF salts in bytes.
pub const SALT_LENGTH: usize = 32;

/// Key derived from the cache password. Never used to encrypt directly;
/// purpose-specific [`DataKey`]s are derived from it.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    key: [u8; KEY_LENGTH],
}

impl MasterKey {
    /// Create a master key from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Get the key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }

    /// Derive a key for one purpose (e.g. `b"payload"`).
    ///
    /// Uses blake2b keyed on the master key; distinct purposes yield
    /// independent keys.
    pub fn derive_data_key(&self, purpose: &[u8]) -> DataKey {
        use blake2::digest::consts::U32;
        use blake2::{Blake2b, Digest};

        let mut hasher = Blake2b::<U32>::new();
        hasher.update(self.key);
        hasher.update(purpose);
        hasher.update(b"offcache-data-key");

        let result = hasher.finalize();
        let mut derived = [0u8; KEY_LENGTH];
        derived.copy_from_slice(&result);
        DataKey::from_bytes(derived)
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MasterKey([REDACTED])")
    }
}

/// Key used to seal cached rows.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DataKey {
    key: [u8; KEY_LENGTH],
}

impl DataKey {
    /// Create a data key from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Get the key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }
}

impl fmt::Debug for DataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DataKey([REDACTED])")
    }
}

/// Salt for key derivation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Salt(pub [u8; SALT_LENGTH]);

impl Salt {
    /// Generate a random salt.
    pub fn generate() -> Self {
        let mut salt = [0u8; SALT_LENGTH];
        OsRng.fill_bytes(&mut salt);
        Self(salt)
    }

    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; SALT_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Create from a slice read back from storage.
    pub fn from_slice(bytes: &[u8]) -> offcache_common::Result<Self> {
        let array: [u8; SALT_LENGTH] = bytes.try_into().map_err(|_| {
            offcache_common::Error::Crypto(format!(
                "Invalid salt length: expected {}, got {}",
                SALT_LENGTH,
                bytes.len()
            ))
        })?;
        Ok(Self(array))
    }

    /// Get the salt bytes.
    pub fn as_bytes(&self) -> &[u8; SALT_LENGTH] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_data_key() {
        let master = MasterKey::from_bytes([1u8; KEY_LENGTH]);

        let key1 = master.derive_data_key(b"payload");
        let key2 = master.derive_data_key(b"payload");
        assert_eq!(key1.as_bytes(), key2.as_bytes());

        let key3 = master.derive_data_key(b"login");
        assert_ne!(key1.as_bytes(), key3.as_bytes());
    }

    #[test]
    fn test_salt_generate() {
        let salt1 = Salt::generate();
        let salt2 = Salt::generate();
        assert_ne!(salt1.as_bytes(), salt2.as_bytes());
    }

    #[test]
    fn test_salt_from_slice() {
        let salt = Salt::generate();
        let restored = Salt::from_slice(salt.as_bytes()).unwrap();
        assert_eq!(salt, restored);
        assert!(Salt::from_slice(&[0u8; 7]).is_err());
    }

    #[test]
    fn test_debug_redacted() {
        let key = MasterKey::from_bytes([9u8; KEY_LENGTH]);
        assert_eq!(format!("{:?}", key), "MasterKey([REDACTED])");
    }
}
