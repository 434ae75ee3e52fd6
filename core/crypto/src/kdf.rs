//! Key derivation using Argon2id.
//!
//! Used twice: to turn the cache password into a [`MasterKey`], and to build
//! [`PasswordVerifier`]s that let a user log in offline without the password
//! ever being stored.

use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::keys::{MasterKey, Salt, KEY_LENGTH};
use offcache_common::{Error, Result};

/// Parameters for Argon2id key derivation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB (e.g., 65536 = 64 MiB).
    pub memory_cost: u32,
    /// Number of iterations.
    pub time_cost: u32,
    /// Degree of parallelism.
    pub parallelism: u32,
}

impl KdfParams {
    /// Parameters for desktop-class hardware.
    pub fn interactive() -> Self {
        Self {
            memory_cost: 65536, // 64 MiB
            time_cost: 3,
            parallelism: 4,
        }
    }

    /// Moderate parameters for mobile devices.
    pub fn moderate() -> Self {
        Self {
            memory_cost: 32768, // 32 MiB
            time_cost: 3,
            parallelism: 2,
        }
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::moderate()
    }
}

/// Derive a master key from a password and salt using Argon2id.
///
/// # Errors
/// - Returns error if password is empty
/// - Returns error if Argon2id parameters are invalid
pub fn derive_key(password: &[u8], salt: &Salt, params: &KdfParams) -> Result<MasterKey> {
    if password.is_empty() {
        return Err(Error::InvalidInput("Password cannot be empty".to_string()));
    }

    let argon2_params = Params::new(
        params.memory_cost,
        params.time_cost,
        params.parallelism,
        Some(KEY_LENGTH),
    )
    .map_err(|e| Error::Crypto(format!("Invalid KDF parameters: {}", e)))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut key_bytes = [0u8; KEY_LENGTH];
    argon2
        .hash_password_into(password, salt.as_bytes(), &mut key_bytes)
        .map_err(|e| Error::Crypto(format!("Key derivation failed: {}", e)))?;

    Ok(MasterKey::from_bytes(key_bytes))
}

/// Stored proof of a password, checkable without keeping the password.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasswordVerifier {
    salt: Salt,
    params: KdfParams,
    digest: [u8; KEY_LENGTH],
}

impl PasswordVerifier {
    /// Build a verifier for `password` with a fresh salt.
    pub fn create(password: &[u8], params: &KdfParams) -> Result<Self> {
        let salt = Salt::generate();
        let key = derive_key(password, &salt, params)?;
        Ok(Self {
            salt,
            params: params.clone(),
            digest: *key.as_bytes(),
        })
    }

    /// Check `password` against this verifier in constant time.
    pub fn verify(&self, password: &[u8]) -> Result<bool> {
        if password.is_empty() {
            return Ok(false);
        }
        let derived = derive_key(password, &self.salt, &self.params)?;
        Ok(derived.as_bytes()[..].ct_eq(&self.digest[..]).into())
    }

    /// Serialize for storage.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize from storage.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cheap() -> KdfParams {
        KdfParams {
            memory_cost: 1024,
            time_cost: 1,
            parallelism: 1,
        }
    }

    #[test]
    fn test_derive_key_deterministic() {
        let salt = Salt::from_bytes([42u8; 32]);
        let key1 = derive_key(b"test-password-123", &salt, &cheap()).unwrap();
        let key2 = derive_key(b"test-password-123", &salt, &cheap()).unwrap();
        assert_eq!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_derive_key_different_salt() {
        let key1 = derive_key(b"pw", &Salt::from_bytes([1u8; 32]), &cheap()).unwrap();
        let key2 = derive_key(b"pw", &Salt::from_bytes([2u8; 32]), &cheap()).unwrap();
        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_derive_key_empty_password_fails() {
        assert!(derive_key(b"", &Salt::generate(), &cheap()).is_err());
    }

    #[test]
    fn test_password_verifier() {
        let verifier = PasswordVerifier::create(b"hunter2", &cheap()).unwrap();
        assert!(verifier.verify(b"hunter2").unwrap());
        assert!(!verifier.verify(b"hunter3").unwrap());
        assert!(!verifier.verify(b"").unwrap());
    }

    #[test]
    fn test_password_verifier_bytes() {
        let verifier = PasswordVerifier::create(b"hunter2", &cheap()).unwrap();
        let restored = PasswordVerifier::from_bytes(&verifier.to_bytes().unwrap()).unwrap();
        assert!(restored.verify(b"hunter2").unwrap());
    }
}
