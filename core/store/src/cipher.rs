//! Row sealing for password-protected caches.

use offcache_common::{Error, Result};
use offcache_crypto::{derive_key, open, seal, DataKey, KdfParams, Salt};

use crate::schema::{KEY_CHECK_CONTEXT, KEY_CHECK_PLAINTEXT};

/// Seals sensitive columns when the cache has a password; passes them
/// through unchanged otherwise.
#[derive(Debug, Clone, Default)]
pub struct PayloadCipher {
    key: Option<DataKey>,
}

impl PayloadCipher {
    pub fn plaintext() -> Self {
        Self { key: None }
    }

    /// Derive the row key for `password`.
    pub fn from_password(password: &str, salt: &Salt, params: &KdfParams) -> Result<Self> {
        let master = derive_key(password.as_bytes(), salt, params)?;
        Ok(Self {
            key: Some(master.derive_data_key(b"payload")),
        })
    }

    pub fn is_encrypted(&self) -> bool {
        self.key.is_some()
    }

    pub fn seal(&self, data: &[u8], context: &str) -> Result<Vec<u8>> {
        match &self.key {
            Some(key) => seal(key, data, context.as_bytes()),
            None => Ok(data.to_vec()),
        }
    }

    pub fn open(&self, data: &[u8], context: &str) -> Result<Vec<u8>> {
        match &self.key {
            Some(key) => open(key, data, context.as_bytes()),
            None => Ok(data.to_vec()),
        }
    }

    /// Sealed constant stored alongside the salt.
    pub(crate) fn key_check(&self) -> Result<Vec<u8>> {
        match &self.key {
            Some(key) => seal(key, KEY_CHECK_PLAINTEXT, KEY_CHECK_CONTEXT),
            None => Err(Error::InvalidState(
                "Plaintext cache has no key check".to_string(),
            )),
        }
    }

    /// Whether `sealed` is the key check of this key.
    pub(crate) fn verify_key_check(&self, sealed: &[u8]) -> bool {
        match &self.key {
            Some(key) => open(key, sealed, KEY_CHECK_CONTEXT)
                .map(|plain| plain == KEY_CHECK_PLAINTEXT)
                .unwrap_or(false),
            None => false,
        }
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
    fn test_plaintext_passthrough() {
        let cipher = PayloadCipher::plaintext();
        assert_eq!(cipher.seal(b"abc", "t/1").unwrap(), b"abc");
        assert_eq!(cipher.open(b"abc", "t/1").unwrap(), b"abc");
        assert!(cipher.key_check().is_err());
    }

    #[test]
    fn test_key_check() {
        let salt = Salt::generate();
        let right = PayloadCipher::from_password("pw", &salt, &cheap()).unwrap();
        let wrong = PayloadCipher::from_password("other", &salt, &cheap()).unwrap();

        let check = right.key_check().unwrap();
        assert!(right.verify_key_check(&check));
        assert!(!wrong.verify_key_check(&check));
        assert!(!PayloadCipher::plaintext().verify_key_check(&check));
    }

    #[test]
    fn test_context_bound() {
        let salt = Salt::generate();
        let cipher = PayloadCipher::from_password("pw", &salt, &cheap()).unwrap();
        let sealed = cipher.seal(b"{}", "obj_a/1").unwrap();
        assert!(cipher.open(&sealed, "obj_a/2").is_err());
        assert_eq!(cipher.open(&sealed, "obj_a/1").unwrap(), b"{}");
    }
}
