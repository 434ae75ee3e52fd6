//! Authenticated encryption of cached rows using XChaCha20-Poly1305.
//!
//! Every sealed value is bound to a context string (table and row id) through
//! the associated data, so a ciphertext copied into another row fails to open.

use chacha20poly1305::{
    aead::{generic_array::GenericArray, Aead, AeadCore, KeyInit, OsRng, Payload},
    XChaCha20Poly1305,
};

use crate::keys::DataKey;
use offcache_common::{Error, Result};

/// Nonce size for XChaCha20-Poly1305 (24 bytes).
pub const NONCE_SIZE: usize = 24;

/// Authentication tag size (16 bytes).
pub const TAG_SIZE: usize = 16;

/// Seal `plaintext` under `key`, bound to `context`.
///
/// # Postconditions
/// - Returns nonce || ciphertext || tag
/// - The nonce is randomly generated
pub fn seal(key: &DataKey, plaintext: &[u8], context: &[u8]) -> Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(GenericArray::from_slice(key.as_bytes()));
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext,
                aad: context,
            },
        )
        .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))?;

    let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Open a value produced by [`seal`] with the same key and context.
///
/// # Errors
/// - Input shorter than nonce + tag
/// - Authentication failure (wrong key, wrong context, or tampered data)
pub fn open(key: &DataKey, sealed: &[u8], context: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < NONCE_SIZE + TAG_SIZE {
        return Err(Error::Crypto("Ciphertext too short".to_string()));
    }

    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_SIZE);
    let cipher = XChaCha20Poly1305::new(GenericArray::from_slice(key.as_bytes()));

    cipher
        .decrypt(
            GenericArray::from_slice(nonce_bytes),
            Payload {
                msg: ciphertext,
                aad: context,
            },
        )
        .map_err(|e| Error::Crypto(format!("Decryption failed: {}", e)))
}
