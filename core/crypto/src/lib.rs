//! Cryptographic primitives for offcache.
//!
//! This module provides:
//! - Key derivation using Argon2id
//! - Authenticated encryption of cached rows using XChaCha20-Poly1305
//! - Key types with automatic zeroization
//! - Password verifiers for offline login
//!
//! # Security Guarantees
//! - All key material is automatically zeroized on drop
//! - No plaintext or key material is ever logged

pub mod aead;
pub mod kdf;
pub mod keys;

pub use aead::{open, seal};
pub use kdf::{derive_key, KdfParams, PasswordVerifier};
pub use keys::{DataKey, MasterKey, Salt};
