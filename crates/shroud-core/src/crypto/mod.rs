//! Symmetric stream transform for store payloads and the manifest blob.
//!
//! The store's wire format is a keyed XOR stream: key bytes are cycled over
//! the buffer, so applying the same key twice is the identity. This provides
//! confidentiality only - there is no authentication tag, and corrupted
//! ciphertext decrypts to garbage without error.

use std::fmt;

use thiserror::Error;
use zeroize::Zeroizing;

/// Errors that can occur constructing a [`StoreKey`].
#[derive(Error, Debug, PartialEq, Eq)]
pub enum KeyError {
    /// A zero-length key would make the transform the identity for every
    /// payload, so it is rejected at construction.
    #[error("encryption key must not be empty")]
    Empty,
}

/// Key for the store's stream transform.
///
/// Key material is zeroized when the key is dropped, and the `Debug`
/// implementation redacts it to prevent accidental logging.
#[derive(Clone)]
pub struct StoreKey {
    bytes: Zeroizing<Vec<u8>>,
}

impl StoreKey {
    /// Create a key from raw bytes. The key may be shorter than the payloads
    /// it transforms; cycling wraps modulo the key length.
    pub fn new(bytes: Vec<u8>) -> Result<Self, KeyError> {
        if bytes.is_empty() {
            return Err(KeyError::Empty);
        }
        Ok(Self {
            bytes: Zeroizing::new(bytes),
        })
    }

    /// Create a key from a UTF-8 passphrase.
    pub fn from_passphrase(passphrase: &str) -> Result<Self, KeyError> {
        Self::new(passphrase.as_bytes().to_vec())
    }

    /// Apply the keyed XOR stream to `data` in place.
    ///
    /// Self-inverse: applying the same key twice restores the original bytes.
    pub fn apply(&self, data: &mut [u8]) {
        let key = self.bytes.as_slice();
        for (i, byte) in data.iter_mut().enumerate() {
            *byte ^= key[i % key.len()];
        }
    }
}

impl fmt::Debug for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreKey")
            .field("bytes", &"[REDACTED]")
            .field("len", &self.bytes.len())
            .finish()
    }
}
