//! Secret obfuscation at rest.
//!
//! Values are sealed with AES-128-GCM under a random nonce and stored as
//! standard base64 of `nonce || ciphertext`. Stored text that is already
//! valid JSON was never obfuscated (a value exported by hand, say) and is
//! revealed unchanged.

use std::fmt;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes128Gcm, Key, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::Rng;
use serde::de::IgnoredAny;

use crate::error::{Error, Result};

/// Key length in bytes.
pub const KEY_LEN: usize = 16;

const NONCE_LEN: usize = 12;

/// Used when no key is configured. Keeps values out of plain sight only.
const DEFAULT_KEY: &[u8; KEY_LEN] = b"obfuscatesecrets";

/// Seals and opens stored secret values.
#[derive(Clone)]
pub struct Obfuscator {
    cipher: Aes128Gcm,
}

impl Obfuscator {
    /// An obfuscator keyed by `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] unless `key` is [`KEY_LEN`] bytes.
    pub fn new(key: &[u8]) -> Result<Self> {
        let cipher = Aes128Gcm::new_from_slice(key).map_err(|_| {
            Error::invalid(format!(
                "secret key must be {KEY_LEN} bytes, got {}",
                key.len()
            ))
        })?;
        Ok(Self { cipher })
    }

    /// Seals `plaintext`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if encryption fails.
    pub fn obfuscate(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::rng().fill(&mut nonce);
        let sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| Error::internal(format!("obfuscate secret: {e}")))?;
        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(STANDARD.encode(out).into_bytes())
    }

    /// Opens a value sealed by [`Obfuscator::obfuscate`]. JSON passes through.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `stored` is neither JSON nor a
    /// value sealed under this key.
    pub fn reveal(&self, stored: &[u8]) -> Result<Vec<u8>> {
        if serde_json::from_slice::<IgnoredAny>(stored).is_ok() {
            return Ok(stored.to_vec());
        }
        let raw = STANDARD
            .decode(stored)
            .map_err(|e| Error::invalid(format!("obfuscated secret is not base64: {e}")))?;
        if raw.len() < NONCE_LEN {
            return Err(Error::invalid("obfuscated secret is truncated"));
        }
        let (nonce, sealed) = raw.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| Error::invalid("obfuscated secret does not open under this key"))
    }
}

impl Default for Obfuscator {
    fn default() -> Self {
        Self {
            cipher: Aes128Gcm::new(Key::<Aes128Gcm>::from_slice(DEFAULT_KEY)),
        }
    }
}

impl fmt::Debug for Obfuscator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Obfuscator").finish_non_exhaustive()
    }
}
