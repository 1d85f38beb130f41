// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! AES-256-GCM encryption of individual credential secrets.
//!
//! Each call to [`TokenCipher::encrypt`] draws a fresh 96-bit nonce. The
//! stored form is `base64(nonce || ciphertext || tag)`. The field name is
//! bound in as associated data, so an access-token ciphertext cannot be
//! swapped into the refresh-token slot.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use std::sync::Arc;

/// Errors from encrypting or decrypting a secret.
///
/// Decryption failures are deliberately opaque: a wrong key, a flipped bit,
/// a truncated payload and a mismatched field all look the same.
#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    #[error("invalid encryption key")]
    InvalidKey,

    #[error("encryption failed")]
    Encrypt,

    #[error("ciphertext rejected")]
    Decrypt,
}

/// Authenticated encryption for credential secrets.
#[derive(Clone)]
pub struct TokenCipher {
    key: Arc<LessSafeKey>,
    rng: SystemRandom,
}

impl std::fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCipher")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl TokenCipher {
    /// Create a cipher from a raw 256-bit key.
    pub fn new(key: &[u8; 32]) -> Result<Self, CipherError> {
        let unbound = UnboundKey::new(&AES_256_GCM, key).map_err(|_| CipherError::InvalidKey)?;
        Ok(Self {
            key: Arc::new(LessSafeKey::new(unbound)),
            rng: SystemRandom::new(),
        })
    }

    /// Encrypt `plaintext`, binding it to `field`.
    pub fn encrypt(&self, plaintext: &str, field: &str) -> Result<String, CipherError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| CipherError::Encrypt)?;

        let mut in_out = plaintext.as_bytes().to_vec();
        self.key
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::from(field.as_bytes()),
                &mut in_out,
            )
            .map_err(|_| CipherError::Encrypt)?;

        let mut payload = Vec::with_capacity(NONCE_LEN + in_out.len());
        payload.extend_from_slice(&nonce_bytes);
        payload.extend_from_slice(&in_out);
        Ok(BASE64.encode(payload))
    }

    /// Decrypt a value produced by [`TokenCipher::encrypt`] for the same `field`.
    pub fn decrypt(&self, encoded: &str, field: &str) -> Result<String, CipherError> {
        let payload = BASE64.decode(encoded).map_err(|_| CipherError::Decrypt)?;
        if payload.len() < NONCE_LEN + AES_256_GCM.tag_len() {
            return Err(CipherError::Decrypt);
        }

        let (nonce_bytes, sealed) = payload.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes).map_err(|_| CipherError::Decrypt)?;

        let mut in_out = sealed.to_vec();
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::from(field.as_bytes()), &mut in_out)
            .map_err(|_| CipherError::Decrypt)?;

        String::from_utf8(plaintext.to_vec()).map_err(|_| CipherError::Decrypt)
    }
}
