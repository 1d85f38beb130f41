// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! The single stored OAuth credential.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::time_utils::rfc3339_millis;

/// OAuth credential as persisted (secrets encrypted).
///
/// Only `CredentialVault` creates or mutates this document. The secret fields
/// hold `TokenCipher` output and are never written in clear text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredCredential {
    /// Encrypted access token (base64 nonce + ciphertext + tag)
    pub access_token_encrypted: String,
    /// Encrypted refresh token (base64 nonce + ciphertext + tag)
    pub refresh_token_encrypted: String,
    /// Token type reported by the token endpoint (normally "bearer")
    pub token_type: String,
    /// When the access token expires
    #[serde(with = "rfc3339_millis")]
    pub expires_at: DateTime<Utc>,
    /// Granted OAuth scopes (space separated)
    pub scope: String,
    #[serde(with = "rfc3339_millis")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "rfc3339_millis")]
    pub updated_at: DateTime<Utc>,
}

impl StoredCredential {
    /// Whether the access token is still usable `margin` from `now`.
    pub fn is_fresh(&self, now: DateTime<Utc>, margin: chrono::Duration) -> bool {
        now + margin < self.expires_at
    }
}
