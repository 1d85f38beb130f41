// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Credential vault: the only owner of the stored OAuth credential.
//!
//! The vault keeps the encrypted credential document in memory and decrypts a
//! secret only for the call that needs it. Refreshes are serialized by a
//! single lock and re-check the cache after acquiring it, so concurrent
//! callers share one refresh and no two refresh secrets are ever in use at
//! the same time.

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

use super::cipher::{CipherError, TokenCipher};
use super::oauth::{OAuthClient, OAuthError, TokenResponse};
use super::whoop::AccessTokenProvider;
use crate::db::CredentialStore;
use crate::models::StoredCredential;

/// Associated-data labels binding each ciphertext to its field.
const ACCESS_TOKEN_FIELD: &str = "access_token";
const REFRESH_TOKEN_FIELD: &str = "refresh_token";
/// Longest access token lifetime accepted from the token endpoint (one year).
const MAX_TOKEN_LIFETIME_SECS: i64 = 31_536_000;

/// Credential errors. None of these carry secret material.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("no credential stored; complete the authorization handshake")]
    NoCredential,

    #[error("credential could not be decrypted")]
    Decrypt,

    #[error("credential could not be encrypted")]
    Encrypt,

    #[error("token refresh failed: {0}")]
    Refresh(String),

    #[error("credential storage failed: {0}")]
    Storage(String),
}

impl From<CipherError> for VaultError {
    fn from(e: CipherError) -> Self {
        match e {
            CipherError::Decrypt => VaultError::Decrypt,
            CipherError::InvalidKey | CipherError::Encrypt => VaultError::Encrypt,
        }
    }
}

pub struct CredentialVault {
    store: Arc<dyn CredentialStore>,
    cipher: TokenCipher,
    oauth: OAuthClient,
    margin: chrono::Duration,
    cache: RwLock<Option<StoredCredential>>,
    refresh_lock: Mutex<()>,
}

impl CredentialVault {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        cipher: TokenCipher,
        oauth: OAuthClient,
        refresh_margin: Duration,
    ) -> Self {
        Self {
            store,
            cipher,
            oauth,
            margin: chrono::Duration::seconds(refresh_margin.as_secs() as i64),
            cache: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Return an access token valid for at least the refresh margin,
    /// refreshing first if needed.
    pub async fn get_valid_access_token(&self) -> Result<String, VaultError> {
        // Fast path: cached and fresh.
        if let Some(cached) = self.cache.read().await.as_ref() {
            if cached.is_fresh(Utc::now(), self.margin) {
                return Ok(self.cipher.decrypt(&cached.access_token_encrypted, ACCESS_TOKEN_FIELD)?);
            }
        }

        let _guard = self.refresh_lock.lock().await;

        // Another task may have refreshed while we waited for the lock.
        let current = self.current().await?;
        if current.is_fresh(Utc::now(), self.margin) {
            return Ok(self.cipher.decrypt(&current.access_token_encrypted, ACCESS_TOKEN_FIELD)?);
        }

        tracing::info!(expires_at = %current.expires_at, "Access token expiring, refreshing");
        self.refresh_locked(current).await
    }

    /// Refresh after the remote API rejected `rejected`.
    ///
    /// If the cached token already differs from the rejected one, another
    /// caller refreshed in the meantime and that token is returned instead.
    pub async fn force_refresh(&self, rejected: &str) -> Result<String, VaultError> {
        let _guard = self.refresh_lock.lock().await;

        let current = self.current().await?;
        let cached_token = self.cipher.decrypt(&current.access_token_encrypted, ACCESS_TOKEN_FIELD)?;
        if cached_token != rejected && current.is_fresh(Utc::now(), self.margin) {
            return Ok(cached_token);
        }

        tracing::info!("Access token rejected by API, forcing refresh");
        self.refresh_locked(current).await
    }

    /// Encrypt and persist a grant from the authorization handshake,
    /// replacing any existing credential.
    pub async fn store_grant(&self, tokens: TokenResponse) -> Result<(), VaultError> {
        let _guard = self.refresh_lock.lock().await;

        let previous = self
            .store
            .load()
            .await
            .map_err(|e| VaultError::Storage(e.to_string()))?;
        let credential = self.seal(&tokens, previous.as_ref())?;

        self.store
            .save(&credential)
            .await
            .map_err(|e| VaultError::Storage(e.to_string()))?;
        *self.cache.write().await = Some(credential);

        tracing::info!(scope = ?tokens.scope, "Stored new WHOOP credential");
        Ok(())
    }

    /// Cached credential, loading it from storage on first use.
    async fn current(&self) -> Result<StoredCredential, VaultError> {
        if let Some(cached) = self.cache.read().await.clone() {
            return Ok(cached);
        }
        let loaded = self.reload().await?.ok_or(VaultError::NoCredential)?;
        Ok(loaded)
    }

    async fn reload(&self) -> Result<Option<StoredCredential>, VaultError> {
        let loaded = self
            .store
            .load()
            .await
            .map_err(|e| VaultError::Storage(e.to_string()))?;
        *self.cache.write().await = loaded.clone();
        Ok(loaded)
    }

    /// Refresh `current`. Caller must hold `refresh_lock`.
    async fn refresh_locked(&self, current: StoredCredential) -> Result<String, VaultError> {
        let refresh_token = self
            .cipher
            .decrypt(&current.refresh_token_encrypted, REFRESH_TOKEN_FIELD)?;

        let (tokens, basis) = match self.oauth.refresh(&refresh_token).await {
            Ok(tokens) => (tokens, current),
            Err(OAuthError::InvalidGrant) => {
                // Another process may have rotated the refresh token.
                tracing::warn!("Refresh token rejected, reloading stored credential");
                let stored = self.reload().await?.ok_or(VaultError::NoCredential)?;
                if stored.refresh_token_encrypted == current.refresh_token_encrypted {
                    return Err(VaultError::Refresh(
                        "refresh token revoked; re-run the authorization handshake".to_string(),
                    ));
                }
                if stored.is_fresh(Utc::now(), self.margin) {
                    return Ok(self.cipher.decrypt(&stored.access_token_encrypted, ACCESS_TOKEN_FIELD)?);
                }
                let rotated = self
                    .cipher
                    .decrypt(&stored.refresh_token_encrypted, REFRESH_TOKEN_FIELD)?;
                let tokens = self
                    .oauth
                    .refresh(&rotated)
                    .await
                    .map_err(|e| VaultError::Refresh(e.to_string()))?;
                (tokens, stored)
            }
            Err(e) => return Err(VaultError::Refresh(e.to_string())),
        };

        let refreshed = self.seal(&tokens, Some(&basis))?;

        // Cache first: the old refresh token is already spent, so the new
        // one must survive even if persisting fails.
        *self.cache.write().await = Some(refreshed.clone());
        self.store.save(&refreshed).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to persist refreshed credential");
            VaultError::Storage(e.to_string())
        })?;

        tracing::info!(expires_at = %refreshed.expires_at, "Access token refreshed");
        Ok(tokens.access_token)
    }

    /// Build the encrypted document for `tokens`, carrying over what the
    /// token endpoint omitted from `previous`.
    fn seal(
        &self,
        tokens: &TokenResponse,
        previous: Option<&StoredCredential>,
    ) -> Result<StoredCredential, VaultError> {
        let now = Utc::now();
        let expires_at = (1..=MAX_TOKEN_LIFETIME_SECS)
            .contains(&tokens.expires_in)
            .then(|| TimeDelta::try_seconds(tokens.expires_in))
            .flatten()
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .ok_or_else(|| {
                VaultError::Refresh(format!(
                    "token lifetime out of range: {}s",
                    tokens.expires_in
                ))
            })?;

        let refresh_token_encrypted = match (&tokens.refresh_token, previous) {
            (Some(fresh), _) => self.cipher.encrypt(fresh, REFRESH_TOKEN_FIELD)?,
            (None, Some(prev)) => prev.refresh_token_encrypted.clone(),
            (None, None) => {
                return Err(VaultError::Refresh(
                    "token response has no refresh token; request the offline scope".to_string(),
                ))
            }
        };

        Ok(StoredCredential {
            access_token_encrypted: self.cipher.encrypt(&tokens.access_token, ACCESS_TOKEN_FIELD)?,
            refresh_token_encrypted,
            token_type: tokens
                .token_type
                .clone()
                .or_else(|| previous.map(|p| p.token_type.clone()))
                .unwrap_or_else(|| "bearer".to_string()),
            expires_at,
            scope: tokens
                .scope
                .clone()
                .or_else(|| previous.map(|p| p.scope.clone()))
                .unwrap_or_default(),
            created_at: previous.map_or(now, |p| p.created_at),
            updated_at: now,
        })
    }
}

#[async_trait]
impl AccessTokenProvider for CredentialVault {
    async fn access_token(&self) -> Result<String, VaultError> {
        self.get_valid_access_token().await
    }

    async fn force_refresh(&self, rejected: &str) -> Result<String, VaultError> {
        CredentialVault::force_refresh(self, rejected).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryDb;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const KEY: [u8; 32] = [9u8; 32];

    fn vault(server: &MockServer, store: &MemoryDb) -> CredentialVault {
        let oauth = OAuthClient::new(
            format!("{}/oauth/oauth2", server.uri()),
            "client".to_string(),
            "secret".to_string(),
            Duration::from_secs(5),
        )
        .unwrap();
        CredentialVault::new(
            Arc::new(store.clone()),
            TokenCipher::new(&KEY).unwrap(),
            oauth,
            Duration::from_secs(60),
        )
    }

    fn grant(access: &str, refresh: Option<&str>, expires_in: i64) -> TokenResponse {
        TokenResponse {
            access_token: access.to_string(),
            refresh_token: refresh.map(str::to_string),
            expires_in,
            scope: Some("offline read:cycles".to_string()),
            token_type: Some("bearer".to_string()),
        }
    }

    fn token_body(access: &str, refresh: Option<&str>) -> serde_json::Value {
        let mut body = serde_json::json!({
            "access_token": access,
            "expires_in": 3600,
            "token_type": "bearer"
        });
        if let Some(refresh) = refresh {
            body["refresh_token"] = serde_json::json!(refresh);
        }
        body
    }

    #[tokio::test]
    async fn test_no_credential() {
        let server = MockServer::start().await;
        let vault = vault(&server, &MemoryDb::new());
        assert!(matches!(
            vault.get_valid_access_token().await,
            Err(VaultError::NoCredential)
        ));
    }

    #[tokio::test]
    async fn test_fresh_token_returned_without_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let store = MemoryDb::new();
        let vault = vault(&server, &store);
        vault
            .store_grant(grant("access-1", Some("refresh-1"), 3600))
            .await
            .unwrap();

        assert_eq!(vault.get_valid_access_token().await.unwrap(), "access-1");

        // Nothing is persisted in clear text.
        let stored = store.load().await.unwrap().unwrap();
        assert!(!stored.access_token_encrypted.contains("access-1"));
        assert!(!stored.refresh_token_encrypted.contains("refresh-1"));
    }

    #[tokio::test]
    async fn test_expiring_token_refreshed_exactly_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/oauth2/token"))
            .and(body_string_contains("refresh_token=refresh-1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(token_body("access-2", Some("refresh-2"))),
            )
            .expect(1)
            .mount(&server)
            .await;

        let store = MemoryDb::new();
        let vault = vault(&server, &store);
        // Expires in 30 seconds; the margin is 60.
        vault
            .store_grant(grant("access-1", Some("refresh-1"), 30))
            .await
            .unwrap();

        assert_eq!(vault.get_valid_access_token().await.unwrap(), "access-2");
        assert_eq!(vault.get_valid_access_token().await.unwrap(), "access-2");

        let cipher = TokenCipher::new(&KEY).unwrap();
        let stored = store.load().await.unwrap().unwrap();
        assert_eq!(
            cipher
                .decrypt(&stored.refresh_token_encrypted, REFRESH_TOKEN_FIELD)
                .unwrap(),
            "refresh-2"
        );
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/oauth2/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(token_body("access-2", Some("refresh-2")))
                    .set_delay(Duration::from_millis(50)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let store = MemoryDb::new();
        let vault = vault(&server, &store);
        vault
            .store_grant(grant("access-1", Some("refresh-1"), 0))
            .await
            .unwrap();

        let (a, b, c) = tokio::join!(
            vault.get_valid_access_token(),
            vault.get_valid_access_token(),
            vault.get_valid_access_token()
        );
        assert_eq!(a.unwrap(), "access-2");
        assert_eq!(b.unwrap(), "access-2");
        assert_eq!(c.unwrap(), "access-2");
    }

    #[tokio::test]
    async fn test_refresh_without_rotation_keeps_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/oauth2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("access-2", None)))
            .mount(&server)
            .await;

        let store = MemoryDb::new();
        let vault = vault(&server, &store);
        vault
            .store_grant(grant("access-1", Some("refresh-1"), 0))
            .await
            .unwrap();
        let before = store.load().await.unwrap().unwrap();

        vault.get_valid_access_token().await.unwrap();

        let after = store.load().await.unwrap().unwrap();
        assert_eq!(after.refresh_token_encrypted, before.refresh_token_encrypted);
        assert_eq!(after.created_at, before.created_at);
        assert!(after.expires_at > before.expires_at);
    }

    #[tokio::test]
    async fn test_force_refresh_skips_when_already_rotated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let vault = vault(&server, &MemoryDb::new());
        vault
            .store_grant(grant("access-2", Some("refresh-2"), 3600))
            .await
            .unwrap();

        assert_eq!(vault.force_refresh("access-1").await.unwrap(), "access-2");
    }

    #[tokio::test]
    async fn test_invalid_grant_reloads_rotated_credential() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/oauth2/token"))
            .and(body_string_contains("refresh_token=refresh-1"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(serde_json::json!({ "error": "invalid_grant" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let store = MemoryDb::new();
        let ours = vault(&server, &store);
        ours.store_grant(grant("access-1", Some("refresh-1"), 0))
            .await
            .unwrap();

        // A second process rotates the credential behind our back.
        let theirs = vault(&server, &store);
        theirs
            .store_grant(grant("access-9", Some("refresh-9"), 3600))
            .await
            .unwrap();

        assert_eq!(ours.get_valid_access_token().await.unwrap(), "access-9");
    }

    #[tokio::test]
    async fn test_revoked_refresh_token_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/oauth2/token"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(serde_json::json!({ "error": "invalid_grant" })),
            )
            .mount(&server)
            .await;

        let vault = vault(&server, &MemoryDb::new());
        vault
            .store_grant(grant("access-1", Some("refresh-1"), 0))
            .await
            .unwrap();

        assert!(matches!(
            vault.get_valid_access_token().await,
            Err(VaultError::Refresh(_))
        ));
    }

    #[tokio::test]
    async fn test_out_of_range_lifetime_rejected() {
        let server = MockServer::start().await;
        let store = MemoryDb::new();
        let vault = vault(&server, &store);

        for expires_in in [9_000_000_000_000_000, 0, -30, MAX_TOKEN_LIFETIME_SECS + 1] {
            assert!(matches!(
                vault.store_grant(grant("access-1", Some("refresh-1"), expires_in)).await,
                Err(VaultError::Refresh(_))
            ));
        }
        assert!(store.load().await.unwrap().is_none());

        vault
            .store_grant(grant("access-1", Some("refresh-1"), MAX_TOKEN_LIFETIME_SECS))
            .await
            .unwrap();
        assert_eq!(vault.get_valid_access_token().await.unwrap(), "access-1");
    }

    #[tokio::test]
    async fn test_tampered_credential_fails_generically() {
        let server = MockServer::start().await;
        let store = MemoryDb::new();
        vault(&server, &store)
            .store_grant(grant("access-1", Some("refresh-1"), 3600))
            .await
            .unwrap();

        let mut stored = store.load().await.unwrap().unwrap();
        let mut raw = BASE64.decode(&stored.access_token_encrypted).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        stored.access_token_encrypted = BASE64.encode(raw);
        store.save(&stored).await.unwrap();

        let fresh = vault(&server, &store);
        let err = fresh.get_valid_access_token().await.unwrap_err();
        assert!(matches!(err, VaultError::Decrypt));
        assert_eq!(err.to_string(), "credential could not be decrypted");
    }
}
