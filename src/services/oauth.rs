// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! WHOOP OAuth2 token endpoint client.
//!
//! Handles:
//! - Authorization URL construction for the one-time handshake
//! - Authorization code exchange
//! - Refresh token grants

use serde::Deserialize;
use std::time::Duration;

/// Scopes requested during the handshake. `offline` yields a refresh token.
pub const OAUTH_SCOPES: &str = "offline read:cycles read:recovery read:sleep read:workout";

/// Errors from the token endpoint.
#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    /// The refresh token was rejected (revoked, rotated elsewhere, or expired).
    #[error("refresh token rejected: invalid_grant")]
    InvalidGrant,

    #[error("token endpoint returned HTTP {status}")]
    Status { status: u16 },

    #[error("token request failed: {0}")]
    Request(String),

    #[error("failed to parse token response: {0}")]
    Parse(String),
}

/// Token response from the WHOOP token endpoint.
#[derive(Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    /// Absent when the server does not rotate the refresh token.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Lifetime of the access token in seconds.
    pub expires_in: i64,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .field("token_type", &self.token_type)
            .finish()
    }
}

/// OAuth client for the WHOOP authorization server.
#[derive(Clone)]
pub struct OAuthClient {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
    client_secret: String,
}

impl OAuthClient {
    /// Create a new client. `base_url` is the OAuth root (`.../oauth/oauth2`).
    pub fn new(
        base_url: String,
        client_id: String,
        client_secret: String,
        timeout: Duration,
    ) -> Result<Self, OAuthError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OAuthError::Request(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            client_id,
            client_secret,
        })
    }

    /// Build the URL the operator is redirected to for authorization.
    pub fn authorize_url(&self, redirect_uri: &str, state: &str) -> String {
        format!(
            "{}/auth?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}",
            self.base_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(OAUTH_SCOPES),
            urlencoding::encode(state),
        )
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse, OAuthError> {
        self.token_request(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ])
        .await
    }

    /// Refresh an access token.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, OAuthError> {
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", "offline"),
        ])
        .await
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenResponse, OAuthError> {
        let url = format!("{}/token", self.base_url);

        let response = self
            .http
            .post(&url)
            .form(form)
            .send()
            .await
            .map_err(|e| OAuthError::Request(e.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            // The body never contains secrets we sent, but keep it out of logs anyway.
            let body = response.text().await.unwrap_or_default();
            if status.is_client_error() && body.contains("invalid_grant") {
                return Err(OAuthError::InvalidGrant);
            }
            tracing::warn!(status = %status, "Token endpoint request failed");
            return Err(OAuthError::Status {
                status: status.as_u16(),
            });
        }

        response
            .json()
            .await
            .map_err(|e| OAuthError::Parse(e.to_string()))
    }
}
