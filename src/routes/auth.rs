// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! WHOOP OAuth handshake routes.
//!
//! This is how the single credential is created: the operator visits
//! `/auth/whoop`, approves access at WHOOP, and the callback hands the grant
//! to the credential vault.

use axum::{
    extract::{Query, State},
    response::Redirect,
    routing::get,
    Json, Router,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::AppState;

type HmacSha256 = Hmac<Sha256>;

/// How long a signed `state` parameter stays valid.
const STATE_MAX_AGE_MS: i64 = 10 * 60 * 1000;

/// Tolerated clock skew for state timestamps in the future.
const STATE_MAX_SKEW_MS: i64 = 30 * 1000;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/whoop", get(auth_start))
        .route("/auth/whoop/callback", get(auth_callback))
}

/// Derive the state-signing key from the token encryption key.
pub fn derive_state_key(encryption_key: &[u8; 32]) -> std::result::Result<[u8; 32], AppError> {
    let hkdf = hkdf::Hkdf::<Sha256>::new(Some(b"whoop-sync"), encryption_key);
    let mut okm = [0u8; 32];
    hkdf.expand(b"oauth-state", &mut okm)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("HKDF expand failed: {}", e)))?;
    Ok(okm)
}

fn redirect_uri(state: &AppState) -> String {
    format!(
        "{}/auth/whoop/callback",
        state.config.public_url.trim_end_matches('/')
    )
}

/// Start OAuth flow - redirect to WHOOP authorization.
async fn auth_start(State(state): State<Arc<AppState>>) -> Result<Redirect> {
    let oauth_state = create_state(&state.oauth_state_key, Utc::now())?;
    let auth_url = state.oauth.authorize_url(&redirect_uri(&state), &oauth_state);

    tracing::info!(
        client_id = %state.config.whoop_client_id,
        "Starting OAuth flow, redirecting to WHOOP"
    );

    Ok(Redirect::temporary(&auth_url))
}

#[derive(Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Serialize)]
pub struct CallbackResponse {
    pub status: &'static str,
}

/// OAuth callback - exchange the code and store the credential.
async fn auth_callback(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CallbackParams>,
) -> Result<Json<CallbackResponse>> {
    if let Some(error) = params.error {
        tracing::warn!(error = %error, "OAuth error from WHOOP");
        return Err(AppError::BadRequest(format!("Authorization failed: {}", error)));
    }

    let oauth_state = params
        .state
        .ok_or_else(|| AppError::BadRequest("Missing state parameter".to_string()))?;
    if !verify_state(&oauth_state, &state.oauth_state_key, Utc::now()) {
        tracing::warn!("Invalid, expired, or tampered OAuth state parameter");
        return Err(AppError::BadRequest("Invalid state parameter".to_string()));
    }

    let code = params
        .code
        .ok_or_else(|| AppError::BadRequest("Missing code parameter".to_string()))?;

    tracing::info!("Exchanging authorization code for tokens");
    let tokens = state
        .oauth
        .exchange_code(&code, &redirect_uri(&state))
        .await
        .map_err(|e| AppError::WhoopApi(e.to_string()))?;

    state
        .vault
        .store_grant(tokens)
        .await
        .map_err(|e| AppError::Credential(e.to_string()))?;

    tracing::info!("OAuth successful, credential stored");
    Ok(Json(CallbackResponse {
        status: "connected",
    }))
}

/// Build a signed state value: `base64(timestamp_hex|nonce_hex|signature_hex)`.
fn create_state(key: &[u8], now: DateTime<Utc>) -> Result<String> {
    let mut nonce = [0u8; 16];
    SystemRandom::new()
        .fill(&mut nonce)
        .map_err(|_| AppError::Internal(anyhow::anyhow!("Failed to generate state nonce")))?;

    let payload = format!("{:x}|{}", now.timestamp_millis(), hex::encode(nonce));

    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("HMAC init failed: {}", e)))?;
    mac.update(payload.as_bytes());
    let signature = mac.finalize().into_bytes();

    let signed = format!("{}|{}", payload, hex::encode(signature));
    Ok(URL_SAFE_NO_PAD.encode(signed.as_bytes()))
}

/// Check the signature and age of a state value.
fn verify_state(state: &str, key: &[u8], now: DateTime<Utc>) -> bool {
    let Some(decoded) = URL_SAFE_NO_PAD
        .decode(state)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
    else {
        return false;
    };

    let parts: Vec<&str> = decoded.splitn(3, '|').collect();
    let [timestamp_hex, nonce_hex, signature_hex] = parts.as_slice() else {
        return false;
    };

    let Ok(signature) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(key) else {
        return false;
    };
    mac.update(format!("{}|{}", timestamp_hex, nonce_hex).as_bytes());
    if mac.verify_slice(&signature).is_err() {
        tracing::error!("OAuth state signature mismatch! Potential tampering.");
        return false;
    }

    let Ok(issued_ms) = i64::from_str_radix(timestamp_hex, 16) else {
        return false;
    };
    let age_ms = now.timestamp_millis() - issued_ms;
    (-STATE_MAX_SKEW_MS..=STATE_MAX_AGE_MS).contains(&age_ms)
}
