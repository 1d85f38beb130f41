// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! WHOOP-Sync: mirror a single user's WHOOP data into local storage.
//!
//! This crate provides the sync engine (paginated API client, orchestrator,
//! record mapper, credential vault) and a small HTTP surface for the OAuth
//! handshake, operator controls, and paginated reads of synced records.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use anyhow::Context;
use std::sync::Arc;

use config::Config;
use db::{CredentialStore, RecordStore};
use services::{CredentialVault, OAuthClient, SyncOrchestrator, TokenCipher, WhoopClient};

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub records: Arc<dyn RecordStore>,
    pub vault: Arc<CredentialVault>,
    pub oauth: OAuthClient,
    pub orchestrator: Arc<SyncOrchestrator>,
    /// HMAC key for the OAuth `state` parameter
    pub oauth_state_key: [u8; 32],
}

impl AppState {
    /// Wire the sync engine on top of the given storage.
    pub fn build(
        config: Config,
        records: Arc<dyn RecordStore>,
        credentials: Arc<dyn CredentialStore>,
    ) -> anyhow::Result<Self> {
        let cipher =
            TokenCipher::new(&config.encryption_key).context("Invalid token encryption key")?;

        let oauth = OAuthClient::new(
            config.oauth_base_url.clone(),
            config.whoop_client_id.clone(),
            config.whoop_client_secret.clone(),
            config.request_timeout,
        )
        .context("Failed to build OAuth client")?;

        let vault = Arc::new(CredentialVault::new(
            credentials,
            cipher,
            oauth.clone(),
            config.token_refresh_margin,
        ));

        let client =
            WhoopClient::new(&config, vault.clone()).context("Failed to build WHOOP client")?;

        let orchestrator = Arc::new(SyncOrchestrator::new(
            Arc::new(client),
            records.clone(),
            config.sync_run_timeout,
        ));

        let oauth_state_key = routes::auth::derive_state_key(&config.encryption_key)?;

        Ok(Self {
            config,
            records,
            vault,
            oauth,
            orchestrator,
            oauth_state_key,
        })
    }
}
