// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - sync engine and its collaborators.

pub mod cipher;
pub mod mapper;
pub mod oauth;
pub mod resilience;
pub mod scheduler;
pub mod sync;
pub mod vault;
pub mod whoop;

pub use cipher::{CipherError, TokenCipher};
pub use mapper::{map_record, MappingError};
pub use oauth::{OAuthClient, OAuthError, TokenResponse};
pub use scheduler::spawn_scheduler;
pub use sync::{RunReport, RunState, SyncError, SyncOrchestrator};
pub use vault::{CredentialVault, VaultError};
pub use whoop::{AccessTokenProvider, ApiError, FetchOutcome, RecordSource, WhoopClient};
