// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Database layer.
//!
//! The sync engine only sees the two traits below. Every write is an upsert
//! keyed by the remote natural identifier, so replaying a page is harmless.

pub mod firestore;
pub mod memory;

pub use firestore::FirestoreDb;
pub use memory::MemoryDb;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::AppError;
use crate::models::{DomainRecord, ResourceStream, StoredCredential};

/// Collection names as constants.
pub mod collections {
    use crate::models::ResourceStream;

    pub const CYCLES: &str = "cycles";
    pub const RECOVERIES: &str = "recoveries";
    pub const SLEEPS: &str = "sleeps";
    pub const WORKOUTS: &str = "workouts";
    pub const CREDENTIALS: &str = "credentials";

    /// Document ID of the single stored credential.
    pub const PRIMARY_CREDENTIAL: &str = "primary";

    pub fn for_stream(stream: ResourceStream) -> &'static str {
        match stream {
            ResourceStream::Cycles => CYCLES,
            ResourceStream::Recoveries => RECOVERIES,
            ResourceStream::Sleeps => SLEEPS,
            ResourceStream::Workouts => WORKOUTS,
        }
    }
}

/// Storage for synced records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert or replace the record keyed by its natural identifier.
    async fn upsert(&self, record: &DomainRecord) -> Result<(), AppError>;

    /// Latest `updated_at` among stored records of `stream` (the watermark).
    async fn find_latest_updated_at(
        &self,
        stream: ResourceStream,
    ) -> Result<Option<DateTime<Utc>>, AppError>;

    /// Stored records, most recently updated first.
    async fn list(
        &self,
        stream: ResourceStream,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<DomainRecord>, AppError>;
}

/// Storage for the single encrypted credential.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load(&self) -> Result<Option<StoredCredential>, AppError>;

    /// Create on first use, replace thereafter.
    async fn save(&self, credential: &StoredCredential) -> Result<(), AppError>;
}
