// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-process storage for tests and development/demo deployments.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::{Arc, RwLock};

use super::{CredentialStore, RecordStore};
use crate::error::AppError;
use crate::models::{DomainRecord, ResourceStream, StoredCredential};

/// Concurrent in-memory store. Clones share the same data.
#[derive(Clone, Default)]
pub struct MemoryDb {
    records: Arc<DashMap<(ResourceStream, String), DomainRecord>>,
    credential: Arc<RwLock<Option<StoredCredential>>>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records in `stream`.
    pub fn count(&self, stream: ResourceStream) -> usize {
        self.records.iter().filter(|e| e.key().0 == stream).count()
    }

    /// Fetch one record by natural identifier.
    pub fn get(&self, stream: ResourceStream, id: &str) -> Option<DomainRecord> {
        self.records
            .get(&(stream, id.to_string()))
            .map(|e| e.value().clone())
    }
}

#[async_trait]
impl RecordStore for MemoryDb {
    async fn upsert(&self, record: &DomainRecord) -> Result<(), AppError> {
        self.records
            .insert((record.stream(), record.id().to_string()), record.clone());
        Ok(())
    }

    async fn find_latest_updated_at(
        &self,
        stream: ResourceStream,
    ) -> Result<Option<DateTime<Utc>>, AppError> {
        Ok(self
            .records
            .iter()
            .filter(|e| e.key().0 == stream)
            .filter_map(|e| e.value().updated_at())
            .max())
    }

    async fn list(
        &self,
        stream: ResourceStream,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<DomainRecord>, AppError> {
        let mut records: Vec<DomainRecord> = self
            .records
            .iter()
            .filter(|e| e.key().0 == stream)
            .map(|e| e.value().clone())
            .collect();

        records.sort_by(|a, b| {
            b.updated_at()
                .cmp(&a.updated_at())
                .then_with(|| a.id().cmp(b.id()))
        });

        Ok(records
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }
}

#[async_trait]
impl CredentialStore for MemoryDb {
    async fn load(&self) -> Result<Option<StoredCredential>, AppError> {
        self.credential
            .read()
            .map(|guard| guard.clone())
            .map_err(|_| AppError::Database("credential lock poisoned".to_string()))
    }

    async fn save(&self, credential: &StoredCredential) -> Result<(), AppError> {
        let mut guard = self
            .credential
            .write()
            .map_err(|_| AppError::Database("credential lock poisoned".to_string()))?;
        *guard = Some(credential.clone());
        Ok(())
    }
}
