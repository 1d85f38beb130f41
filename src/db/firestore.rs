// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore client wrapper with typed operations.
//!
//! Provides high-level operations for:
//! - Synced records (one collection per stream, document ID = WHOOP ID)
//! - The encrypted credential (`credentials/primary`)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::{collections, CredentialStore, RecordStore};
use crate::error::AppError;
use crate::models::{DomainRecord, ResourceStream, StoredCredential};
use crate::time_utils::rfc3339_millis_opt;

/// Only the field the watermark query needs.
#[derive(Deserialize)]
struct UpdatedAtProjection {
    #[serde(default, with = "rfc3339_millis_opt")]
    updated_at: Option<DateTime<Utc>>,
}

/// Firestore database client.
#[derive(Clone)]
pub struct FirestoreDb {
    client: Option<firestore::FirestoreDb>,
}

impl FirestoreDb {
    /// Create a new Firestore client.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str) -> Result<Self, AppError> {
        // The emulator needs an unauthenticated connection.
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id).await;
        }

        let client = firestore::FirestoreDb::new(project_id)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to Firestore: {}", e)))?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(project_id: &str) -> Result<Self, AppError> {
        tracing::info!("Using unauthenticated connection for Firestore Emulator");

        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            AppError::Database(format!("Failed to connect to Firestore Emulator: {}", e))
        })?;

        tracing::info!(
            project = project_id,
            "Connected to Firestore (Emulator/Unauthenticated)"
        );

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create an offline client. All database operations return an error.
    pub fn new_mock() -> Self {
        Self { client: None }
    }

    /// Helper to get the client or return an error if offline.
    fn get_client(&self) -> Result<&firestore::FirestoreDb, AppError> {
        self.client
            .as_ref()
            .ok_or_else(|| AppError::Database("Database not connected (offline mode)".to_string()))
    }

    /// Create or replace a document.
    async fn put<T>(&self, collection: &str, document_id: &str, object: &T) -> Result<(), AppError>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
    {
        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collection)
            .document_id(document_id)
            .object(object)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    /// Page through a stream collection, most recently updated first.
    async fn list_typed<T>(&self, collection: &str, limit: u32, offset: u32) -> Result<Vec<T>, AppError>
    where
        T: DeserializeOwned + Send,
    {
        self.get_client()?
            .fluent()
            .select()
            .from(collection)
            .order_by([("updated_at", firestore::FirestoreQueryDirection::Descending)])
            .limit(limit)
            .offset(offset)
            .obj::<T>()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }
}

#[async_trait]
impl RecordStore for FirestoreDb {
    async fn upsert(&self, record: &DomainRecord) -> Result<(), AppError> {
        let collection = collections::for_stream(record.stream());
        match record {
            DomainRecord::Cycle(r) => self.put(collection, &r.id, r).await,
            DomainRecord::Recovery(r) => self.put(collection, &r.cycle_id, r).await,
            DomainRecord::Sleep(r) => self.put(collection, &r.id, r).await,
            DomainRecord::Workout(r) => self.put(collection, &r.id, r).await,
        }
    }

    async fn find_latest_updated_at(
        &self,
        stream: ResourceStream,
    ) -> Result<Option<DateTime<Utc>>, AppError> {
        // Stored timestamps are fixed width, so descending lexical order is
        // descending chronological order. Documents with a null `updated_at`
        // sort after every string.
        let latest: Vec<UpdatedAtProjection> = self
            .get_client()?
            .fluent()
            .select()
            .from(collections::for_stream(stream))
            .order_by([("updated_at", firestore::FirestoreQueryDirection::Descending)])
            .limit(1)
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(latest.into_iter().next().and_then(|p| p.updated_at))
    }

    async fn list(
        &self,
        stream: ResourceStream,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<DomainRecord>, AppError> {
        let collection = collections::for_stream(stream);
        let records = match stream {
            ResourceStream::Cycles => self
                .list_typed(collection, limit, offset)
                .await?
                .into_iter()
                .map(DomainRecord::Cycle)
                .collect(),
            ResourceStream::Recoveries => self
                .list_typed(collection, limit, offset)
                .await?
                .into_iter()
                .map(DomainRecord::Recovery)
                .collect(),
            ResourceStream::Sleeps => self
                .list_typed(collection, limit, offset)
                .await?
                .into_iter()
                .map(DomainRecord::Sleep)
                .collect(),
            ResourceStream::Workouts => self
                .list_typed(collection, limit, offset)
                .await?
                .into_iter()
                .map(DomainRecord::Workout)
                .collect(),
        };
        Ok(records)
    }
}

#[async_trait]
impl CredentialStore for FirestoreDb {
    async fn load(&self) -> Result<Option<StoredCredential>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::CREDENTIALS)
            .obj()
            .one(collections::PRIMARY_CREDENTIAL)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn save(&self, credential: &StoredCredential) -> Result<(), AppError> {
        self.put(
            collections::CREDENTIALS,
            collections::PRIMARY_CREDENTIAL,
            credential,
        )
        .await
    }
}
