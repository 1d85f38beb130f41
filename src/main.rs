// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! WHOOP-Sync API Server
//!
//! Periodically mirrors WHOOP cycles, recoveries, sleeps and workouts into
//! local storage and serves them back through a paginated read API.

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use whoop_sync::{
    config::{Config, StorageBackend},
    db::{CredentialStore, FirestoreDb, MemoryDb, RecordStore},
    services::spawn_scheduler,
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured JSON logging for GCP
    init_logging();

    // Load configuration from environment
    let config = Config::from_env()?;
    tracing::info!(
        port = config.port,
        environment = ?config.environment,
        storage = ?config.storage_backend,
        "Starting WHOOP-Sync"
    );

    let (records, credentials): (Arc<dyn RecordStore>, Arc<dyn CredentialStore>) =
        match config.storage_backend {
            StorageBackend::Firestore => {
                let db = FirestoreDb::new(&config.gcp_project_id).await?;
                (Arc::new(db.clone()), Arc::new(db))
            }
            StorageBackend::Memory => {
                tracing::warn!("Using in-memory storage, data is lost on restart");
                let db = MemoryDb::new();
                (Arc::new(db.clone()), Arc::new(db))
            }
        };

    let state = Arc::new(AppState::build(config.clone(), records, credentials)?);

    let _scheduler = spawn_scheduler(state.orchestrator.clone(), config.sync_interval);

    // Build router
    let app = whoop_sync::routes::create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Initialize structured JSON logging (GCP-compliant).
fn init_logging() {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,whoop_sync=debug"));

    tracing_subscriber::registry().with(filter).with(format).init();
}
