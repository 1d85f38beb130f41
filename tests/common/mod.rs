// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use std::sync::Arc;
use whoop_sync::config::Config;
use whoop_sync::db::{FirestoreDb, MemoryDb};
use whoop_sync::routes::create_router;
use whoop_sync::AppState;

/// Check if emulator is available via environment variable.
#[allow(dead_code)]
pub fn emulator_available() -> bool {
    std::env::var("FIRESTORE_EMULATOR_HOST").is_ok()
}

/// Skip test with message if emulator not available.
#[macro_export]
macro_rules! require_emulator {
    () => {
        if !crate::common::emulator_available() {
            eprintln!("⚠️  Skipping: FIRESTORE_EMULATOR_HOST not set");
            return;
        }
    };
}

/// Connect to the emulator under a fresh project, so each test starts empty.
#[allow(dead_code)]
pub async fn test_db() -> FirestoreDb {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    FirestoreDb::new(&format!("test-project-{nanos}"))
        .await
        .expect("Failed to connect to Firestore emulator")
}

/// Create a test app backed by in-memory storage.
/// Returns the router, the shared state, and the store.
#[allow(dead_code)]
pub fn create_test_app() -> (axum::Router, Arc<AppState>, MemoryDb) {
    create_test_app_with(Config::test_default())
}

#[allow(dead_code)]
pub fn create_test_app_with(config: Config) -> (axum::Router, Arc<AppState>, MemoryDb) {
    let db = MemoryDb::new();
    let state = Arc::new(
        AppState::build(config, Arc::new(db.clone()), Arc::new(db.clone()))
            .expect("Failed to build app state"),
    );
    (create_router(state.clone()), state, db)
}

/// Read a response body as JSON.
#[allow(dead_code)]
pub async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read body");
    serde_json::from_slice(&bytes).expect("Body is not JSON")
}
