// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Operator endpoints for triggering and inspecting sync runs.

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::services::sync::{RunReport, RunState, SyncError};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/sync", post(trigger_sync))
        .route("/sync/status", get(sync_status))
}

#[derive(Serialize)]
struct TriggerResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct StatusResponse {
    state: RunState,
    last_report: Option<RunReport>,
}

/// Start a run in the background.
async fn trigger_sync(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<TriggerResponse>)> {
    if state.orchestrator.is_running().await {
        return Err(AppError::Conflict("A sync run is already in progress".to_string()));
    }

    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        match orchestrator.run_all().await {
            Ok(report) => tracing::info!(status = ?report.status, "Manual sync run finished"),
            Err(SyncError::AlreadyRunning) => {
                tracing::info!("Manual sync skipped, another run started first")
            }
            Err(e) => tracing::error!(error = %e, "Manual sync run failed"),
        }
    });

    tracing::info!("Manual sync run triggered");
    Ok((StatusCode::ACCEPTED, Json(TriggerResponse { status: "started" })))
}

async fn sync_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        state: state.orchestrator.state().await,
        last_report: state.orchestrator.last_report().await,
    })
}
