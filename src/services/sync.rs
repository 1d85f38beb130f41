// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Incremental sync of the four WHOOP resource streams.
//!
//! For each stream, in order: read the watermark (latest stored
//! `updated_at`), fetch everything since then, map each record, and upsert
//! it. A bad record is skipped and counted. A failing stream is logged and
//! reported, and the remaining streams still run. Only one run may be in
//! flight at a time.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

use super::mapper::map_record;
use super::whoop::{ApiError, RecordSource};
use crate::db::RecordStore;
use crate::error::AppError;
use crate::models::ResourceStream;
use crate::time_utils::rfc3339_millis;

/// Run-level and stream-level sync errors.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("a sync run is already in progress")]
    AlreadyRunning,

    #[error("fetch failed: {0}")]
    Fetch(#[from] ApiError),

    #[error("storage failed: {0}")]
    Storage(#[from] AppError),
}

/// Orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
    Completed,
    PartiallyFailed,
    /// The run exceeded its time bound.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamStatus {
    Ok,
    /// Circuit breaker open; nothing fetched.
    Degraded,
    Failed,
}

/// Outcome of one stream within a run.
#[derive(Debug, Clone, Serialize)]
pub struct StreamReport {
    pub stream: ResourceStream,
    pub fetched: usize,
    pub saved: usize,
    pub skipped: usize,
    pub degraded: bool,
    pub status: StreamStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StreamReport {
    fn new(stream: ResourceStream) -> Self {
        Self {
            stream,
            fetched: 0,
            saved: 0,
            skipped: 0,
            degraded: false,
            status: StreamStatus::Ok,
            error: None,
        }
    }
}

/// Outcome of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    #[serde(with = "rfc3339_millis")]
    pub started_at: DateTime<Utc>,
    #[serde(with = "rfc3339_millis")]
    pub finished_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub status: RunState,
    pub streams: Vec<StreamReport>,
}

impl RunReport {
    pub fn stream(&self, stream: ResourceStream) -> Option<&StreamReport> {
        self.streams.iter().find(|r| r.stream == stream)
    }
}

pub struct SyncOrchestrator {
    source: Arc<dyn RecordSource>,
    store: Arc<dyn RecordStore>,
    run_timeout: Duration,
    run_lock: Mutex<()>,
    state: RwLock<RunState>,
    last_report: RwLock<Option<RunReport>>,
}

impl SyncOrchestrator {
    pub fn new(
        source: Arc<dyn RecordSource>,
        store: Arc<dyn RecordStore>,
        run_timeout: Duration,
    ) -> Self {
        Self {
            source,
            store,
            run_timeout,
            run_lock: Mutex::new(()),
            state: RwLock::new(RunState::Idle),
            last_report: RwLock::new(None),
        }
    }

    pub async fn is_running(&self) -> bool {
        self.state().await == RunState::Running
    }

    pub async fn state(&self) -> RunState {
        *self.state.read().await
    }

    pub async fn last_report(&self) -> Option<RunReport> {
        self.last_report.read().await.clone()
    }

    /// Sync every stream once. Rejected if another run is in flight.
    pub async fn run_all(&self) -> Result<RunReport, SyncError> {
        let _guard = self.run_lock.try_lock().map_err(|_| SyncError::AlreadyRunning)?;
        *self.state.write().await = RunState::Running;

        let started_at = Utc::now();
        let clock = tokio::time::Instant::now();
        tracing::info!("Sync run started");

        let mut streams = Vec::with_capacity(ResourceStream::ALL.len());
        let timed_out = tokio::time::timeout(self.run_timeout, self.sync_streams(&mut streams))
            .await
            .is_err();

        let status = if timed_out {
            RunState::Failed
        } else if streams.iter().any(|r| r.status == StreamStatus::Failed) {
            RunState::PartiallyFailed
        } else {
            RunState::Completed
        };

        let report = RunReport {
            started_at,
            finished_at: Utc::now(),
            elapsed_ms: clock.elapsed().as_millis() as u64,
            status,
            streams,
        };

        if timed_out {
            tracing::error!(
                timeout_secs = self.run_timeout.as_secs(),
                completed_streams = report.streams.len(),
                elapsed_ms = report.elapsed_ms,
                "Sync run timed out"
            );
        } else {
            tracing::info!(
                status = ?report.status,
                saved = report.streams.iter().map(|r| r.saved).sum::<usize>(),
                skipped = report.streams.iter().map(|r| r.skipped).sum::<usize>(),
                elapsed_ms = report.elapsed_ms,
                "Sync run finished"
            );
        }

        *self.state.write().await = status;
        *self.last_report.write().await = Some(report.clone());
        Ok(report)
    }

    async fn sync_streams(&self, reports: &mut Vec<StreamReport>) {
        for stream in ResourceStream::ALL {
            reports.push(self.sync_stream(stream).await);
        }
    }

    /// Failure boundary for one stream.
    async fn sync_stream(&self, stream: ResourceStream) -> StreamReport {
        let clock = tokio::time::Instant::now();
        let mut report = StreamReport::new(stream);

        if let Err(e) = self.try_sync_stream(stream, &mut report).await {
            tracing::error!(stream = %stream, error = %e, "Stream sync failed");
            report.status = StreamStatus::Failed;
            report.error = Some(e.to_string());
        }

        tracing::info!(
            stream = %stream,
            fetched = report.fetched,
            saved = report.saved,
            skipped = report.skipped,
            degraded = report.degraded,
            elapsed_ms = clock.elapsed().as_millis() as u64,
            "Stream sync finished"
        );
        report
    }

    async fn try_sync_stream(
        &self,
        stream: ResourceStream,
        report: &mut StreamReport,
    ) -> Result<(), SyncError> {
        let watermark = self.store.find_latest_updated_at(stream).await?;
        if watermark.is_none() {
            tracing::info!(stream = %stream, "No local records, fetching full history");
        }

        let outcome = self.source.fetch_since(stream, watermark).await?;
        report.fetched = outcome.records.len();
        if outcome.degraded {
            report.degraded = true;
            report.status = StreamStatus::Degraded;
            return Ok(());
        }

        let mut mapped = Vec::with_capacity(outcome.records.len());
        for raw in &outcome.records {
            match map_record(stream, raw) {
                Ok(record) => mapped.push(record),
                Err(e) => {
                    tracing::warn!(stream = %stream, error = %e, "Skipping invalid record");
                    report.skipped += 1;
                }
            }
        }

        // Oldest first: a failed write must leave the watermark behind it.
        mapped.sort_by_key(|record| record.updated_at());
        for record in &mapped {
            self.store.upsert(record).await?;
            report.saved += 1;
        }
        Ok(())
    }
}
