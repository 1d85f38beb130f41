// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Fixed-interval trigger for sync runs.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::sync::{SyncError, SyncOrchestrator};

/// Spawn a task that calls [`SyncOrchestrator::run_all`] every `interval`,
/// starting immediately. Ticks missed during a long run are skipped.
pub fn spawn_scheduler(orchestrator: Arc<SyncOrchestrator>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(interval_secs = interval.as_secs(), "Sync scheduler started");

        loop {
            ticker.tick().await;
            match orchestrator.run_all().await {
                Ok(_) => {}
                Err(SyncError::AlreadyRunning) => {
                    tracing::info!("Previous sync run still in progress, skipping tick");
                }
                Err(e) => tracing::error!(error = %e, "Scheduled sync run failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryDb;
    use crate::models::ResourceStream;
    use crate::services::whoop::{ApiError, FetchOutcome, RecordSource};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct CountingSource {
        calls: AtomicU32,
    }

    #[async_trait]
    impl RecordSource for CountingSource {
        async fn fetch_since(
            &self,
            _stream: ResourceStream,
            _since: Option<DateTime<Utc>>,
        ) -> Result<FetchOutcome, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(FetchOutcome::default())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_immediately_and_on_each_tick() {
        let source = Arc::new(CountingSource::default());
        let orchestrator = Arc::new(SyncOrchestrator::new(
            source.clone(),
            Arc::new(MemoryDb::new()),
            Duration::from_secs(60),
        ));

        let handle = spawn_scheduler(orchestrator, Duration::from_secs(600));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 4);

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 8);

        handle.abort();
    }
}
