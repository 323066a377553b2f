//! Periodic task scheduler
//!
//! Runs background maintenance at regular intervals. Add new tasks by
//! implementing the `PeriodicTask` trait.

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::DatabaseConnection;
use std::time::Duration;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use crate::services::queue::SharedQueue;
use crate::services::store;

/// Trait for periodic background tasks
#[async_trait]
pub trait PeriodicTask: Send + Sync {
    /// Task name for logging
    fn name(&self) -> &'static str;

    /// How often to run
    fn interval(&self) -> Duration;

    /// Execute the task
    async fn run(&self, db: &DatabaseConnection) -> anyhow::Result<()>;
}

/// Start all periodic tasks; they stop when `cancel` fires
pub fn start_scheduler(
    db: DatabaseConnection,
    tasks: Vec<Box<dyn PeriodicTask>>,
    cancel: CancellationToken,
) {
    for task in tasks {
        let db = db.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = run_task(task, db) => {}
            }
        });
    }

    tracing::info!("Periodic task scheduler started");
}

/// Run a single task on its interval
async fn run_task(task: Box<dyn PeriodicTask>, db: DatabaseConnection) {
    let mut ticker = interval(task.interval());

    // Skip the first immediate tick
    ticker.tick().await;

    loop {
        ticker.tick().await;

        tracing::debug!(task = task.name(), "Running periodic task");

        match task.run(&db).await {
            Ok(()) => {
                tracing::debug!(task = task.name(), "Periodic task completed");
            }
            Err(e) => {
                tracing::error!(task = task.name(), error = %e, "Periodic task failed");
            }
        }
    }
}

// ============================================================================
// Requeue Task
// ============================================================================

/// Re-enqueues records stuck in `queued` with no job behind them.
///
/// Covers jobs lost with an in-memory queue and crashes between inserting a
/// record and enqueueing it.
pub struct RequeueQueuedTask {
    pub queue: SharedQueue,
    pub older_than: Duration,
}

#[async_trait]
impl PeriodicTask for RequeueQueuedTask {
    fn name(&self) -> &'static str {
        "requeue_queued"
    }

    fn interval(&self) -> Duration {
        (self.older_than / 2).max(Duration::from_secs(10))
    }

    async fn run(&self, db: &DatabaseConnection) -> anyhow::Result<()> {
        let cutoff = Utc::now() - chrono::Duration::from_std(self.older_than)?;

        let mut requeued = 0;
        for deployment_id in store::queued_before(db, cutoff).await? {
            if self.queue.is_pending(deployment_id).await? {
                continue;
            }
            self.queue.enqueue(deployment_id).await?;
            requeued += 1;
        }

        if requeued > 0 {
            tracing::info!(requeued, "Re-enqueued orphaned deployments");
        }

        Ok(())
    }
}
