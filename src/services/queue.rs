//! At-least-once delivery of "process deployment N" jobs.
//!
//! A delivery must be acked once the executor has returned (whatever the
//! outcome) and nacked when processing hit an infrastructure error. Jobs that
//! are neither come back after the visibility timeout on the database queue.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sea_orm::sea_query::{Condition, Expr};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use tokio::sync::mpsc;

use crate::error::{AppError, Result};
use crate::models::deployment_job;
use crate::models::prelude::*;
use crate::services::clock::{Clock, SystemClock};

/// One leased instance of a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub deployment_id: i64,
    /// 1 on first delivery
    pub attempt: i32,
    /// Backing job row, for queues that have one
    pub receipt: Option<i64>,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, deployment_id: i64) -> Result<()>;

    /// Next available job, or `None` when the queue is empty right now
    async fn dequeue(&self) -> Result<Option<Delivery>>;

    async fn ack(&self, delivery: &Delivery) -> Result<()>;

    /// Hand the job back for redelivery
    async fn nack(&self, delivery: &Delivery) -> Result<()>;

    /// Whether a job for `deployment_id` is waiting or in flight
    async fn is_pending(&self, deployment_id: i64) -> Result<bool>;
}

pub type SharedQueue = Arc<dyn JobQueue>;

// ============================================================================
// In-memory queue
// ============================================================================

/// Single-process queue on a tokio channel. Jobs are lost on restart; the
/// requeue task recovers their records.
pub struct InMemoryQueue {
    tx: mpsc::UnboundedSender<Delivery>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Delivery>>,
    pending: Mutex<HashMap<i64, usize>>,
    max_deliveries: i32,
}

impl InMemoryQueue {
    pub fn new(max_deliveries: i32) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
            pending: Mutex::new(HashMap::new()),
            max_deliveries: max_deliveries.max(1),
        }
    }

    fn push(&self, delivery: Delivery) -> Result<()> {
        let deployment_id = delivery.deployment_id;
        self.tx
            .send(delivery)
            .map_err(|_| AppError::ServiceUnavailable("Job queue is closed".to_string()))?;
        *self.pending.lock().entry(deployment_id).or_insert(0) += 1;
        Ok(())
    }

    fn settle(&self, deployment_id: i64) {
        let mut pending = self.pending.lock();
        if let Some(count) = pending.get_mut(&deployment_id) {
            *count -= 1;
            if *count == 0 {
                pending.remove(&deployment_id);
            }
        }
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new(5)
    }
}

#[async_trait]
impl JobQueue for InMemoryQueue {
    async fn enqueue(&self, deployment_id: i64) -> Result<()> {
        self.push(Delivery {
            deployment_id,
            attempt: 1,
            receipt: None,
        })
    }

    async fn dequeue(&self) -> Result<Option<Delivery>> {
        let mut rx = self.rx.lock().await;
        Ok(rx.try_recv().ok())
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        self.settle(delivery.deployment_id);
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery) -> Result<()> {
        self.settle(delivery.deployment_id);
        if delivery.attempt >= self.max_deliveries {
            tracing::warn!(
                deployment_id = delivery.deployment_id,
                attempts = delivery.attempt,
                "Dropping job after repeated failures"
            );
            return Ok(());
        }
        self.push(Delivery {
            deployment_id: delivery.deployment_id,
            attempt: delivery.attempt + 1,
            receipt: None,
        })
    }

    async fn is_pending(&self, deployment_id: i64) -> Result<bool> {
        Ok(self.pending.lock().contains_key(&deployment_id))
    }
}

// ============================================================================
// Database queue
// ============================================================================

/// Queue stored in `deployment_jobs`, shared by every process on the same
/// database.
///
/// Dequeue takes a lease by conditionally updating `locked_until` from the
/// value it read, so two workers can never hold the same job at once.
pub struct DatabaseQueue {
    db: DatabaseConnection,
    worker_id: String,
    visibility_timeout: Duration,
    retry_delay: Duration,
    max_deliveries: i32,
    clock: Arc<dyn Clock>,
}

impl DatabaseQueue {
    pub fn new(db: DatabaseConnection, worker_id: impl Into<String>) -> Self {
        Self {
            db,
            worker_id: worker_id.into(),
            visibility_timeout: Duration::from_secs(45 * 60),
            retry_delay: Duration::from_secs(5),
            max_deliveries: 5,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_max_deliveries(mut self, max: i32) -> Self {
        self.max_deliveries = max.max(1);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn chrono(duration: Duration) -> chrono::Duration {
        chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(365))
    }
}

/// Lease races lost in a row before dequeue reports the queue empty
const LEASE_RETRIES: usize = 3;

#[async_trait]
impl JobQueue for DatabaseQueue {
    async fn enqueue(&self, deployment_id: i64) -> Result<()> {
        let now = self.clock.now();
        let job = deployment_job::ActiveModel {
            deployment_id: Set(deployment_id),
            attempts: Set(0),
            available_at: Set(now),
            locked_until: Set(None),
            locked_by: Set(None),
            created_at: Set(now),
            ..Default::default()
        };
        job.insert(&self.db).await?;
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<Delivery>> {
        for _ in 0..LEASE_RETRIES {
            let now = self.clock.now();
            let candidate = DeploymentJob::find()
                .filter(deployment_job::Column::AvailableAt.lte(now))
                .filter(
                    Condition::any()
                        .add(deployment_job::Column::LockedUntil.is_null())
                        .add(deployment_job::Column::LockedUntil.lt(now)),
                )
                .order_by_asc(deployment_job::Column::AvailableAt)
                .order_by_asc(deployment_job::Column::Id)
                .one(&self.db)
                .await?;

            let Some(job) = candidate else {
                return Ok(None);
            };

            let lease = DeploymentJob::update_many()
                .col_expr(
                    deployment_job::Column::LockedUntil,
                    Expr::value(now + Self::chrono(self.visibility_timeout)),
                )
                .col_expr(
                    deployment_job::Column::LockedBy,
                    Expr::value(self.worker_id.clone()),
                )
                .col_expr(
                    deployment_job::Column::Attempts,
                    Expr::col(deployment_job::Column::Attempts).add(1),
                )
                .filter(deployment_job::Column::Id.eq(job.id));

            let lease = match job.locked_until {
                None => lease.filter(deployment_job::Column::LockedUntil.is_null()),
                Some(previous) => lease.filter(deployment_job::Column::LockedUntil.eq(previous)),
            };

            if lease.exec(&self.db).await?.rows_affected == 1 {
                return Ok(Some(Delivery {
                    deployment_id: job.deployment_id,
                    attempt: job.attempts + 1,
                    receipt: Some(job.id),
                }));
            }
            // Another worker leased it between our read and write
        }

        Ok(None)
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        if let Some(id) = delivery.receipt {
            DeploymentJob::delete_by_id(id).exec(&self.db).await?;
        }
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery) -> Result<()> {
        let Some(id) = delivery.receipt else {
            return Ok(());
        };

        if delivery.attempt >= self.max_deliveries {
            tracing::warn!(
                deployment_id = delivery.deployment_id,
                attempts = delivery.attempt,
                "Dropping job after repeated failures"
            );
            DeploymentJob::delete_by_id(id).exec(&self.db).await?;
            return Ok(());
        }

        let delay = self.retry_delay * delivery.attempt.max(1) as u32;
        DeploymentJob::update_many()
            .col_expr(
                deployment_job::Column::AvailableAt,
                Expr::value(self.clock.now() + Self::chrono(delay)),
            )
            .col_expr(
                deployment_job::Column::LockedUntil,
                Expr::value(Option::<chrono::DateTime<chrono::Utc>>::None),
            )
            .col_expr(
                deployment_job::Column::LockedBy,
                Expr::value(Option::<String>::None),
            )
            .filter(deployment_job::Column::Id.eq(id))
            .filter(deployment_job::Column::LockedBy.eq(self.worker_id.clone()))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn is_pending(&self, deployment_id: i64) -> Result<bool> {
        let count = DeploymentJob::find()
            .filter(deployment_job::Column::DeploymentId.eq(deployment_id))
            .count(&self.db)
            .await?;
        Ok(count > 0)
    }
}
