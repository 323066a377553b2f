//! Worker pool that feeds queued jobs to the pipeline executor.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::services::pipeline::{PipelineExecutor, ProcessOutcome};
use crate::services::queue::{Delivery, SharedQueue};

const TRACING_TARGET: &str = "dockyard::worker";

/// Dequeues jobs and runs up to `workers` pipelines at once.
///
/// A permit is taken before each dequeue so the pool never leases a job it
/// has no capacity to run.
pub struct WorkerPool {
    executor: Arc<PipelineExecutor>,
    queue: SharedQueue,
    workers: usize,
    poll_interval: Duration,
    cancel_token: CancellationToken,
}

impl WorkerPool {
    pub fn new(
        executor: Arc<PipelineExecutor>,
        queue: SharedQueue,
        workers: usize,
        poll_interval: Duration,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            executor,
            queue,
            workers: workers.max(1),
            poll_interval,
            cancel_token,
        }
    }

    /// Spawns the dispatch loop. The handle resolves once shutdown was
    /// requested and every in-flight run has finished.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(self) {
        tracing::info!(
            target: TRACING_TARGET,
            workers = self.workers,
            "Starting worker pool"
        );

        let semaphore = Arc::new(Semaphore::new(self.workers));

        loop {
            let permit = tokio::select! {
                biased;

                () = self.cancel_token.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let delivery = tokio::select! {
                biased;

                () = self.cancel_token.cancelled() => break,
                result = self.queue.dequeue() => result,
            };

            match delivery {
                Ok(Some(delivery)) => {
                    let executor = self.executor.clone();
                    let queue = self.queue.clone();
                    tokio::spawn(async move {
                        // Hold permit until the run completes
                        let _permit = permit;
                        handle_delivery(&executor, &queue, delivery).await;
                    });
                }
                Ok(None) => {
                    drop(permit);
                    self.idle().await;
                }
                Err(e) => {
                    drop(permit);
                    tracing::error!(
                        target: TRACING_TARGET,
                        error = %e,
                        "Failed to dequeue job"
                    );
                    self.idle().await;
                }
            }
        }

        tracing::info!(
            target: TRACING_TARGET,
            "Shutdown requested, waiting for in-flight deployments"
        );
        // Every permit back means every spawned run has finished
        let _ = semaphore.acquire_many(self.workers as u32).await;
        tracing::info!(target: TRACING_TARGET, "Worker pool stopped");
    }

    async fn idle(&self) {
        tokio::select! {
            () = self.cancel_token.cancelled() => {}
            () = tokio::time::sleep(self.poll_interval) => {}
        }
    }
}

/// Process one delivery and settle it with the queue.
///
/// Any `Ok` outcome acks, including claim conflicts and already finished
/// records. Store errors nack so the job is redelivered.
pub async fn handle_delivery(
    executor: &PipelineExecutor,
    queue: &SharedQueue,
    delivery: Delivery,
) -> Option<ProcessOutcome> {
    let deployment_id = delivery.deployment_id;
    tracing::debug!(
        target: TRACING_TARGET,
        deployment_id,
        attempt = delivery.attempt,
        "Processing job"
    );

    match executor.process(deployment_id).await {
        Ok(outcome) => {
            tracing::debug!(
                target: TRACING_TARGET,
                deployment_id,
                outcome = ?outcome,
                "Job completed"
            );
            if let Err(e) = queue.ack(&delivery).await {
                tracing::error!(
                    target: TRACING_TARGET,
                    deployment_id,
                    error = %e,
                    "Failed to ack job"
                );
            }
            Some(outcome)
        }
        Err(e) => {
            tracing::error!(
                target: TRACING_TARGET,
                deployment_id,
                attempt = delivery.attempt,
                error = %e,
                "Job failed, returning it to the queue"
            );
            if let Err(e) = queue.nack(&delivery).await {
                tracing::error!(
                    target: TRACING_TARGET,
                    deployment_id,
                    error = %e,
                    "Failed to nack job"
                );
            }
            None
        }
    }
}

/// Take and process the next job if there is one
pub async fn run_next(
    executor: &PipelineExecutor,
    queue: &SharedQueue,
) -> Result<Option<ProcessOutcome>> {
    match queue.dequeue().await? {
        Some(delivery) => Ok(handle_delivery(executor, queue, delivery).await),
        None => Ok(None),
    }
}
