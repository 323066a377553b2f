//! Job queue, worker and requeue task integration tests
//!
//! Covers:
//! - database queue leases are exclusive across workers
//! - expired leases and nacked jobs are redelivered
//! - jobs are dropped after the delivery limit
//! - worker helpers ack on completion
//! - the worker pool drains the queue and stops on cancel
//! - the requeue task recovers records with no job

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

mod common;
use common::{
    create_queued_deployment, create_test_db, create_test_project, default_executor, test_clock,
};

use dockyard::models::deployment::DeploymentStatus;
use dockyard::services::queue::{DatabaseQueue, InMemoryQueue, JobQueue, SharedQueue};
use dockyard::services::scheduler::{PeriodicTask, RequeueQueuedTask};
use dockyard::services::store;
use dockyard::services::worker::{handle_delivery, run_next};
use dockyard::services::{ProcessOutcome, WorkerPool};

// ============================================================================
// Database queue
// ============================================================================

#[tokio::test]
async fn test_database_queue_lease_is_exclusive() {
    let db = create_test_db().await;
    let clock = test_clock();
    let first = DatabaseQueue::new(db.clone(), "worker-a").with_clock(clock.clone());
    let second = DatabaseQueue::new(db.clone(), "worker-b").with_clock(clock.clone());

    first.enqueue(11).await.unwrap();
    assert!(first.is_pending(11).await.unwrap());

    let delivery = first.dequeue().await.unwrap().expect("job available");
    assert_eq!(delivery.deployment_id, 11);
    assert_eq!(delivery.attempt, 1);
    assert!(delivery.receipt.is_some());

    assert!(second.dequeue().await.unwrap().is_none(), "job is leased");
    assert!(second.is_pending(11).await.unwrap(), "leased jobs are pending");

    first.ack(&delivery).await.unwrap();
    assert!(!first.is_pending(11).await.unwrap());
    assert!(second.dequeue().await.unwrap().is_none());
}

#[tokio::test]
async fn test_database_queue_expired_lease_is_redelivered() {
    let db = create_test_db().await;
    let clock = test_clock();
    let crashed = DatabaseQueue::new(db.clone(), "worker-a")
        .with_clock(clock.clone())
        .with_visibility_timeout(Duration::from_secs(60));
    let survivor = DatabaseQueue::new(db.clone(), "worker-b")
        .with_clock(clock.clone())
        .with_visibility_timeout(Duration::from_secs(60));

    crashed.enqueue(5).await.unwrap();
    crashed.dequeue().await.unwrap().expect("job available");

    clock.advance_secs(30);
    assert!(survivor.dequeue().await.unwrap().is_none());

    clock.advance_secs(31);
    let redelivered = survivor.dequeue().await.unwrap().expect("lease expired");
    assert_eq!(redelivered.deployment_id, 5);
    assert_eq!(redelivered.attempt, 2);
}

#[tokio::test]
async fn test_database_queue_nack_backs_off() {
    let db = create_test_db().await;
    let clock = test_clock();
    let queue = DatabaseQueue::new(db.clone(), "worker-a")
        .with_clock(clock.clone())
        .with_retry_delay(Duration::from_secs(10));

    queue.enqueue(3).await.unwrap();
    let delivery = queue.dequeue().await.unwrap().unwrap();
    queue.nack(&delivery).await.unwrap();

    assert!(queue.dequeue().await.unwrap().is_none(), "still backing off");
    clock.advance_secs(11);

    let again = queue.dequeue().await.unwrap().expect("backoff elapsed");
    assert_eq!(again.attempt, 2);
}

#[tokio::test]
async fn test_database_queue_drops_after_max_deliveries() {
    let db = create_test_db().await;
    let queue = DatabaseQueue::new(db.clone(), "worker-a")
        .with_clock(test_clock())
        .with_max_deliveries(1);

    queue.enqueue(8).await.unwrap();
    let delivery = queue.dequeue().await.unwrap().unwrap();
    queue.nack(&delivery).await.unwrap();

    assert!(!queue.is_pending(8).await.unwrap());
    assert!(queue.dequeue().await.unwrap().is_none());
}

// ============================================================================
// Workers
// ============================================================================

#[tokio::test]
async fn test_run_next_processes_and_acks() {
    let db = create_test_db().await;
    let project = create_test_project(&db, "app").await;
    let record = create_queued_deployment(&db, project.id, "abc123").await;

    let queue: SharedQueue = Arc::new(InMemoryQueue::default());
    queue.enqueue(record.id).await.unwrap();
    let executor = default_executor(&db);

    let outcome = run_next(&executor, &queue).await.unwrap();
    assert_eq!(outcome, Some(ProcessOutcome::Succeeded));
    assert!(!queue.is_pending(record.id).await.unwrap());
    assert_eq!(run_next(&executor, &queue).await.unwrap(), None);
}

#[tokio::test]
async fn test_duplicate_delivery_is_acked_without_rerun() {
    let db = create_test_db().await;
    let project = create_test_project(&db, "app").await;
    let record = create_queued_deployment(&db, project.id, "abc123").await;

    let queue: SharedQueue = Arc::new(DatabaseQueue::new(db.clone(), "worker-a"));
    queue.enqueue(record.id).await.unwrap();
    queue.enqueue(record.id).await.unwrap();
    let executor = default_executor(&db);

    let first = queue.dequeue().await.unwrap().unwrap();
    let second = queue.dequeue().await.unwrap().unwrap();

    assert_eq!(
        handle_delivery(&executor, &queue, first).await,
        Some(ProcessOutcome::Succeeded)
    );
    assert_eq!(
        handle_delivery(&executor, &queue, second).await,
        Some(ProcessOutcome::AlreadyFinished)
    );
    assert!(!queue.is_pending(record.id).await.unwrap());
}

#[tokio::test]
async fn test_worker_pool_drains_queue() {
    let db = create_test_db().await;
    let project = create_test_project(&db, "app").await;
    let queue: SharedQueue = Arc::new(InMemoryQueue::default());

    let mut ids = Vec::new();
    for commit in ["aaa111", "bbb222", "ccc333"] {
        let record = create_queued_deployment(&db, project.id, commit).await;
        queue.enqueue(record.id).await.unwrap();
        ids.push(record.id);
    }

    let cancel = CancellationToken::new();
    let handle = WorkerPool::new(
        Arc::new(default_executor(&db)),
        queue.clone(),
        2,
        Duration::from_millis(10),
        cancel.clone(),
    )
    .spawn();

    let all_finished = async {
        loop {
            let mut finished = 0;
            for id in &ids {
                if store::get(&db, *id).await.unwrap().is_finished() {
                    finished += 1;
                }
            }
            if finished == ids.len() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(10), all_finished)
        .await
        .expect("worker pool did not finish the queue");

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("worker pool did not stop")
        .unwrap();

    for id in &ids {
        let record = store::get(&db, *id).await.unwrap();
        assert_eq!(record.status(), Some(DeploymentStatus::Succeeded));
    }
    let current = store::current_production(&db, project.id).await.unwrap();
    assert!(current.is_some());
}

// ============================================================================
// Requeue task
// ============================================================================

#[tokio::test]
async fn test_requeue_task_recovers_orphaned_records() {
    let db = create_test_db().await;
    let project = create_test_project(&db, "app").await;
    let orphan = create_queued_deployment(&db, project.id, "abc123").await;

    let queue: SharedQueue = Arc::new(InMemoryQueue::default());
    let task = RequeueQueuedTask {
        queue: queue.clone(),
        older_than: Duration::ZERO,
    };
    assert_eq!(task.interval(), Duration::from_secs(10));

    task.run(&db).await.unwrap();
    assert!(queue.is_pending(orphan.id).await.unwrap());

    // Already pending, so a second pass adds nothing
    task.run(&db).await.unwrap();
    let delivery = queue.dequeue().await.unwrap().unwrap();
    assert_eq!(delivery.deployment_id, orphan.id);
    assert!(queue.dequeue().await.unwrap().is_none());
}

#[tokio::test]
async fn test_requeue_task_ignores_recent_and_finished_records() {
    let db = create_test_db().await;
    let project = create_test_project(&db, "app").await;
    let finished = create_queued_deployment(&db, project.id, "aaa111").await;
    default_executor(&db).process(finished.id).await.unwrap();
    let recent = create_queued_deployment(&db, project.id, "bbb222").await;

    let queue: SharedQueue = Arc::new(InMemoryQueue::default());
    let task = RequeueQueuedTask {
        queue: queue.clone(),
        older_than: Duration::from_secs(3600),
    };
    task.run(&db).await.unwrap();

    assert!(!queue.is_pending(finished.id).await.unwrap());
    assert!(!queue.is_pending(recent.id).await.unwrap());
}
