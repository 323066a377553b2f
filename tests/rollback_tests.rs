//! Production pointer and rollback integration tests
//!
//! Covers:
//! - exactly one current production deployment per project
//! - a failed deployment leaves the previous production in place
//! - rollback reuses the target image and skips the build
//! - ineligible and missing rollback targets are rejected without writes

use std::sync::Arc;
use std::time::Duration;

use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};

mod common;
use common::{
    build_executor, create_queued_deployment, create_test_db, create_test_project,
    fast_settings, test_clock, ScriptedBuilder, ScriptedDeployer,
};

use dockyard::error::{AppError, PipelineError};
use dockyard::models::deployment::{self, DeploymentSource, DeploymentStatus};
use dockyard::models::prelude::*;
use dockyard::services::collaborators::CollaboratorError;
use dockyard::services::queue::{InMemoryQueue, SharedQueue};
use dockyard::services::poller;
use dockyard::services::store;
use dockyard::services::{ProcessOutcome, RollbackCoordinator, StatusNotifier};

async fn production_count(db: &sea_orm::DatabaseConnection, project_id: i64) -> u64 {
    Deployment::find()
        .filter(deployment::Column::ProjectId.eq(project_id))
        .filter(deployment::Column::IsCurrentProduction.eq(true))
        .count(db)
        .await
        .unwrap()
}

// ============================================================================
// Production pointer
// ============================================================================

#[tokio::test]
async fn test_newest_success_becomes_production() {
    let db = create_test_db().await;
    let project = create_test_project(&db, "app").await;
    let other = create_test_project(&db, "other").await;
    let clock = test_clock();
    let executor = build_executor(
        &db,
        Arc::new(ScriptedBuilder::new(clock.clone())),
        Arc::new(ScriptedDeployer::new(clock.clone())),
        StatusNotifier::new(db.clone(), Duration::from_secs(1)),
        clock,
        fast_settings(),
    );

    let elsewhere = create_queued_deployment(&db, other.id, "fff000").await;
    executor.process(elsewhere.id).await.unwrap();

    let mut last = 0;
    for commit in ["aaa111", "bbb222", "ccc333"] {
        let record = create_queued_deployment(&db, project.id, commit).await;
        assert_eq!(
            executor.process(record.id).await.unwrap(),
            ProcessOutcome::Succeeded
        );
        assert_eq!(production_count(&db, project.id).await, 1);
        last = record.id;
    }

    let current = store::current_production(&db, project.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(current.id, last);
    assert_eq!(
        store::get_project(&db, project.id)
            .await
            .unwrap()
            .current_deployment_id,
        Some(last)
    );

    // Other projects keep their own pointer
    assert_eq!(production_count(&db, other.id).await, 1);
    assert!(store::get(&db, elsewhere.id).await.unwrap().is_current_production);
}

#[tokio::test]
async fn test_concurrent_successes_leave_one_production() {
    let db = create_test_db().await;
    let project = create_test_project(&db, "app").await;
    let first = create_queued_deployment(&db, project.id, "aaa111").await;
    let second = create_queued_deployment(&db, project.id, "bbb222").await;

    let clock = test_clock();
    let executor = build_executor(
        &db,
        Arc::new(ScriptedBuilder::new(clock.clone()).sleeping(Duration::from_millis(20))),
        Arc::new(ScriptedDeployer::new(clock.clone()).sleeping(Duration::from_millis(20))),
        StatusNotifier::new(db.clone(), Duration::from_secs(1)),
        clock,
        fast_settings(),
    );

    let (a, b) = tokio::join!(executor.process(first.id), executor.process(second.id));
    assert_eq!(a.unwrap(), ProcessOutcome::Succeeded);
    assert_eq!(b.unwrap(), ProcessOutcome::Succeeded);

    assert_eq!(production_count(&db, project.id).await, 1);
    let current = store::current_production(&db, project.id)
        .await
        .unwrap()
        .unwrap();
    let project = store::get_project(&db, project.id).await.unwrap();
    assert_eq!(project.current_deployment_id, Some(current.id));
}

#[tokio::test]
async fn test_failed_deploy_keeps_previous_production() {
    let db = create_test_db().await;
    let project = create_test_project(&db, "app").await;
    let clock = test_clock();
    let deployer = Arc::new(
        ScriptedDeployer::new(clock.clone())
            .then(Ok(()))
            .then(Err(CollaboratorError::failed("readiness probe failed"))),
    );
    let executor = build_executor(
        &db,
        Arc::new(ScriptedBuilder::new(clock.clone())),
        deployer,
        StatusNotifier::new(db.clone(), Duration::from_secs(1)),
        clock,
        fast_settings(),
    );

    let good = create_queued_deployment(&db, project.id, "aaa111").await;
    executor.process(good.id).await.unwrap();
    let bad = create_queued_deployment(&db, project.id, "bbb222").await;
    assert_eq!(
        executor.process(bad.id).await.unwrap(),
        ProcessOutcome::Failed
    );

    let current = store::current_production(&db, project.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(current.id, good.id);
    assert!(!store::get(&db, bad.id).await.unwrap().is_current_production);
}

// ============================================================================
// Rollback
// ============================================================================

#[tokio::test]
async fn test_rollback_redeploys_previous_image() {
    let db = create_test_db().await;
    let project = create_test_project(&db, "app").await;
    let clock = test_clock();
    let builder = Arc::new(ScriptedBuilder::new(clock.clone()));
    let deployer = Arc::new(ScriptedDeployer::new(clock.clone()).taking(4));
    let executor = build_executor(
        &db,
        builder.clone(),
        deployer.clone(),
        StatusNotifier::new(db.clone(), Duration::from_secs(1)),
        clock,
        fast_settings(),
    );

    let v1 = create_queued_deployment(&db, project.id, "aaa111").await;
    executor.process(v1.id).await.unwrap();
    let v2 = create_queued_deployment(&db, project.id, "bbb222").await;
    executor.process(v2.id).await.unwrap();
    assert_eq!(builder.calls(), 2);

    let queue: SharedQueue = Arc::new(InMemoryQueue::default());
    let coordinator = RollbackCoordinator::new(db.clone(), queue.clone());
    let rollback = coordinator.rollback(v1.id).await.unwrap();

    assert_eq!(rollback.status(), Some(DeploymentStatus::Queued));
    assert_eq!(rollback.source, DeploymentSource::Rollback.as_str());
    assert_eq!(rollback.rollback_from_id, Some(v1.id));
    assert_eq!(rollback.commit_hash, "aaa111");
    assert_eq!(rollback.docker_image.as_deref(), Some("registry/app:aaa111"));
    assert!(queue.is_pending(rollback.id).await.unwrap());

    assert_eq!(
        executor.process(rollback.id).await.unwrap(),
        ProcessOutcome::Succeeded
    );
    assert_eq!(builder.calls(), 2, "rollbacks never rebuild");
    assert_eq!(
        deployer.deployed_images().last().map(String::as_str),
        Some("registry/app:aaa111")
    );

    let done = store::get(&db, rollback.id).await.unwrap();
    assert!(done.is_current_production);
    assert!(done.build_duration_seconds.is_none());
    assert_eq!(done.deploy_duration_seconds, Some(4));
    let view = poller::poll(&db, rollback.id).await.unwrap();
    assert!(view.build_logs.is_empty());
    assert!(!store::get(&db, v1.id).await.unwrap().is_current_production);
    assert!(!store::get(&db, v2.id).await.unwrap().is_current_production);
    assert_eq!(production_count(&db, project.id).await, 1);
}

#[tokio::test]
async fn test_rollback_to_failed_deployment_is_rejected() {
    let db = create_test_db().await;
    let project = create_test_project(&db, "app").await;
    let clock = test_clock();
    let executor = build_executor(
        &db,
        Arc::new(
            ScriptedBuilder::new(clock.clone())
                .then(Err(CollaboratorError::failed("no Dockerfile"))),
        ),
        Arc::new(ScriptedDeployer::new(clock.clone())),
        StatusNotifier::new(db.clone(), Duration::from_secs(1)),
        clock,
        fast_settings(),
    );

    let failed = create_queued_deployment(&db, project.id, "aaa111").await;
    executor.process(failed.id).await.unwrap();

    let queue: SharedQueue = Arc::new(InMemoryQueue::default());
    let coordinator = RollbackCoordinator::new(db.clone(), queue.clone());
    let err = coordinator.rollback(failed.id).await.unwrap_err();

    assert!(
        matches!(
            err,
            AppError::Pipeline(PipelineError::NotEligible { id, .. }) if id == failed.id
        ),
        "got {:?}",
        err
    );
    assert_eq!(Deployment::find().count(&db).await.unwrap(), 1);
}

#[tokio::test]
async fn test_rollback_to_queued_deployment_is_rejected() {
    let db = create_test_db().await;
    let project = create_test_project(&db, "app").await;
    let queued = create_queued_deployment(&db, project.id, "aaa111").await;

    let coordinator = RollbackCoordinator::new(db.clone(), Arc::new(InMemoryQueue::default()));
    let err = coordinator.rollback(queued.id).await.unwrap_err();
    assert!(matches!(
        err,
        AppError::Pipeline(PipelineError::NotEligible { .. })
    ));
}

#[tokio::test]
async fn test_rollback_to_missing_deployment() {
    let db = create_test_db().await;
    let coordinator = RollbackCoordinator::new(db.clone(), Arc::new(InMemoryQueue::default()));
    let err = coordinator.rollback(42).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}
