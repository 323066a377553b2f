//! Rollback: redeploy the artifact of an earlier successful deployment.
//!
//! A rollback is an ordinary deployment record that starts with
//! `docker_image` and `rollback_from_id` set; the executor sees that and skips
//! the build phase.

use sea_orm::DatabaseConnection;

use crate::error::{AppError, PipelineError, Result};
use crate::models::deployment::{self, DeploymentSource, DeploymentStatus};
use crate::services::queue::SharedQueue;
use crate::services::store::{self, NewDeployment};

/// A target is eligible when it succeeded and produced an image
pub fn check_eligible(target: &deployment::Model) -> std::result::Result<&str, PipelineError> {
    if target.status() != Some(DeploymentStatus::Succeeded) {
        return Err(PipelineError::NotEligible {
            id: target.id,
            reason: format!("status is {}", target.status),
        });
    }

    match target.docker_image.as_deref() {
        Some(image) if !image.is_empty() => Ok(image),
        _ => Err(PipelineError::NotEligible {
            id: target.id,
            reason: "no image was recorded".to_string(),
        }),
    }
}

pub struct RollbackCoordinator {
    db: DatabaseConnection,
    queue: SharedQueue,
}

impl RollbackCoordinator {
    pub fn new(db: DatabaseConnection, queue: SharedQueue) -> Self {
        Self { db, queue }
    }

    /// Create and enqueue a rollback to `target_id`. Nothing is written when
    /// the target is not eligible.
    pub async fn rollback(&self, target_id: i64) -> Result<deployment::Model> {
        let target = store::find(&self.db, target_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Deployment {} not found", target_id)))?;

        let image = check_eligible(&target)?.to_string();

        let record = store::create_deployment(
            &self.db,
            NewDeployment {
                project_id: target.project_id,
                source: DeploymentSource::Rollback,
                commit_hash: target.commit_hash.clone(),
                commit_message: target.commit_message.clone(),
                branch: target.branch.clone(),
                docker_image: Some(image),
                rollback_from_id: Some(target.id),
            },
        )
        .await?;

        tracing::info!(
            deployment_id = record.id,
            project_id = record.project_id,
            rollback_from = target.id,
            "Rollback queued"
        );

        if let Err(e) = self.queue.enqueue(record.id).await {
            tracing::warn!(
                deployment_id = record.id,
                "Failed to enqueue rollback, it will be picked up by the requeue task: {}",
                e
            );
        }

        Ok(record)
    }
}
