//! Persistence for projects and deployment records.
//!
//! Every status change is a conditional update on the expected prior status.
//! A zero row count means another actor got there first and the caller must
//! treat the record as no longer its own.

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};

use crate::error::{AppError, Result};
use crate::models::deployment::{self, DeploymentSource, DeploymentStatus};
use crate::models::prelude::*;
use crate::models::project;

// ============================================================================
// Projects
// ============================================================================

#[derive(Debug, Clone)]
pub struct NewProject {
    pub name: String,
    pub repository_url: String,
    pub branch: String,
    pub webhook_secret: Option<String>,
}

pub async fn create_project(db: &DatabaseConnection, new: NewProject) -> Result<project::Model> {
    let existing = Project::find()
        .filter(project::Column::Name.eq(&new.name))
        .one(db)
        .await?;
    if existing.is_some() {
        return Err(AppError::Conflict(format!(
            "Project '{}' already exists",
            new.name
        )));
    }

    let now = Utc::now();
    let model = project::ActiveModel {
        name: Set(new.name),
        repository_url: Set(new.repository_url),
        branch: Set(new.branch),
        webhook_secret: Set(new.webhook_secret),
        current_deployment_id: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };

    Ok(model.insert(db).await?)
}

pub async fn find_project<C: ConnectionTrait>(db: &C, id: i64) -> Result<Option<project::Model>> {
    Ok(Project::find_by_id(id).one(db).await?)
}

/// Like [`find_project`] but a missing row is an error
pub async fn get_project<C: ConnectionTrait>(db: &C, id: i64) -> Result<project::Model> {
    find_project(db, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Project {} not found", id)))
}

pub async fn list_projects(db: &DatabaseConnection) -> Result<Vec<project::Model>> {
    Ok(Project::find()
        .order_by_asc(project::Column::Name)
        .all(db)
        .await?)
}

// ============================================================================
// Deployment records
// ============================================================================

#[derive(Debug, Clone)]
pub struct NewDeployment {
    pub project_id: i64,
    pub source: DeploymentSource,
    pub commit_hash: String,
    pub commit_message: Option<String>,
    pub branch: String,
    /// Only rollbacks start with an image
    pub docker_image: Option<String>,
    pub rollback_from_id: Option<i64>,
}

/// Insert a new record in `queued`
pub async fn create_deployment(
    db: &DatabaseConnection,
    new: NewDeployment,
) -> Result<deployment::Model> {
    let model = deployment::ActiveModel {
        project_id: Set(new.project_id),
        status: Set(DeploymentStatus::Queued.as_str().to_string()),
        source: Set(new.source.as_str().to_string()),
        commit_hash: Set(new.commit_hash),
        commit_message: Set(new.commit_message),
        branch: Set(new.branch),
        docker_image: Set(new.docker_image),
        build_duration_seconds: Set(None),
        deploy_duration_seconds: Set(None),
        error_message: Set(None),
        is_current_production: Set(false),
        rollback_from_id: Set(new.rollback_from_id),
        created_at: Set(Utc::now()),
        started_at: Set(None),
        finished_at: Set(None),
        ..Default::default()
    };

    Ok(model.insert(db).await?)
}

pub async fn find<C: ConnectionTrait>(db: &C, id: i64) -> Result<Option<deployment::Model>> {
    Ok(Deployment::find_by_id(id).one(db).await?)
}

/// Like [`find`] but a missing row is an error
pub async fn get<C: ConnectionTrait>(db: &C, id: i64) -> Result<deployment::Model> {
    find(db, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Deployment {} not found", id)))
}

/// One page of a project's deployments, newest first. `page` is 1-based.
pub async fn list_for_project(
    db: &DatabaseConnection,
    project_id: i64,
    page: u64,
    per_page: u64,
) -> Result<(Vec<deployment::Model>, u64)> {
    let paginator = Deployment::find()
        .filter(deployment::Column::ProjectId.eq(project_id))
        .order_by_desc(deployment::Column::CreatedAt)
        .order_by_desc(deployment::Column::Id)
        .paginate(db, per_page.max(1));

    let total = paginator.num_items().await?;
    let items = paginator.fetch_page(page.saturating_sub(1)).await?;
    Ok((items, total))
}

/// The deployment currently flagged as the project's production release
pub async fn current_production<C: ConnectionTrait>(
    db: &C,
    project_id: i64,
) -> Result<Option<deployment::Model>> {
    Ok(Deployment::find()
        .filter(deployment::Column::ProjectId.eq(project_id))
        .filter(deployment::Column::IsCurrentProduction.eq(true))
        .one(db)
        .await?)
}

/// Ids of records still `queued` that were created before `cutoff`
pub async fn queued_before(db: &DatabaseConnection, cutoff: DateTime<Utc>) -> Result<Vec<i64>> {
    let rows = Deployment::find()
        .filter(deployment::Column::Status.eq(DeploymentStatus::Queued.as_str()))
        .filter(deployment::Column::CreatedAt.lt(cutoff))
        .order_by_asc(deployment::Column::Id)
        .all(db)
        .await?;
    Ok(rows.into_iter().map(|d| d.id).collect())
}

// ============================================================================
// Transitions
// ============================================================================

/// Move `id` from `from` to `to`, applying the `Set` fields of `changes` in
/// the same statement. Returns `false` when the record was not in `from`.
pub async fn transition<C: ConnectionTrait>(
    db: &C,
    id: i64,
    from: DeploymentStatus,
    to: DeploymentStatus,
    mut changes: deployment::ActiveModel,
) -> Result<bool> {
    if !from.can_transition_to(to) {
        return Err(AppError::Internal(format!(
            "Invalid deployment transition {} -> {}",
            from, to
        )));
    }

    changes.status = Set(to.as_str().to_string());
    let result = Deployment::update_many()
        .set(changes)
        .filter(deployment::Column::Id.eq(id))
        .filter(deployment::Column::Status.eq(from.as_str()))
        .exec(db)
        .await?;

    Ok(result.rows_affected == 1)
}

/// Take ownership of a queued record. Exactly one caller wins.
pub async fn claim<C: ConnectionTrait>(
    db: &C,
    id: i64,
    to: DeploymentStatus,
    now: DateTime<Utc>,
) -> Result<bool> {
    transition(
        db,
        id,
        DeploymentStatus::Queued,
        to,
        deployment::ActiveModel {
            started_at: Set(Some(now)),
            ..Default::default()
        },
    )
    .await
}

/// Record the built image and hand the record to the deploy phase
pub async fn finish_build<C: ConnectionTrait>(
    db: &C,
    id: i64,
    image_ref: &str,
    build_secs: i64,
) -> Result<bool> {
    transition(
        db,
        id,
        DeploymentStatus::Building,
        DeploymentStatus::Deploying,
        deployment::ActiveModel {
            docker_image: Set(Some(image_ref.to_string())),
            build_duration_seconds: Set(Some(build_secs)),
            ..Default::default()
        },
    )
    .await
}

/// Phase that ended a run, with how long it ran
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailedPhase {
    Build { secs: i64 },
    Deploy { secs: i64 },
}

pub async fn fail<C: ConnectionTrait>(
    db: &C,
    id: i64,
    phase: FailedPhase,
    message: &str,
    finished_at: DateTime<Utc>,
) -> Result<bool> {
    let mut changes = deployment::ActiveModel {
        error_message: Set(Some(message.to_string())),
        finished_at: Set(Some(finished_at)),
        ..Default::default()
    };

    let from = match phase {
        FailedPhase::Build { secs } => {
            changes.build_duration_seconds = Set(Some(secs));
            DeploymentStatus::Building
        }
        FailedPhase::Deploy { secs } => {
            changes.deploy_duration_seconds = Set(Some(secs));
            DeploymentStatus::Deploying
        }
    };

    transition(db, id, from, DeploymentStatus::Failed, changes).await
}

/// Mark `id` succeeded and make it the project's only production deployment,
/// all in one transaction.
///
/// The project row is written first so concurrent promoters for the same
/// project queue behind each other; the partial unique index on
/// `is_current_production` rejects anything that slips past.
pub async fn succeed_and_promote(
    db: &DatabaseConnection,
    id: i64,
    project_id: i64,
    deploy_secs: i64,
    finished_at: DateTime<Utc>,
) -> Result<bool> {
    let txn = db.begin().await?;

    let touched = Project::update_many()
        .col_expr(project::Column::CurrentDeploymentId, Expr::value(id))
        .col_expr(project::Column::UpdatedAt, Expr::value(finished_at))
        .filter(project::Column::Id.eq(project_id))
        .exec(&txn)
        .await?;
    if touched.rows_affected != 1 {
        txn.rollback().await?;
        return Err(AppError::NotFound(format!(
            "Project {} not found",
            project_id
        )));
    }

    let succeeded = transition(
        &txn,
        id,
        DeploymentStatus::Deploying,
        DeploymentStatus::Succeeded,
        deployment::ActiveModel {
            deploy_duration_seconds: Set(Some(deploy_secs)),
            finished_at: Set(Some(finished_at)),
            ..Default::default()
        },
    )
    .await?;
    if !succeeded {
        txn.rollback().await?;
        return Ok(false);
    }

    Deployment::update_many()
        .col_expr(deployment::Column::IsCurrentProduction, Expr::value(false))
        .filter(deployment::Column::ProjectId.eq(project_id))
        .filter(deployment::Column::IsCurrentProduction.eq(true))
        .filter(deployment::Column::Id.ne(id))
        .exec(&txn)
        .await?;

    Deployment::update_many()
        .col_expr(deployment::Column::IsCurrentProduction, Expr::value(true))
        .filter(deployment::Column::Id.eq(id))
        .exec(&txn)
        .await?;

    txn.commit().await?;
    Ok(true)
}
