//! Read side used by clients polling a running deployment.

use std::time::Duration;

use sea_orm::ConnectionTrait;
use serde::Serialize;

use crate::error::{AppError, Result};
use crate::models::deployment::DeploymentStatus;
use crate::models::deployment_log::LogPhase;
use crate::services::log_sink::read_phase_log;
use crate::services::store;

/// Interval clients should poll at while a deployment is in progress
pub const RECOMMENDED_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentStatusView {
    pub id: i64,
    pub status: DeploymentStatus,
    pub build_logs: String,
    pub deploy_logs: String,
    pub build_duration: Option<i64>,
    pub deploy_duration: Option<i64>,
    pub error_message: Option<String>,
    pub is_finished: bool,
    pub docker_image: Option<String>,
    pub is_current_production: bool,
    pub rollback_from_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommended_poll_interval_ms: Option<u64>,
}

/// Snapshot of a deployment's state and logs.
///
/// The record is read before the logs, so the logs are never older than the
/// status they are returned with.
pub async fn poll<C: ConnectionTrait>(db: &C, deployment_id: i64) -> Result<DeploymentStatusView> {
    let record = store::get(db, deployment_id).await?;
    let status = record.status().ok_or_else(|| {
        AppError::Internal(format!(
            "Deployment {} has unknown status '{}'",
            record.id, record.status
        ))
    })?;

    let build_logs = read_phase_log(db, deployment_id, LogPhase::Build).await?;
    let deploy_logs = read_phase_log(db, deployment_id, LogPhase::Deploy).await?;
    let is_finished = status.is_terminal();

    Ok(DeploymentStatusView {
        id: record.id,
        status,
        build_logs,
        deploy_logs,
        build_duration: record.build_duration_seconds,
        deploy_duration: record.deploy_duration_seconds,
        error_message: record.error_message,
        is_finished,
        docker_image: record.docker_image,
        is_current_production: record.is_current_production,
        rollback_from_id: record.rollback_from_id,
        recommended_poll_interval_ms: (!is_finished)
            .then(|| RECOMMENDED_POLL_INTERVAL.as_millis() as u64),
    })
}
