use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};

use crate::error::Result;
use crate::models::deployment;
use crate::services::poller::{self, DeploymentStatusView};
use crate::services::store;
use crate::state::AppState;

pub fn deployments_routes(state: AppState) -> Router {
    Router::new()
        .route("/{id}", get(get_deployment))
        .route("/{id}/status", get(get_deployment_status))
        .route("/{id}/rollback", post(rollback_deployment))
        .with_state(state)
}

#[utoipa::path(
    get,
    path = "/api/deployments/{id}",
    tag = "Deployments",
    params(("id" = i64, Path, description = "Deployment id")),
    responses(
        (status = 200, body = deployment::Model),
        (status = 404, description = "Deployment not found")
    )
)]
pub async fn get_deployment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<deployment::Model>> {
    Ok(Json(store::get(&state.db, id).await?))
}

/// Live state and logs; poll until `isFinished`
#[utoipa::path(
    get,
    path = "/api/deployments/{id}/status",
    tag = "Deployments",
    params(("id" = i64, Path, description = "Deployment id")),
    responses(
        (status = 200, body = DeploymentStatusView),
        (status = 404, description = "Deployment not found")
    )
)]
pub async fn get_deployment_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<DeploymentStatusView>> {
    Ok(Json(poller::poll(&state.db, id).await?))
}

#[utoipa::path(
    post,
    path = "/api/deployments/{id}/rollback",
    tag = "Deployments",
    params(("id" = i64, Path, description = "Deployment to roll back to")),
    responses(
        (status = 201, body = deployment::Model),
        (status = 404, description = "Deployment not found"),
        (status = 409, description = "Deployment is not eligible for rollback")
    )
)]
pub async fn rollback_deployment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<(StatusCode, Json<deployment::Model>)> {
    let record = state.rollback().rollback(id).await?;
    Ok((StatusCode::CREATED, Json(record)))
}
