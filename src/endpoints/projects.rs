use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::error::{AppError, Result};
use crate::models::deployment::{self, DeploymentSource};
use crate::models::project;
use crate::services::store::{self, NewProject};
use crate::services::trigger::{self, TriggerRequest};
use crate::state::AppState;

pub fn projects_routes(state: AppState) -> Router {
    Router::new()
        .route("/", get(list_projects).post(create_project))
        .route("/{id}", get(get_project))
        .route(
            "/{id}/deployments",
            get(list_deployments).post(trigger_deployment),
        )
        .with_state(state)
}

// ============================================================================
// Projects
// ============================================================================

#[derive(Debug, Deserialize, Validate, utoipa::ToSchema)]
pub struct CreateProjectRequest {
    /// Lowercase slug; also the name of the workload it deploys to
    #[validate(length(min = 1, max = 63), custom(function = "validate_slug"))]
    pub name: String,

    #[validate(length(min = 1, max = 2048))]
    pub repository_url: String,

    /// Tracked branch, `main` when omitted
    #[validate(length(min = 1, max = 255))]
    pub branch: Option<String>,

    /// Key for `X-Hub-Signature-256` verification of push webhooks
    #[validate(length(min = 8, max = 255))]
    pub webhook_secret: Option<String>,
}

fn validate_slug(name: &str) -> std::result::Result<(), ValidationError> {
    let valid = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.starts_with('-')
        && !name.ends_with('-');

    if valid {
        Ok(())
    } else {
        let mut error = ValidationError::new("invalid_slug");
        error.message =
            Some("name may only contain lowercase letters, digits and inner hyphens".into());
        Err(error)
    }
}

#[utoipa::path(
    post,
    path = "/api/projects",
    tag = "Projects",
    request_body = CreateProjectRequest,
    responses(
        (status = 201, body = project::Model),
        (status = 400, description = "Invalid request"),
        (status = 409, description = "Name already taken")
    )
)]
pub async fn create_project(
    State(state): State<AppState>,
    Json(request): Json<CreateProjectRequest>,
) -> Result<(StatusCode, Json<project::Model>)> {
    request
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let project = store::create_project(
        &state.db,
        NewProject {
            name: request.name,
            repository_url: request.repository_url,
            branch: request.branch.unwrap_or_else(|| "main".to_string()),
            webhook_secret: request.webhook_secret,
        },
    )
    .await?;

    tracing::info!(project_id = project.id, name = %project.name, "Project created");
    Ok((StatusCode::CREATED, Json(project)))
}

#[utoipa::path(
    get,
    path = "/api/projects",
    tag = "Projects",
    responses(
        (status = 200, body = Vec<project::Model>)
    )
)]
pub async fn list_projects(State(state): State<AppState>) -> Result<Json<Vec<project::Model>>> {
    Ok(Json(store::list_projects(&state.db).await?))
}

#[utoipa::path(
    get,
    path = "/api/projects/{id}",
    tag = "Projects",
    params(("id" = i64, Path, description = "Project id")),
    responses(
        (status = 200, body = project::Model),
        (status = 404, description = "Project not found")
    )
)]
pub async fn get_project(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<project::Model>> {
    Ok(Json(store::get_project(&state.db, id).await?))
}

// ============================================================================
// Project deployments
// ============================================================================

#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListQuery {
    /// 1-based page number
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct DeploymentListResponse {
    pub deployments: Vec<deployment::Model>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

#[utoipa::path(
    get,
    path = "/api/projects/{id}/deployments",
    tag = "Projects",
    params(("id" = i64, Path, description = "Project id"), ListQuery),
    responses(
        (status = 200, body = DeploymentListResponse),
        (status = 404, description = "Project not found")
    )
)]
pub async fn list_deployments(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<ListQuery>,
) -> Result<Json<DeploymentListResponse>> {
    store::get_project(&state.db, id).await?;

    let page = query.page.unwrap_or(1).max(1);
    let per_page = query.per_page.unwrap_or(20).clamp(1, 100);
    let (deployments, total) = store::list_for_project(&state.db, id, page, per_page).await?;

    Ok(Json(DeploymentListResponse {
        deployments,
        total,
        page,
        per_page,
    }))
}

#[utoipa::path(
    post,
    path = "/api/projects/{id}/deployments",
    tag = "Projects",
    params(("id" = i64, Path, description = "Project id")),
    request_body = TriggerRequest,
    responses(
        (status = 201, body = deployment::Model),
        (status = 400, description = "Invalid request"),
        (status = 404, description = "Project not found")
    )
)]
pub async fn trigger_deployment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<TriggerRequest>,
) -> Result<(StatusCode, Json<deployment::Model>)> {
    let record = trigger::trigger_deployment(
        &state.db,
        state.queue.as_ref(),
        id,
        request,
        DeploymentSource::Manual,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(record)))
}
