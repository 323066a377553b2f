pub mod deployments;
pub mod projects;
pub mod webhooks;

use axum::{routing::get, Json, Router};
use utoipa::OpenApi;

use crate::config::CONFIG;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    info(title = "Dockyard API", description = "Push-to-deploy pipeline"),
    paths(
        projects::create_project,
        projects::list_projects,
        projects::get_project,
        projects::list_deployments,
        projects::trigger_deployment,
        deployments::get_deployment,
        deployments::get_deployment_status,
        deployments::rollback_deployment,
        webhooks::receive_push
    ),
    tags(
        (name = "Projects", description = "Projects and manual deployments"),
        (name = "Deployments", description = "Deployment records, status polling and rollback"),
        (name = "Webhooks", description = "Git push webhooks")
    )
)]
pub struct ApiDoc;

/// Create the main API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/system/health", get(health_check))
        .route("/api/system/version", get(get_version))
        .route("/api/openapi.json", get(openapi_spec))
        .nest("/api/projects", projects::projects_routes(state.clone()))
        .nest(
            "/api/deployments",
            deployments::deployments_routes(state.clone()),
        )
        .nest("/webhooks", webhooks::webhook_routes(state))
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

/// Version info endpoint
async fn get_version() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "version": CONFIG.version,
        "commit_hash": CONFIG.commit_hash,
        "build_time": CONFIG.build_time,
        "rust_version": "1.83",
        "backend": "rust"
    }))
}

async fn openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
