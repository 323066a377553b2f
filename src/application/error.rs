use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Failures that belong to the deployment pipeline itself.
///
/// Build and deploy failures are normally captured on the deployment record
/// rather than returned; they surface as values of this type when a phase
/// outcome has to be carried between components.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Deployment {0} is already claimed or finished")]
    ClaimConflict(i64),

    #[error("Build failed: {0}")]
    Build(String),

    #[error("Deploy failed: {0}")]
    Deploy(String),

    #[error("Deployment {id} is not eligible for rollback: {reason}")]
    NotEligible { id: i64, reason: String },

    #[error("Notification delivery failed: {0}")]
    NotificationDelivery(String),
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Kubernetes error: {0}")]
    Kubernetes(#[from] kube::Error),

    #[error("Kubernetes config error: {0}")]
    KubeConfig(#[from] kube::config::KubeconfigError),

    #[error("Kubernetes in-cluster config error: {0}")]
    KubeInCluster(#[from] kube::config::InClusterError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),
}

#[derive(Serialize)]
struct ErrorResponse {
    detail: String,
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) | AppError::Json(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Pipeline(
                PipelineError::ClaimConflict(_) | PipelineError::NotEligible { .. },
            ) => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::HttpClient(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_)
            | AppError::Pipeline(_)
            | AppError::Database(_)
            | AppError::Kubernetes(_)
            | AppError::KubeConfig(_)
            | AppError::KubeInCluster(_)
            | AppError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to return to API clients
    fn detail(&self) -> String {
        match self {
            AppError::NotFound(msg)
            | AppError::BadRequest(msg)
            | AppError::Unauthorized(msg)
            | AppError::Conflict(msg)
            | AppError::Internal(msg)
            | AppError::ServiceUnavailable(msg) => msg.clone(),
            AppError::Database(_) => "Database error".to_string(),
            AppError::HttpClient(e) => format!("Upstream service error: {}", e),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), "{}", self);
        }

        (status, Json(ErrorResponse { detail: self.detail() })).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
