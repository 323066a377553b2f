use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};

use crate::error::Result;
use crate::services::trigger::{self, WebhookOutcome, SIGNATURE_HEADER};
use crate::state::AppState;

pub fn webhook_routes(state: AppState) -> Router {
    Router::new()
        .route("/{project_id}", post(receive_push))
        .with_state(state)
}

/// Git push hook. The raw body is needed for signature verification.
#[utoipa::path(
    post,
    path = "/webhooks/{project_id}",
    tag = "Webhooks",
    request_body(content = String, content_type = "application/json", description = "Push event payload"),
    params(
        ("project_id" = i64, Path, description = "Project id"),
        ("X-Hub-Signature-256" = Option<String>, Header, description = "sha256=<hex HMAC of body>")
    ),
    responses(
        (status = 201, description = "Deployment queued"),
        (status = 202, description = "Push ignored"),
        (status = 401, description = "Invalid signature"),
        (status = 404, description = "Project not found")
    )
)]
pub async fn receive_push(
    State(state): State<AppState>,
    Path(project_id): Path<i64>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    let outcome =
        trigger::handle_push(&state.db, state.queue.as_ref(), project_id, signature, &body).await?;

    Ok(match outcome {
        WebhookOutcome::Queued(record) => (StatusCode::CREATED, Json(record)).into_response(),
        WebhookOutcome::Skipped(reason) => {
            tracing::info!(project_id, reason = %reason, "Ignoring push");
            (
                StatusCode::ACCEPTED,
                Json(serde_json::json!({ "skipped": reason })),
            )
                .into_response()
        }
    })
}
