//! Entry points that create deployments: manual requests and git pushes.
//!
//! Both paths persist a `queued` record first and only then enqueue its id,
//! so a worker never sees a job for a record that does not exist.

use hmac::{Hmac, Mac};
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use validator::{Validate, ValidationError};

use crate::error::{AppError, Result};
use crate::models::deployment::{self, DeploymentSource};
use crate::services::queue::JobQueue;
use crate::services::store::{self, NewDeployment};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the push signature
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate, utoipa::ToSchema)]
pub struct TriggerRequest {
    /// Commit to build
    #[validate(length(min = 1, max = 64), custom(function = "validate_commit_hash"))]
    pub commit_hash: String,

    #[validate(length(max = 2000))]
    pub commit_message: Option<String>,

    /// Defaults to the project's tracked branch
    #[validate(length(min = 1, max = 255))]
    pub branch: Option<String>,
}

fn validate_commit_hash(hash: &str) -> std::result::Result<(), ValidationError> {
    if hash.chars().all(|c| c.is_ascii_hexdigit()) {
        Ok(())
    } else {
        let mut error = ValidationError::new("commit_hash_not_hex");
        error.message = Some("commit_hash must be a hexadecimal git object id".into());
        Err(error)
    }
}

/// Persist a new `queued` deployment for `project_id` and enqueue it
pub async fn trigger_deployment(
    db: &DatabaseConnection,
    queue: &dyn JobQueue,
    project_id: i64,
    request: TriggerRequest,
    source: DeploymentSource,
) -> Result<deployment::Model> {
    request
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let project = store::get_project(db, project_id).await?;
    let branch = request
        .branch
        .filter(|b| !b.trim().is_empty())
        .unwrap_or(project.branch);

    let record = store::create_deployment(
        db,
        NewDeployment {
            project_id,
            source,
            commit_hash: request.commit_hash,
            commit_message: request.commit_message,
            branch,
            docker_image: None,
            rollback_from_id: None,
        },
    )
    .await?;

    tracing::info!(
        deployment_id = record.id,
        project_id,
        source = %source,
        commit = %record.commit_hash,
        "Deployment queued"
    );

    if let Err(e) = queue.enqueue(record.id).await {
        tracing::warn!(
            deployment_id = record.id,
            "Failed to enqueue deployment, it will be picked up by the requeue task: {}",
            e
        );
    }

    Ok(record)
}

// ============================================================================
// Git push webhooks
// ============================================================================

/// The parts of a git-host push event we use
#[derive(Debug, Clone, Deserialize)]
pub struct PushEvent {
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub after: String,
    #[serde(default)]
    pub head_commit: Option<HeadCommit>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeadCommit {
    #[serde(default)]
    pub message: Option<String>,
}

impl PushEvent {
    /// Branch name for `refs/heads/*` refs
    pub fn branch(&self) -> Option<&str> {
        self.git_ref.strip_prefix("refs/heads/")
    }

    /// A push whose new head is all zeros deletes the ref
    pub fn is_deletion(&self) -> bool {
        !self.after.is_empty() && self.after.chars().all(|c| c == '0')
    }
}

#[derive(Debug)]
pub enum WebhookOutcome {
    Queued(deployment::Model),
    Skipped(String),
}

/// `sha256=<hex>` signature of `body` under `secret`
pub fn sign(secret: &str, body: &[u8]) -> String {
    // HMAC accepts keys of any length
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time check of an `X-Hub-Signature-256` header value
pub fn verify_signature(secret: &str, body: &[u8], header: Option<&str>) -> bool {
    let Some(signature) = header.and_then(|h| h.trim().strip_prefix("sha256=")) else {
        return false;
    };
    let Ok(expected) = hex::decode(signature) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Verify, filter and turn a push into a deployment
pub async fn handle_push(
    db: &DatabaseConnection,
    queue: &dyn JobQueue,
    project_id: i64,
    signature: Option<&str>,
    body: &[u8],
) -> Result<WebhookOutcome> {
    let project = store::get_project(db, project_id).await?;

    if let Some(secret) = project.webhook_secret.as_deref().filter(|s| !s.is_empty()) {
        if !verify_signature(secret, body, signature) {
            tracing::warn!(project_id, "Rejected webhook with invalid signature");
            return Err(AppError::Unauthorized(
                "Invalid webhook signature".to_string(),
            ));
        }
    }

    let event: PushEvent = serde_json::from_slice(body)
        .map_err(|e| AppError::BadRequest(format!("Invalid push payload: {}", e)))?;

    let Some(branch) = event.branch() else {
        return Ok(WebhookOutcome::Skipped(format!(
            "{} is not a branch",
            event.git_ref
        )));
    };

    if event.is_deletion() {
        return Ok(WebhookOutcome::Skipped(format!("branch {} was deleted", branch)));
    }

    if branch != project.branch {
        return Ok(WebhookOutcome::Skipped(format!(
            "branch {} is not tracked (tracking {})",
            branch, project.branch
        )));
    }

    let request = TriggerRequest {
        commit_hash: event.after.clone(),
        commit_message: event.head_commit.as_ref().and_then(|c| c.message.clone()),
        branch: Some(branch.to_string()),
    };

    let record =
        trigger_deployment(db, queue, project_id, request, DeploymentSource::Webhook).await?;
    Ok(WebhookOutcome::Queued(record))
}
