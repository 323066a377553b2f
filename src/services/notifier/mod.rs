mod email;
mod in_app;
mod webhook;

pub use email::EmailChannel;
pub use in_app::InAppChannel;
pub use webhook::WebhookChannel;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};

use crate::config::NotificationConfig;
use crate::error::PipelineError;
use crate::models::{deployment, project};
use crate::services::store;

/// Terminal result a notification reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Succeeded,
    Failed,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Succeeded => "succeeded",
            Outcome::Failed => "failed",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Payload handed to every channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentEvent {
    pub deployment_id: i64,
    pub project_id: i64,
    pub project_name: String,
    pub outcome: Outcome,
    pub commit_hash: String,
    pub commit_message: Option<String>,
    pub branch: String,
    pub error_message: Option<String>,
    pub docker_image: Option<String>,
    pub rollback_from_id: Option<i64>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl DeploymentEvent {
    pub fn new(deployment: &deployment::Model, project: &project::Model, outcome: Outcome) -> Self {
        Self {
            deployment_id: deployment.id,
            project_id: project.id,
            project_name: project.name.clone(),
            outcome,
            commit_hash: deployment.commit_hash.clone(),
            commit_message: deployment.commit_message.clone(),
            branch: deployment.branch.clone(),
            error_message: deployment.error_message.clone(),
            docker_image: deployment.docker_image.clone(),
            rollback_from_id: deployment.rollback_from_id,
            finished_at: deployment.finished_at,
        }
    }

    fn short_commit(&self) -> &str {
        let end = self
            .commit_hash
            .char_indices()
            .nth(7)
            .map(|(i, _)| i)
            .unwrap_or(self.commit_hash.len());
        &self.commit_hash[..end]
    }

    pub fn title(&self) -> String {
        let kind = if self.rollback_from_id.is_some() {
            "Rollback"
        } else {
            "Deployment"
        };
        match self.outcome {
            Outcome::Succeeded => format!("{} of {} succeeded", kind, self.project_name),
            Outcome::Failed => format!("{} of {} failed", kind, self.project_name),
        }
    }

    pub fn body(&self) -> String {
        let mut body = format!(
            "Deployment #{} of {} ({}@{})",
            self.deployment_id,
            self.project_name,
            self.branch,
            self.short_commit()
        );
        if let Some(message) = &self.commit_message {
            body.push_str(&format!("\nCommit: {}", message));
        }
        if let Some(from) = self.rollback_from_id {
            body.push_str(&format!("\nRolled back to deployment #{}", from));
        }
        match self.outcome {
            Outcome::Succeeded => {
                if let Some(image) = &self.docker_image {
                    body.push_str(&format!("\nNow serving {}", image));
                }
            }
            Outcome::Failed => {
                if let Some(error) = &self.error_message {
                    body.push_str(&format!("\nError: {}", error));
                }
            }
        }
        body
    }
}

/// Result of sending a notification
#[derive(Debug)]
pub struct SendResult {
    pub success: bool,
    pub error: Option<String>,
}

impl SendResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// A destination for deployment events
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &'static str;
    async fn send(&self, event: &DeploymentEvent) -> SendResult;
}

/// How one dispatch went across all channels
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Fans deployment outcomes out to every configured channel.
///
/// Delivery is best effort: a failing or slow channel is logged and counted
/// but never affects the deployment or the other channels.
#[derive(Clone)]
pub struct StatusNotifier {
    db: DatabaseConnection,
    channels: Vec<Arc<dyn NotificationChannel>>,
    timeout: Duration,
}

impl StatusNotifier {
    pub fn new(db: DatabaseConnection, timeout: Duration) -> Self {
        Self {
            db,
            channels: Vec::new(),
            timeout,
        }
    }

    /// In-app notifications always, plus webhook and email when configured
    pub fn from_config(db: DatabaseConnection, config: &NotificationConfig) -> Self {
        let mut notifier = Self::new(db.clone(), config.timeout)
            .with_channel(Arc::new(InAppChannel::new(db)));

        if let Some(url) = &config.webhook_url {
            match WebhookChannel::new(url.clone(), config.timeout) {
                Ok(channel) => {
                    tracing::info!("Webhook notification channel initialized");
                    notifier = notifier.with_channel(Arc::new(channel));
                }
                Err(e) => tracing::warn!("Webhook notification channel disabled: {}", e),
            }
        }

        if let Some(smtp) = &config.smtp {
            if config.email_recipients.is_empty() {
                tracing::warn!("SMTP configured but DOCKYARD_NOTIFY_EMAILS is empty");
            } else {
                match EmailChannel::from_config(smtp, config.email_recipients.clone()) {
                    Ok(channel) => {
                        tracing::info!("Email notification channel initialized");
                        notifier = notifier.with_channel(Arc::new(channel));
                    }
                    Err(e) => tracing::warn!("Email notification channel disabled: {}", e),
                }
            }
        }

        notifier
    }

    pub fn with_channel(mut self, channel: Arc<dyn NotificationChannel>) -> Self {
        self.channels.push(channel);
        self
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Announce that `deployment` reached `outcome`. Call only after the
    /// terminal state is committed.
    pub async fn notify(&self, deployment: &deployment::Model, outcome: Outcome) -> DispatchReport {
        let project = match store::find_project(&self.db, deployment.project_id).await {
            Ok(Some(project)) => project,
            Ok(None) => {
                tracing::warn!(
                    deployment_id = deployment.id,
                    project_id = deployment.project_id,
                    "Skipping notification, project no longer exists"
                );
                return DispatchReport {
                    delivered: 0,
                    failed: self.channels.len(),
                };
            }
            Err(e) => {
                tracing::warn!(
                    deployment_id = deployment.id,
                    "Skipping notification, failed to load project: {}",
                    e
                );
                return DispatchReport {
                    delivered: 0,
                    failed: self.channels.len(),
                };
            }
        };

        self.dispatch(&DeploymentEvent::new(deployment, &project, outcome))
            .await
    }

    /// Send `event` to every channel concurrently
    pub async fn dispatch(&self, event: &DeploymentEvent) -> DispatchReport {
        let sends = self.channels.iter().map(|channel| async move {
            let result = match tokio::time::timeout(self.timeout, channel.send(event)).await {
                Ok(result) => result,
                Err(_) => SendResult::failed(format!(
                    "timed out after {}s",
                    self.timeout.as_secs()
                )),
            };
            (channel.name(), result)
        });

        let mut report = DispatchReport::default();
        for (name, result) in join_all(sends).await {
            if result.success {
                report.delivered += 1;
                tracing::debug!(
                    deployment_id = event.deployment_id,
                    channel = name,
                    "Notification delivered"
                );
            } else {
                report.failed += 1;
                let error = PipelineError::NotificationDelivery(format!(
                    "{}: {}",
                    name,
                    result.error.unwrap_or_else(|| "unknown error".to_string())
                ));
                tracing::warn!(
                    deployment_id = event.deployment_id,
                    channel = name,
                    "{}",
                    error
                );
            }
        }

        report
    }
}
