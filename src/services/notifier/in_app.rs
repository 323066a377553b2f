use async_trait::async_trait;
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};

use super::{DeploymentEvent, NotificationChannel, SendResult};
use crate::models::deployment_notification;

/// Stores events in `deployment_notifications` for the dashboard inbox
pub struct InAppChannel {
    db: DatabaseConnection,
}

impl InAppChannel {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl NotificationChannel for InAppChannel {
    fn name(&self) -> &'static str {
        "in_app"
    }

    async fn send(&self, event: &DeploymentEvent) -> SendResult {
        let notification = deployment_notification::ActiveModel {
            deployment_id: Set(event.deployment_id),
            project_id: Set(event.project_id),
            outcome: Set(event.outcome.as_str().to_string()),
            title: Set(event.title()),
            message: Set(event.body()),
            read: Set(false),
            created_at: Set(chrono::Utc::now()),
            ..Default::default()
        };

        match notification.insert(&self.db).await {
            Ok(_) => SendResult::ok(),
            Err(e) => SendResult::failed(format!("Failed to store notification: {}", e)),
        }
    }
}
