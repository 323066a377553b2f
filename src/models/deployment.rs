use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, utoipa::ToSchema)]
#[sea_orm(table_name = "deployments")]
#[schema(as = Deployment)]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub project_id: i64,
    pub status: String, // 'queued', 'building', 'deploying', 'succeeded', 'failed'
    pub source: String, // 'webhook', 'manual', 'rollback'
    pub commit_hash: String,
    pub commit_message: Option<String>,
    pub branch: String,
    pub docker_image: Option<String>,
    pub build_duration_seconds: Option<i64>,
    pub deploy_duration_seconds: Option<i64>,
    pub error_message: Option<String>,
    pub is_current_production: bool,
    pub rollback_from_id: Option<i64>,
    #[schema(value_type = String)]
    pub created_at: DateTimeUtc,
    #[schema(value_type = Option<String>)]
    pub started_at: Option<DateTimeUtc>,
    #[schema(value_type = Option<String>)]
    pub finished_at: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::project::Entity",
        from = "Column::ProjectId",
        to = "super::project::Column::Id",
        on_delete = "Cascade"
    )]
    Project,
    #[sea_orm(has_many = "super::deployment_log::Entity")]
    Logs,
}

impl Related<super::project::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Project.def()
    }
}

impl Related<super::deployment_log::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Logs.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn status(&self) -> Option<DeploymentStatus> {
        DeploymentStatus::parse(&self.status)
    }

    pub fn is_finished(&self) -> bool {
        self.status().is_some_and(|s| s.is_terminal())
    }

    /// A rollback run carries its artifact from the start and skips the build phase
    pub fn skips_build(&self) -> bool {
        self.rollback_from_id.is_some()
            && self
                .docker_image
                .as_deref()
                .is_some_and(|image| !image.is_empty())
    }
}

/// Pipeline state of a deployment.
///
/// Transitions only move forward: `queued → building → deploying → succeeded`,
/// with `failed` reachable from any non-terminal state. Rollback runs go
/// `queued → deploying` directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Queued,
    Building,
    Deploying,
    Succeeded,
    Failed,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Queued => "queued",
            DeploymentStatus::Building => "building",
            DeploymentStatus::Deploying => "deploying",
            DeploymentStatus::Succeeded => "succeeded",
            DeploymentStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(DeploymentStatus::Queued),
            "building" => Some(DeploymentStatus::Building),
            "deploying" => Some(DeploymentStatus::Deploying),
            "succeeded" => Some(DeploymentStatus::Succeeded),
            "failed" => Some(DeploymentStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentStatus::Succeeded | DeploymentStatus::Failed)
    }

    /// Position along the happy path; `failed` ranks with `succeeded` as terminal
    pub fn rank(&self) -> u8 {
        match self {
            DeploymentStatus::Queued => 0,
            DeploymentStatus::Building => 1,
            DeploymentStatus::Deploying => 2,
            DeploymentStatus::Succeeded | DeploymentStatus::Failed => 3,
        }
    }

    pub fn can_transition_to(&self, next: DeploymentStatus) -> bool {
        use DeploymentStatus::*;
        matches!(
            (self, next),
            (Queued, Building)
                | (Queued, Deploying)
                | (Building, Deploying)
                | (Deploying, Succeeded)
                | (Queued, Failed)
                | (Building, Failed)
                | (Deploying, Failed)
        )
    }
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What created a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentSource {
    Webhook,
    Manual,
    Rollback,
}

impl DeploymentSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentSource::Webhook => "webhook",
            DeploymentSource::Manual => "manual",
            DeploymentSource::Rollback => "rollback",
        }
    }
}

impl std::fmt::Display for DeploymentSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
