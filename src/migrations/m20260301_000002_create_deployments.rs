//! Migration: Create deployments table

use sea_orm_migration::prelude::*;

use super::m20260301_000001_create_projects::Projects;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Deployments::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Deployments::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Deployments::ProjectId).big_integer().not_null())
                    .col(
                        ColumnDef::new(Deployments::Status)
                            .string()
                            .not_null()
                            .default("queued"),
                    )
                    .col(
                        ColumnDef::new(Deployments::Source)
                            .string()
                            .not_null()
                            .default("manual"),
                    )
                    .col(ColumnDef::new(Deployments::CommitHash).string().not_null())
                    .col(ColumnDef::new(Deployments::CommitMessage).text().null())
                    .col(ColumnDef::new(Deployments::Branch).string().not_null())
                    .col(ColumnDef::new(Deployments::DockerImage).string().null())
                    .col(
                        ColumnDef::new(Deployments::BuildDurationSeconds)
                            .big_integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Deployments::DeployDurationSeconds)
                            .big_integer()
                            .null(),
                    )
                    .col(ColumnDef::new(Deployments::ErrorMessage).text().null())
                    .col(
                        ColumnDef::new(Deployments::IsCurrentProduction)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Deployments::RollbackFromId).big_integer().null())
                    .col(
                        ColumnDef::new(Deployments::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Deployments::StartedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Deployments::FinishedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(Deployments::Table, Deployments::ProjectId)
                            .to(Projects::Table, Projects::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(Deployments::Table, Deployments::RollbackFromId)
                            .to(Deployments::Table, Deployments::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_deployments_project_created")
                    .table(Deployments::Table)
                    .col(Deployments::ProjectId)
                    .col(Deployments::CreatedAt)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_deployments_status")
                    .table(Deployments::Table)
                    .col(Deployments::Status)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Deployments::Table).if_exists().to_owned())
            .await
    }
}

#[derive(Iden)]
#[iden = "deployments"]
pub enum Deployments {
    Table,
    Id,
    #[iden = "project_id"]
    ProjectId,
    Status,
    Source,
    #[iden = "commit_hash"]
    CommitHash,
    #[iden = "commit_message"]
    CommitMessage,
    Branch,
    #[iden = "docker_image"]
    DockerImage,
    #[iden = "build_duration_seconds"]
    BuildDurationSeconds,
    #[iden = "deploy_duration_seconds"]
    DeployDurationSeconds,
    #[iden = "error_message"]
    ErrorMessage,
    #[iden = "is_current_production"]
    IsCurrentProduction,
    #[iden = "rollback_from_id"]
    RollbackFromId,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "started_at"]
    StartedAt,
    #[iden = "finished_at"]
    FinishedAt,
}
