//! Migration: Create deployment_notifications table

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(DeploymentNotifications::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DeploymentNotifications::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(DeploymentNotifications::DeploymentId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DeploymentNotifications::ProjectId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DeploymentNotifications::Outcome)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DeploymentNotifications::Title)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DeploymentNotifications::Message)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DeploymentNotifications::Read)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(DeploymentNotifications::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_deployment_notifications_project")
                    .table(DeploymentNotifications::Table)
                    .col(DeploymentNotifications::ProjectId)
                    .col(DeploymentNotifications::Read)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(
                Table::drop()
                    .table(DeploymentNotifications::Table)
                    .if_exists()
                    .to_owned(),
            )
            .await
    }
}

#[derive(Iden)]
#[iden = "deployment_notifications"]
enum DeploymentNotifications {
    Table,
    Id,
    #[iden = "deployment_id"]
    DeploymentId,
    #[iden = "project_id"]
    ProjectId,
    Outcome,
    Title,
    Message,
    Read,
    #[iden = "created_at"]
    CreatedAt,
}
