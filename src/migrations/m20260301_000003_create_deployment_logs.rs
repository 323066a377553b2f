//! Migration: Create deployment_logs table

use sea_orm_migration::prelude::*;

use super::m20260301_000002_create_deployments::Deployments;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(DeploymentLogs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DeploymentLogs::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(DeploymentLogs::DeploymentId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(DeploymentLogs::Phase).string().not_null())
                    .col(ColumnDef::new(DeploymentLogs::Content).text().not_null())
                    .col(
                        ColumnDef::new(DeploymentLogs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(DeploymentLogs::Table, DeploymentLogs::DeploymentId)
                            .to(Deployments::Table, Deployments::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_deployment_logs_deployment_phase")
                    .table(DeploymentLogs::Table)
                    .col(DeploymentLogs::DeploymentId)
                    .col(DeploymentLogs::Phase)
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
                    .table(DeploymentLogs::Table)
                    .if_exists()
                    .to_owned(),
            )
            .await
    }
}

#[derive(Iden)]
#[iden = "deployment_logs"]
enum DeploymentLogs {
    Table,
    Id,
    #[iden = "deployment_id"]
    DeploymentId,
    Phase,
    Content,
    #[iden = "created_at"]
    CreatedAt,
}
