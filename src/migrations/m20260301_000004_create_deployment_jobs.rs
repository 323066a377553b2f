//! Migration: Create deployment_jobs table

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(DeploymentJobs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DeploymentJobs::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(DeploymentJobs::DeploymentId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DeploymentJobs::Attempts)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(DeploymentJobs::AvailableAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DeploymentJobs::LockedUntil)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(DeploymentJobs::LockedBy).string().null())
                    .col(
                        ColumnDef::new(DeploymentJobs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_deployment_jobs_available")
                    .table(DeploymentJobs::Table)
                    .col(DeploymentJobs::AvailableAt)
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
                    .table(DeploymentJobs::Table)
                    .if_exists()
                    .to_owned(),
            )
            .await
    }
}

#[derive(Iden)]
#[iden = "deployment_jobs"]
enum DeploymentJobs {
    Table,
    Id,
    #[iden = "deployment_id"]
    DeploymentId,
    Attempts,
    #[iden = "available_at"]
    AvailableAt,
    #[iden = "locked_until"]
    LockedUntil,
    #[iden = "locked_by"]
    LockedBy,
    #[iden = "created_at"]
    CreatedAt,
}
