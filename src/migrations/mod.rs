pub use sea_orm_migration::prelude::*;

mod m20260301_000001_create_projects;
mod m20260301_000002_create_deployments;
mod m20260301_000003_create_deployment_logs;
mod m20260301_000004_create_deployment_jobs;
mod m20260301_000005_create_deployment_notifications;
mod m20260302_000001_add_current_production_index;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260301_000001_create_projects::Migration),
            Box::new(m20260301_000002_create_deployments::Migration),
            Box::new(m20260301_000003_create_deployment_logs::Migration),
            Box::new(m20260301_000004_create_deployment_jobs::Migration),
            Box::new(m20260301_000005_create_deployment_notifications::Migration),
            Box::new(m20260302_000001_add_current_production_index::Migration),
        ]
    }
}
