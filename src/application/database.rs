//! Connection pool setup. Both PostgreSQL and SQLite are supported; the
//! queue and promotion logic only rely on conditional updates and
//! transactions, which both provide.

use std::time::Duration;

use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;

use crate::config::{DatabaseConfig, CONFIG};
use crate::error::{AppError, Result};
use crate::migrations::Migrator;

pub type DbConn = DatabaseConnection;

/// Connect with the process configuration and bring the schema up to date
pub async fn connect() -> Result<DbConn> {
    connect_with(&CONFIG.database).await
}

pub async fn connect_with(config: &DatabaseConfig) -> Result<DbConn> {
    let max_connections = if config.is_in_memory() {
        1
    } else {
        config.max_connections.max(1)
    };
    tracing::info!(
        sqlite = config.is_sqlite(),
        max_connections,
        "Connecting to database"
    );

    let mut opts = ConnectOptions::new(config.database_url.clone());
    opts.max_connections(max_connections)
        .min_connections(1)
        .connect_timeout(config.connect_timeout)
        .idle_timeout(Duration::from_secs(600))
        .sqlx_logging(false);

    let db = Database::connect(opts)
        .await
        .map_err(|e| AppError::ServiceUnavailable(format!("Database unreachable: {}", e)))?;

    migrate(&db).await?;
    Ok(db)
}

/// Apply pending migrations
pub async fn migrate(db: &DbConn) -> Result<()> {
    let pending = Migrator::get_pending_migrations(db).await?.len();
    if pending == 0 {
        tracing::debug!("Database schema is up to date");
        return Ok(());
    }

    tracing::info!(pending, "Applying database migrations");
    Migrator::up(db, None)
        .await
        .map_err(|e| AppError::Internal(format!("Migration failed: {}", e)))?;
    Ok(())
}
