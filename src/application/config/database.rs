use std::env;
use std::time::Duration;

use super::env_parse;

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub database_url: String,
    /// Pool size; workers and HTTP handlers share it
    pub max_connections: u32,
    pub connect_timeout: Duration,
}

impl DatabaseConfig {
    pub fn from_env() -> Self {
        Self {
            database_url: env::var("DOCKYARD_DATABASE_URL")
                .or_else(|_| env::var("DATABASE_URL"))
                .unwrap_or_else(|_| "sqlite://dockyard.db?mode=rwc".to_string()),
            max_connections: env_parse("DOCKYARD_DATABASE_MAX_CONNECTIONS", 10),
            connect_timeout: Duration::from_secs(env_parse(
                "DOCKYARD_DATABASE_CONNECT_TIMEOUT_SECS",
                30,
            )),
        }
    }

    pub fn is_sqlite(&self) -> bool {
        self.database_url.starts_with("sqlite:")
    }

    /// An in-memory SQLite database exists per connection, so the pool
    /// must hold exactly one
    pub fn is_in_memory(&self) -> bool {
        self.is_sqlite() && self.database_url.contains(":memory:")
    }
}
