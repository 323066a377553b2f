pub mod builder;
pub mod database;
pub mod deployer;
pub mod notifications;
pub mod pipeline;
pub mod server;

pub use builder::BuilderConfig;
pub use database::DatabaseConfig;
pub use deployer::{DeployerConfig, DeployerKind};
pub use notifications::{NotificationConfig, SmtpConfig};
pub use pipeline::{PipelineConfig, ProcessRole, QueueBackend};
pub use server::ServerConfig;

use once_cell::sync::Lazy;
use std::env;
use std::str::FromStr;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub server: server::ServerConfig,
    pub database: database::DatabaseConfig,
    pub pipeline: pipeline::PipelineConfig,
    pub builder: builder::BuilderConfig,
    pub deployer: deployer::DeployerConfig,
    pub notifications: notifications::NotificationConfig,

    // Build info
    pub commit_hash: String,
    pub build_time: String,
    pub version: String,

    // Logging
    pub log_level: String,
    pub log_format: LogFormat,
}

/// Output format for the tracing subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Text,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            server: server::ServerConfig::from_env(),
            database: database::DatabaseConfig::from_env(),
            pipeline: pipeline::PipelineConfig::from_env(),
            builder: builder::BuilderConfig::from_env(),
            deployer: deployer::DeployerConfig::from_env(),
            notifications: notifications::NotificationConfig::from_env(),

            // Build info
            commit_hash: env::var("COMMIT_HASH").unwrap_or_else(|_| "unknown".to_string()),
            build_time: env::var("BUILD_TIME").unwrap_or_else(|_| "unknown".to_string()),
            version: env!("CARGO_PKG_VERSION").to_string(),

            // Logging
            log_level: env::var("DOCKYARD_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_format: LogFormat::parse(
                &env::var("DOCKYARD_LOG_FORMAT").unwrap_or_default(),
            ),
        }
    }
}

/// Read an environment variable and parse it, falling back to `default`
/// when it is unset or malformed.
pub(crate) fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Read a boolean flag ("true"/"1"/"yes", case-insensitive)
pub(crate) fn env_flag(key: &str) -> bool {
    env::var(key)
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(false)
}

/// Read a comma-separated list, dropping empty entries
pub(crate) fn env_list(key: &str) -> Vec<String> {
    env::var(key)
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

pub static CONFIG: Lazy<Config> = Lazy::new(Config::from_env);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::parse("pretty"), LogFormat::Text);
        assert_eq!(LogFormat::parse(""), LogFormat::Text);
    }

    #[test]
    fn test_env_parse_falls_back_on_garbage() {
        std::env::set_var("DOCKYARD_TEST_ENV_PARSE", "not-a-number");
        assert_eq!(env_parse("DOCKYARD_TEST_ENV_PARSE", 7u64), 7);
        std::env::set_var("DOCKYARD_TEST_ENV_PARSE", " 42 ");
        assert_eq!(env_parse("DOCKYARD_TEST_ENV_PARSE", 7u64), 42);
        std::env::remove_var("DOCKYARD_TEST_ENV_PARSE");
    }

    #[test]
    fn test_env_list_skips_empty_entries() {
        std::env::set_var("DOCKYARD_TEST_ENV_LIST", "a@example.com, ,b@example.com,");
        assert_eq!(
            env_list("DOCKYARD_TEST_ENV_LIST"),
            vec!["a@example.com".to_string(), "b@example.com".to_string()]
        );
        std::env::remove_var("DOCKYARD_TEST_ENV_LIST");
    }
}
