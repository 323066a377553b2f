use std::env;
use std::time::Duration;

use super::{env_flag, env_list, env_parse};

/// SMTP settings for the email channel
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_address: String,
    pub use_tls: bool,
}

#[derive(Debug, Clone)]
pub struct NotificationConfig {
    /// Outgoing webhook receiving every terminal deployment event as JSON
    pub webhook_url: Option<String>,
    /// Present only when `DOCKYARD_SMTP_HOST` is set
    pub smtp: Option<SmtpConfig>,
    pub email_recipients: Vec<String>,
    /// Per-channel delivery bound
    pub timeout: Duration,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            smtp: None,
            email_recipients: Vec::new(),
            timeout: Duration::from_secs(10),
        }
    }
}

impl NotificationConfig {
    pub fn from_env() -> Self {
        let smtp = env::var("DOCKYARD_SMTP_HOST").ok().map(|host| SmtpConfig {
            host,
            port: env_parse("DOCKYARD_SMTP_PORT", 587),
            username: env::var("DOCKYARD_SMTP_USERNAME").unwrap_or_default(),
            password: env::var("DOCKYARD_SMTP_PASSWORD").unwrap_or_default(),
            from_address: env::var("DOCKYARD_SMTP_FROM")
                .unwrap_or_else(|_| "dockyard@localhost".to_string()),
            use_tls: !env_flag("DOCKYARD_SMTP_INSECURE"),
        });

        Self {
            webhook_url: env::var("DOCKYARD_NOTIFY_WEBHOOK_URL")
                .ok()
                .filter(|u| !u.trim().is_empty()),
            smtp,
            email_recipients: env_list("DOCKYARD_NOTIFY_EMAILS"),
            timeout: Duration::from_secs(env_parse("DOCKYARD_NOTIFY_TIMEOUT_SECS", 10)),
        }
    }
}
