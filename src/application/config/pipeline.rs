use std::env;
use std::time::Duration;

use super::env_parse;

/// Which job queue transport the process uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueBackend {
    /// `deployment_jobs` table, shared by every process on the same database
    Database,
    /// In-process channel; jobs do not survive a restart
    Memory,
}

impl QueueBackend {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "memory" => QueueBackend::Memory,
            _ => QueueBackend::Database,
        }
    }
}

/// What this process runs: the HTTP API, the workers, or both
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessRole {
    All,
    Web,
    Worker,
}

impl ProcessRole {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "web" => ProcessRole::Web,
            "worker" => ProcessRole::Worker,
            _ => ProcessRole::All,
        }
    }

    pub fn runs_http(&self) -> bool {
        matches!(self, ProcessRole::All | ProcessRole::Web)
    }

    pub fn runs_workers(&self) -> bool {
        matches!(self, ProcessRole::All | ProcessRole::Worker)
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Concurrent pipeline runs per process
    pub workers: usize,
    /// Upper bound on a single builder invocation
    pub build_timeout: Duration,
    /// Upper bound on a single deployer invocation
    pub deploy_timeout: Duration,
    /// Attempts per phase for transient collaborator errors (1 = no retry)
    pub max_attempts: u32,
    /// Base delay between phase attempts, doubled each retry
    pub retry_backoff: Duration,
    pub queue_backend: QueueBackend,
    /// Idle sleep between empty dequeues
    pub queue_poll_interval: Duration,
    /// How long a leased job stays invisible to other workers
    pub queue_visibility_timeout: Duration,
    /// Deliveries after which a repeatedly failing job is dropped
    pub queue_max_deliveries: i32,
    /// Age after which a still-queued record is enqueued again
    pub requeue_after: Duration,
    pub role: ProcessRole,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            build_timeout: Duration::from_secs(30 * 60),
            deploy_timeout: Duration::from_secs(10 * 60),
            max_attempts: 3,
            retry_backoff: Duration::from_millis(500),
            queue_backend: QueueBackend::Database,
            queue_poll_interval: Duration::from_millis(500),
            queue_visibility_timeout: Duration::from_secs(45 * 60),
            queue_max_deliveries: 5,
            requeue_after: Duration::from_secs(5 * 60),
            role: ProcessRole::All,
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            workers: env_parse("DOCKYARD_WORKERS", defaults.workers).max(1),
            build_timeout: Duration::from_secs(env_parse(
                "DOCKYARD_BUILD_TIMEOUT_SECS",
                defaults.build_timeout.as_secs(),
            )),
            deploy_timeout: Duration::from_secs(env_parse(
                "DOCKYARD_DEPLOY_TIMEOUT_SECS",
                defaults.deploy_timeout.as_secs(),
            )),
            max_attempts: env_parse("DOCKYARD_PHASE_MAX_ATTEMPTS", defaults.max_attempts).max(1),
            retry_backoff: Duration::from_millis(env_parse(
                "DOCKYARD_RETRY_BACKOFF_MS",
                defaults.retry_backoff.as_millis() as u64,
            )),
            queue_backend: QueueBackend::parse(
                &env::var("DOCKYARD_QUEUE").unwrap_or_default(),
            ),
            queue_poll_interval: Duration::from_millis(env_parse(
                "DOCKYARD_QUEUE_POLL_MS",
                defaults.queue_poll_interval.as_millis() as u64,
            )),
            queue_visibility_timeout: Duration::from_secs(env_parse(
                "DOCKYARD_QUEUE_VISIBILITY_SECS",
                defaults.queue_visibility_timeout.as_secs(),
            )),
            queue_max_deliveries: env_parse(
                "DOCKYARD_QUEUE_MAX_DELIVERIES",
                defaults.queue_max_deliveries,
            ),
            requeue_after: Duration::from_secs(env_parse(
                "DOCKYARD_REQUEUE_AFTER_SECS",
                defaults.requeue_after.as_secs(),
            )),
            role: ProcessRole::parse(&env::var("DOCKYARD_ROLE").unwrap_or_default()),
        }
    }
}
