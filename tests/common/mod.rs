//! Test helpers shared by the integration tests.
//!
//! Provides an in-memory database, project fixtures, scripted builder and
//! deployer doubles driven by a manual clock, and notification channels
//! that record or fail on demand.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sea_orm::{Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;

use dockyard::migrations::Migrator;
use dockyard::models::{deployment, project};
use dockyard::services::collaborators::{
    BuildOutput, BuildRequest, Builder, CollaboratorError, DeployRequest, Deployer, RetryPolicy,
};
use dockyard::services::log_sink::LogWriter;
use dockyard::services::notifier::{DeploymentEvent, NotificationChannel, SendResult};
use dockyard::services::queue::{InMemoryQueue, SharedQueue};
use dockyard::services::store::{self, NewDeployment, NewProject};
use dockyard::services::{ManualClock, PhaseSettings, PipelineExecutor, StatusNotifier};
use dockyard::models::deployment::DeploymentSource;
use dockyard::state::AppState;

/// Create an in-memory SQLite database for testing
pub async fn create_test_db() -> DatabaseConnection {
    let db = Database::connect("sqlite::memory:")
        .await
        .expect("Failed to create test database");

    Migrator::up(&db, None)
        .await
        .expect("Failed to run test migrations");

    db
}

/// Create a project tracking `main`, with no webhook secret
pub async fn create_test_project(db: &DatabaseConnection, name: &str) -> project::Model {
    store::create_project(
        db,
        NewProject {
            name: name.to_string(),
            repository_url: format!("https://git.example.com/acme/{}.git", name),
            branch: "main".to_string(),
            webhook_secret: None,
        },
    )
    .await
    .expect("Failed to create test project")
}

pub async fn create_test_project_with_secret(
    db: &DatabaseConnection,
    name: &str,
    secret: &str,
) -> project::Model {
    store::create_project(
        db,
        NewProject {
            name: name.to_string(),
            repository_url: format!("https://git.example.com/acme/{}.git", name),
            branch: "main".to_string(),
            webhook_secret: Some(secret.to_string()),
        },
    )
    .await
    .expect("Failed to create test project")
}

/// Insert a queued manual deployment for `commit` on `main`
pub async fn create_queued_deployment(
    db: &DatabaseConnection,
    project_id: i64,
    commit: &str,
) -> deployment::Model {
    store::create_deployment(
        db,
        NewDeployment {
            project_id,
            source: DeploymentSource::Manual,
            commit_hash: commit.to_string(),
            commit_message: Some(format!("commit {}", commit)),
            branch: "main".to_string(),
            docker_image: None,
            rollback_from_id: None,
        },
    )
    .await
    .expect("Failed to create test deployment")
}

pub fn build_app_state(db: DatabaseConnection) -> AppState {
    let queue: SharedQueue = Arc::new(InMemoryQueue::default());
    AppState::new(db, queue)
}

pub fn test_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(chrono::Utc::now()))
}

/// Short timeouts and near-instant retries
pub fn fast_settings() -> PhaseSettings {
    PhaseSettings {
        build_timeout: Duration::from_secs(5),
        deploy_timeout: Duration::from_secs(5),
        retry: RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            backoff_multiplier: 2.0,
        },
    }
}

pub fn build_executor(
    db: &DatabaseConnection,
    builder: Arc<ScriptedBuilder>,
    deployer: Arc<ScriptedDeployer>,
    notifier: StatusNotifier,
    clock: Arc<ManualClock>,
    settings: PhaseSettings,
) -> PipelineExecutor {
    PipelineExecutor::new(db.clone(), builder, deployer, notifier, settings).with_clock(clock)
}

/// Executor whose collaborators always succeed, with no notification channels
pub fn default_executor(db: &DatabaseConnection) -> PipelineExecutor {
    let clock = test_clock();
    build_executor(
        db,
        Arc::new(ScriptedBuilder::new(clock.clone())),
        Arc::new(ScriptedDeployer::new(clock.clone())),
        StatusNotifier::new(db.clone(), Duration::from_secs(1)),
        clock,
        fast_settings(),
    )
}

// ============================================================================
// Scripted collaborators
// ============================================================================

/// Builder double. Each call pops the next scripted result; once the script
/// runs out it succeeds with `registry/<project>:<commit>`.
pub struct ScriptedBuilder {
    clock: Arc<ManualClock>,
    advance_secs: i64,
    delay: Option<Duration>,
    lines: Vec<String>,
    script: Mutex<VecDeque<Result<(), CollaboratorError>>>,
    calls: AtomicUsize,
}

impl ScriptedBuilder {
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            clock,
            advance_secs: 0,
            delay: None,
            lines: Vec::new(),
            script: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Seconds the manual clock moves forward per call
    pub fn taking(mut self, secs: i64) -> Self {
        self.advance_secs = secs;
        self
    }

    /// Real time to sleep before returning
    pub fn sleeping(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn logging(mut self, lines: &[&str]) -> Self {
        self.lines = lines.iter().map(|l| l.to_string()).collect();
        self
    }

    pub fn then(self, result: Result<(), CollaboratorError>) -> Self {
        self.script.lock().push_back(result);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Builder for ScriptedBuilder {
    async fn build(
        &self,
        request: &BuildRequest,
        log: LogWriter,
    ) -> Result<BuildOutput, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        for line in &self.lines {
            log.line(line);
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.clock.advance_secs(self.advance_secs);

        let next = self.script.lock().pop_front();
        match next {
            Some(Err(e)) => Err(e),
            _ => Ok(BuildOutput {
                image_ref: format!("registry/{}:{}", request.project, request.commit_hash),
            }),
        }
    }
}

/// Deployer double with the same scripting as [`ScriptedBuilder`]
pub struct ScriptedDeployer {
    clock: Arc<ManualClock>,
    advance_secs: i64,
    delay: Option<Duration>,
    lines: Vec<String>,
    script: Mutex<VecDeque<Result<(), CollaboratorError>>>,
    deployed: Mutex<Vec<String>>,
}

impl ScriptedDeployer {
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            clock,
            advance_secs: 0,
            delay: None,
            lines: Vec::new(),
            script: Mutex::new(VecDeque::new()),
            deployed: Mutex::new(Vec::new()),
        }
    }

    pub fn taking(mut self, secs: i64) -> Self {
        self.advance_secs = secs;
        self
    }

    pub fn sleeping(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn logging(mut self, lines: &[&str]) -> Self {
        self.lines = lines.iter().map(|l| l.to_string()).collect();
        self
    }

    pub fn then(self, result: Result<(), CollaboratorError>) -> Self {
        self.script.lock().push_back(result);
        self
    }

    /// Images passed to every call, in order
    pub fn deployed_images(&self) -> Vec<String> {
        self.deployed.lock().clone()
    }
}

#[async_trait]
impl Deployer for ScriptedDeployer {
    async fn deploy(&self, request: &DeployRequest, log: LogWriter) -> Result<(), CollaboratorError> {
        self.deployed.lock().push(request.image_ref.clone());
        for line in &self.lines {
            log.line(line);
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.clock.advance_secs(self.advance_secs);

        let next = self.script.lock().pop_front();
        next.unwrap_or(Ok(()))
    }
}

// ============================================================================
// Notification channels
// ============================================================================

#[derive(Default)]
pub struct RecordingChannel {
    events: Mutex<Vec<DeploymentEvent>>,
}

impl RecordingChannel {
    pub fn events(&self) -> Vec<DeploymentEvent> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn send(&self, event: &DeploymentEvent) -> SendResult {
        self.events.lock().push(event.clone());
        SendResult::ok()
    }
}

/// Always reports failure
pub struct FailingChannel;

#[async_trait]
impl NotificationChannel for FailingChannel {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn send(&self, _event: &DeploymentEvent) -> SendResult {
        SendResult::failed("connection refused")
    }
}

/// Never answers within any reasonable timeout
pub struct HangingChannel;

#[async_trait]
impl NotificationChannel for HangingChannel {
    fn name(&self) -> &'static str {
        "hanging"
    }

    async fn send(&self, _event: &DeploymentEvent) -> SendResult {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        SendResult::ok()
    }
}
