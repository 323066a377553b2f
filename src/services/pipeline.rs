//! Drives one deployment record from `queued` to a terminal state.
//!
//! `process` is safe to call any number of times for the same id: only the
//! caller that wins the claim runs the phases, everyone else returns early
//! without touching the record.
//!
//! Terminal notifications go out after the final state is committed. The
//! dispatch is awaited on the worker, with every channel sent concurrently
//! and cut off at the notifier timeout, so a run holds its worker slot for at
//! most one timeout longer. Delivery results never reach the record.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use sea_orm::DatabaseConnection;

use crate::config::PipelineConfig;
use crate::error::{AppError, PipelineError, Result};
use crate::models::deployment::{self, DeploymentStatus};
use crate::models::deployment_log::LogPhase;
use crate::models::project;
use crate::services::clock::{elapsed_seconds, Clock, SystemClock};
use crate::services::collaborators::{
    BuildRequest, Builder, CollaboratorError, DeployRequest, Deployer, RetryPolicy,
};
use crate::services::log_sink::{LogSink, LogWriter};
use crate::services::notifier::{Outcome, StatusNotifier};
use crate::services::store::{self, FailedPhase};

const TRACING_TARGET: &str = "dockyard::pipeline";

/// What a call to [`PipelineExecutor::process`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// This call ran the pipeline and the deployment went live
    Succeeded,
    /// This call ran the pipeline and a phase failed
    Failed,
    /// Record was already terminal; nothing changed
    AlreadyFinished,
    /// Record is missing or another worker owns it; nothing changed
    ClaimConflict,
}

/// Timeouts and retry policy for the two phases
#[derive(Debug, Clone)]
pub struct PhaseSettings {
    pub build_timeout: Duration,
    pub deploy_timeout: Duration,
    pub retry: RetryPolicy,
}

impl PhaseSettings {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            build_timeout: config.build_timeout,
            deploy_timeout: config.deploy_timeout,
            retry: RetryPolicy::from_config(config),
        }
    }
}

impl Default for PhaseSettings {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

pub struct PipelineExecutor {
    db: DatabaseConnection,
    builder: Arc<dyn Builder>,
    deployer: Arc<dyn Deployer>,
    notifier: StatusNotifier,
    clock: Arc<dyn Clock>,
    settings: PhaseSettings,
}

impl PipelineExecutor {
    pub fn new(
        db: DatabaseConnection,
        builder: Arc<dyn Builder>,
        deployer: Arc<dyn Deployer>,
        notifier: StatusNotifier,
        settings: PhaseSettings,
    ) -> Self {
        Self {
            db,
            builder,
            deployer,
            notifier,
            clock: Arc::new(SystemClock),
            settings,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Run the pipeline for `deployment_id` if it is still queued.
    ///
    /// Phase failures are recorded on the deployment and reported as
    /// `Ok(ProcessOutcome::Failed)`. A store error after the claim also fails
    /// the record, since a redelivered job can never claim it again. `Err`
    /// means the record could not be loaded, claimed or failed, and the job
    /// should be redelivered.
    pub async fn process(&self, deployment_id: i64) -> Result<ProcessOutcome> {
        let Some(record) = store::find(&self.db, deployment_id).await? else {
            tracing::warn!(
                target: TRACING_TARGET,
                deployment_id,
                "Deployment not found, skipping job"
            );
            return Ok(ProcessOutcome::ClaimConflict);
        };

        if record.is_finished() {
            tracing::info!(
                target: TRACING_TARGET,
                deployment_id,
                status = %record.status,
                "Deployment already finished, skipping job"
            );
            return Ok(ProcessOutcome::AlreadyFinished);
        }

        let skip_build = record.skips_build();
        let claim_to = if skip_build {
            DeploymentStatus::Deploying
        } else {
            DeploymentStatus::Building
        };

        let started_at = self.clock.now();
        if !store::claim(&self.db, deployment_id, claim_to, started_at).await? {
            tracing::info!(
                target: TRACING_TARGET,
                deployment_id,
                "{}",
                PipelineError::ClaimConflict(deployment_id)
            );
            return Ok(ProcessOutcome::ClaimConflict);
        }

        match self.run_claimed(&record, skip_build, started_at).await {
            Ok(outcome) => Ok(outcome),
            Err(cause) => self.abandon(deployment_id, cause).await,
        }
    }

    async fn run_claimed(
        &self,
        record: &deployment::Model,
        skip_build: bool,
        started_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<ProcessOutcome> {
        let deployment_id = record.id;
        let project = store::get_project(&self.db, record.project_id).await?;
        let sink = LogSink::new(self.db.clone(), deployment_id);

        tracing::info!(
            target: TRACING_TARGET,
            deployment_id,
            project_id = project.id,
            commit = %record.commit_hash,
            rollback_from = ?record.rollback_from_id,
            "Claimed deployment"
        );

        let image_ref = match record.docker_image.clone() {
            Some(image) if skip_build => image,
            _ => match self.build(record, &project, &sink, started_at).await? {
                Some(image) => image,
                None => return Ok(ProcessOutcome::Failed),
            },
        };

        self.deploy(record, &project, &sink, image_ref).await
    }

    /// Fail a claimed record after a store error in one of its phases.
    ///
    /// Returns `cause` when the record is no longer in progress or the
    /// failure cannot be written either.
    async fn abandon(&self, id: i64, cause: AppError) -> Result<ProcessOutcome> {
        tracing::error!(
            target: TRACING_TARGET,
            deployment_id = id,
            error = %cause,
            "Pipeline aborted after claim"
        );

        let record = match store::find(&self.db, id).await {
            Ok(Some(record)) => record,
            _ => return Err(cause),
        };

        let finished_at = self.clock.now();
        let elapsed = elapsed_seconds(record.started_at.unwrap_or(finished_at), finished_at);
        let phase = match record.status() {
            Some(DeploymentStatus::Building) => FailedPhase::Build { secs: elapsed },
            Some(DeploymentStatus::Deploying) => FailedPhase::Deploy {
                secs: (elapsed - record.build_duration_seconds.unwrap_or(0)).max(0),
            },
            _ => return Err(cause),
        };

        let message = format!("Pipeline aborted: {}", cause);
        match self.fail(id, phase, &message, finished_at).await {
            Ok(()) => Ok(ProcessOutcome::Failed),
            Err(e) => {
                tracing::error!(
                    target: TRACING_TARGET,
                    deployment_id = id,
                    error = %e,
                    "Could not record aborted deployment"
                );
                Err(cause)
            }
        }
    }

    /// Returns the image on success, `None` once the failure is persisted
    async fn build(
        &self,
        record: &deployment::Model,
        project: &project::Model,
        sink: &LogSink,
        started_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<Option<String>> {
        let request = BuildRequest {
            deployment_id: record.id,
            project: project.name.clone(),
            repository_url: project.repository_url.clone(),
            commit_hash: record.commit_hash.clone(),
            branch: record.branch.clone(),
        };

        let builder = self.builder.clone();
        let result = self
            .run_phase(sink, LogPhase::Build, self.settings.build_timeout, |log| {
                let builder = builder.clone();
                let request = request.clone();
                async move { builder.build(&request, log).await }
            })
            .await?;

        let finished_at = self.clock.now();
        let secs = elapsed_seconds(started_at, finished_at);

        match result {
            Ok(output) => {
                if !store::finish_build(&self.db, record.id, &output.image_ref, secs).await? {
                    return Err(PipelineError::ClaimConflict(record.id).into());
                }
                tracing::info!(
                    target: TRACING_TARGET,
                    deployment_id = record.id,
                    image = %output.image_ref,
                    duration_secs = secs,
                    "Build succeeded"
                );
                Ok(Some(output.image_ref))
            }
            Err(e) => {
                let message = PipelineError::Build(e.to_string()).to_string();
                self.fail(record.id, FailedPhase::Build { secs }, &message, finished_at)
                    .await?;
                Ok(None)
            }
        }
    }

    async fn deploy(
        &self,
        record: &deployment::Model,
        project: &project::Model,
        sink: &LogSink,
        image_ref: String,
    ) -> Result<ProcessOutcome> {
        let request = DeployRequest {
            deployment_id: record.id,
            project: project.name.clone(),
            image_ref,
        };

        let started_at = self.clock.now();
        let deployer = self.deployer.clone();
        let result = self
            .run_phase(sink, LogPhase::Deploy, self.settings.deploy_timeout, |log| {
                let deployer = deployer.clone();
                let request = request.clone();
                async move { deployer.deploy(&request, log).await }
            })
            .await?;

        let finished_at = self.clock.now();
        let secs = elapsed_seconds(started_at, finished_at);

        match result {
            Ok(()) => {
                if !store::succeed_and_promote(&self.db, record.id, project.id, secs, finished_at)
                    .await?
                {
                    return Err(PipelineError::ClaimConflict(record.id).into());
                }
                tracing::info!(
                    target: TRACING_TARGET,
                    deployment_id = record.id,
                    project_id = project.id,
                    image = %request.image_ref,
                    duration_secs = secs,
                    "Deployment succeeded and is now live"
                );
                self.announce(record.id, Outcome::Succeeded).await;
                Ok(ProcessOutcome::Succeeded)
            }
            Err(e) => {
                let message = PipelineError::Deploy(e.to_string()).to_string();
                self.fail(record.id, FailedPhase::Deploy { secs }, &message, finished_at)
                    .await?;
                Ok(ProcessOutcome::Failed)
            }
        }
    }

    async fn fail(
        &self,
        id: i64,
        phase: FailedPhase,
        message: &str,
        finished_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        if !store::fail(&self.db, id, phase, message, finished_at).await? {
            return Err(PipelineError::ClaimConflict(id).into());
        }
        tracing::warn!(target: TRACING_TARGET, deployment_id = id, "{}", message);
        self.announce(id, Outcome::Failed).await;
        Ok(())
    }

    /// Notify from the committed record
    async fn announce(&self, id: i64, outcome: Outcome) {
        match store::find(&self.db, id).await {
            Ok(Some(record)) => {
                self.notifier.notify(&record, outcome).await;
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(
                target: TRACING_TARGET,
                deployment_id = id,
                "Failed to reload deployment for notification: {}",
                e
            ),
        }
    }

    /// Call a collaborator with retries, draining its output into the phase
    /// log while it runs. The outer `Result` carries store failures only.
    async fn run_phase<T, F, Fut>(
        &self,
        sink: &LogSink,
        phase: LogPhase,
        timeout: Duration,
        mut call: F,
    ) -> Result<std::result::Result<T, CollaboratorError>>
    where
        F: FnMut(LogWriter) -> Fut,
        Fut: Future<Output = std::result::Result<T, CollaboratorError>>,
    {
        let policy = &self.settings.retry;
        let mut attempt = 1;

        loop {
            let (writer, rx) = LogWriter::channel();
            let work = tokio::time::timeout(timeout, call(writer));
            let (outcome, drained) = tokio::join!(work, sink.drain(phase, rx));
            drained?;

            let outcome = outcome.unwrap_or_else(|_| Err(CollaboratorError::TimedOut(timeout)));

            match outcome {
                Ok(value) => return Ok(Ok(value)),
                Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                    let delay = policy.backoff(attempt);
                    tracing::warn!(
                        target: TRACING_TARGET,
                        deployment_id = sink.deployment_id(),
                        phase = %phase,
                        attempt,
                        max_attempts = policy.max_attempts,
                        error = %e,
                        "Transient phase error, retrying"
                    );
                    sink.append(
                        phase,
                        &format!(
                            "[dockyard] attempt {}/{} failed: {}; retrying in {}ms\n",
                            attempt,
                            policy.max_attempts,
                            e,
                            delay.as_millis()
                        ),
                    )
                    .await?;
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(CollaboratorError::Transient(msg)) if attempt > 1 => {
                    return Ok(Err(CollaboratorError::Failed(format!(
                        "{} (gave up after {} attempts)",
                        msg, attempt
                    ))));
                }
                Err(e) => return Ok(Err(e)),
            }
        }
    }
}
