//! Application bootstrapper
//!
//! Handles all initialization and setup for the Dockyard service.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::HeaderValue;
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{DeployerKind, LogFormat, QueueBackend, CONFIG};
use crate::db;
use crate::endpoints;
use crate::services::builder::CommandBuilder;
use crate::services::collaborators::{Builder, Deployer};
use crate::services::deployer::{CommandDeployer, KubernetesDeployer};
use crate::services::notifier::StatusNotifier;
use crate::services::pipeline::{PhaseSettings, PipelineExecutor};
use crate::services::queue::{DatabaseQueue, InMemoryQueue, SharedQueue};
use crate::services::scheduler::{self, PeriodicTask, RequeueQueuedTask};
use crate::services::worker::WorkerPool;
use crate::state::AppState;

/// Bootstrap and run the application
pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    tracing::info!("Starting Dockyard v{}", CONFIG.version);

    let conn = db::connect().await?;
    tracing::info!("Database connection established");

    let queue = init_queue(&conn);
    let cancel = CancellationToken::new();
    let role = CONFIG.pipeline.role;

    let workers = if role.runs_workers() {
        Some(start_workers(&conn, queue.clone(), cancel.clone()).await?)
    } else {
        tracing::info!("Worker role disabled for this process");
        None
    };

    if role.runs_http() {
        let app = create_app(AppState::new(conn, queue));
        serve(app).await?;
    } else {
        shutdown_signal().await;
    }

    cancel.cancel();
    if let Some(workers) = workers {
        workers.await?;
    }

    tracing::info!("Dockyard stopped");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("dockyard={}", CONFIG.log_level).into());

    match CONFIG.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_ansi(false))
            .init(),
    }
}

fn init_queue(conn: &db::DbConn) -> SharedQueue {
    let pipeline = &CONFIG.pipeline;
    match pipeline.queue_backend {
        QueueBackend::Memory => {
            tracing::info!("Using in-memory job queue");
            Arc::new(InMemoryQueue::new(pipeline.queue_max_deliveries))
        }
        QueueBackend::Database => {
            let worker_id = format!(
                "{}-{}",
                std::env::var("HOSTNAME").unwrap_or_else(|_| "dockyard".to_string()),
                std::process::id()
            );
            tracing::info!(worker_id = %worker_id, "Using database job queue");
            Arc::new(
                DatabaseQueue::new(conn.clone(), worker_id)
                    .with_visibility_timeout(pipeline.queue_visibility_timeout)
                    .with_retry_delay(pipeline.retry_backoff)
                    .with_max_deliveries(pipeline.queue_max_deliveries),
            )
        }
    }
}

async fn init_deployer() -> anyhow::Result<Arc<dyn Deployer>> {
    let config = &CONFIG.deployer;
    match config.kind {
        DeployerKind::Kubernetes => {
            let deployer = KubernetesDeployer::connect(config).await?;
            tracing::info!(namespace = %config.namespace, "Kubernetes deployer initialized");
            Ok(Arc::new(deployer))
        }
        DeployerKind::Command => {
            let command = config.deploy_command.clone().ok_or_else(|| {
                anyhow::anyhow!("DOCKYARD_DEPLOY_COMMAND is required for the command deployer")
            })?;
            tracing::info!("Command deployer initialized");
            Ok(Arc::new(CommandDeployer::new(command)))
        }
    }
}

/// Wire the executor and start the worker pool and periodic tasks
async fn start_workers(
    conn: &db::DbConn,
    queue: SharedQueue,
    cancel: CancellationToken,
) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    let builder: Arc<dyn Builder> = Arc::new(CommandBuilder::new(CONFIG.builder.clone()));
    let deployer = init_deployer().await?;
    let notifier = StatusNotifier::from_config(conn.clone(), &CONFIG.notifications);
    tracing::info!(
        channels = notifier.channel_count(),
        "Status notifier initialized"
    );

    let executor = Arc::new(PipelineExecutor::new(
        conn.clone(),
        builder,
        deployer,
        notifier,
        PhaseSettings::from_config(&CONFIG.pipeline),
    ));

    let tasks: Vec<Box<dyn PeriodicTask>> = vec![Box::new(RequeueQueuedTask {
        queue: queue.clone(),
        older_than: CONFIG.pipeline.requeue_after,
    })];
    scheduler::start_scheduler(conn.clone(), tasks, cancel.clone());

    let pool = WorkerPool::new(
        executor,
        queue,
        CONFIG.pipeline.workers,
        CONFIG.pipeline.queue_poll_interval,
        cancel,
    );
    Ok(pool.spawn())
}

/// Create the main application router
fn create_app(state: AppState) -> Router {
    let origins: Vec<HeaderValue> = CONFIG
        .server
        .allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    let cors = if origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    endpoints::create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// Start the HTTP server
async fn serve(app: Router) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", CONFIG.server.host, CONFIG.server.port).parse()?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
