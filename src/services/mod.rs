pub mod builder;
pub mod clock;
pub mod collaborators;
pub mod deployer;
pub mod log_sink;
pub mod notifier;
pub mod pipeline;
pub mod poller;
pub mod queue;
pub mod rollback;
pub mod scheduler;
pub mod store;
pub mod trigger;
pub mod worker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use collaborators::{Builder, CollaboratorError, Deployer, RetryPolicy};
pub use log_sink::{LogSink, LogWriter};
pub use notifier::{NotificationChannel, StatusNotifier};
pub use pipeline::{PhaseSettings, PipelineExecutor, ProcessOutcome};
pub use queue::{DatabaseQueue, InMemoryQueue, JobQueue, SharedQueue};
pub use rollback::RollbackCoordinator;
pub use worker::WorkerPool;
