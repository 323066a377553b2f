//! Seams to the external systems that build and run images.
//!
//! The pipeline only knows these traits. Output is streamed through a
//! [`LogWriter`] while the call is in progress and the error type tells the
//! executor whether an attempt may be retried.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::config::PipelineConfig;
use crate::services::log_sink::LogWriter;

/// What to build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    pub deployment_id: i64,
    pub project: String,
    pub repository_url: String,
    pub commit_hash: String,
    pub branch: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutput {
    /// Reference of the pushed image, e.g. `registry.local/app:abc123`
    pub image_ref: String,
}

/// What to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployRequest {
    pub deployment_id: i64,
    pub project: String,
    pub image_ref: String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CollaboratorError {
    /// Worth another attempt (network blips, registry hiccups)
    #[error("{0}")]
    Transient(String),

    #[error("{0}")]
    Failed(String),

    #[error("timed out after {}s", .0.as_secs())]
    TimedOut(Duration),
}

impl CollaboratorError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, CollaboratorError::Transient(_))
    }
}

#[async_trait]
pub trait Builder: Send + Sync {
    /// Build and publish an image for `request`. The writer is dropped when
    /// the returned future completes.
    async fn build(
        &self,
        request: &BuildRequest,
        log: LogWriter,
    ) -> Result<BuildOutput, CollaboratorError>;
}

#[async_trait]
pub trait Deployer: Send + Sync {
    /// Roll `request.image_ref` out to the project's runtime
    async fn deploy(&self, request: &DeployRequest, log: LogWriter)
        -> Result<(), CollaboratorError>;
}

/// Exponential backoff for transient collaborator errors within a phase
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts per phase, including the first
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: config.retry_backoff,
            ..Self::default()
        }
    }

    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Delay before the attempt following `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let millis =
            (self.initial_backoff.as_millis() as f64) * self.backoff_multiplier.powi(exponent);
        Duration::from_millis(millis as u64).min(self.max_backoff)
    }
}

/// Run `command`, streaming stdout and stderr line by line into `log`.
///
/// The child is killed if the returned future is dropped, which is how phase
/// timeouts stop a runaway build.
pub async fn run_streaming(
    command: &mut Command,
    log: &LogWriter,
) -> Result<ExitStatus, CollaboratorError> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .map_err(|e| CollaboratorError::failed(format!("failed to start process: {}", e)))?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let mut stdout_lines = stdout.map(|s| BufReader::new(s).lines());
    let mut stderr_lines = stderr.map(|s| BufReader::new(s).lines());

    while stdout_lines.is_some() || stderr_lines.is_some() {
        tokio::select! {
            line = next_line(&mut stdout_lines), if stdout_lines.is_some() => {
                match line {
                    Some(line) => log.line(line),
                    None => stdout_lines = None,
                }
            }
            line = next_line(&mut stderr_lines), if stderr_lines.is_some() => {
                match line {
                    Some(line) => log.line(line),
                    None => stderr_lines = None,
                }
            }
        }
    }

    child
        .wait()
        .await
        .map_err(|e| CollaboratorError::transient(format!("failed to wait for process: {}", e)))
}

async fn next_line<R>(lines: &mut Option<tokio::io::Lines<BufReader<R>>>) -> Option<String>
where
    R: tokio::io::AsyncRead + Unpin,
{
    match lines {
        Some(lines) => lines.next_line().await.ok().flatten(),
        None => None,
    }
}

/// Describe a non-zero exit
pub fn exit_message(program: &str, status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("`{}` exited with status {}", program, code),
        None => format!("`{}` was terminated by a signal", program),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
            backoff_multiplier: 2.0,
        };

        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(350));
    }

    #[test]
    fn test_only_transient_errors_retry() {
        assert!(CollaboratorError::transient("registry 503").is_retryable());
        assert!(!CollaboratorError::failed("Dockerfile missing").is_retryable());
        assert!(!CollaboratorError::TimedOut(Duration::from_secs(1)).is_retryable());
    }

    #[test]
    fn test_timed_out_message() {
        assert_eq!(
            CollaboratorError::TimedOut(Duration::from_secs(1800)).to_string(),
            "timed out after 1800s"
        );
    }

    #[tokio::test]
    async fn test_run_streaming_captures_both_streams() {
        let (writer, mut rx) = LogWriter::channel();
        let mut command = Command::new("sh");
        command.arg("-c").arg("echo out; echo err 1>&2; exit 3");

        let status = run_streaming(&mut command, &writer).await.unwrap();
        drop(writer);

        assert_eq!(status.code(), Some(3));
        let mut lines = Vec::new();
        while let Some(chunk) = rx.recv().await {
            lines.push(chunk);
        }
        lines.sort();
        assert_eq!(lines, vec!["err\n".to_string(), "out\n".to_string()]);
    }
}
