//! Append-only, phase-scoped deployment logs.
//!
//! Each appended chunk is its own `deployment_logs` row and rows are never
//! updated or deleted, so a reader polling `read` only ever sees a log grow.

use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::models::deployment_log::{self, LogPhase};
use crate::models::prelude::*;

/// Handle given to builders and deployers to stream their output.
///
/// Cloning is cheap. The executor stops draining once every clone has been
/// dropped, so collaborators must not keep a writer past the end of their call.
#[derive(Debug, Clone)]
pub struct LogWriter {
    tx: mpsc::UnboundedSender<String>,
}

impl LogWriter {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Write a raw chunk
    pub fn write(&self, chunk: impl Into<String>) {
        // Receiver gone means the phase is over; late output is discarded
        let _ = self.tx.send(chunk.into());
    }

    /// Write a chunk terminated by a newline
    pub fn line(&self, line: impl AsRef<str>) {
        self.write(format!("{}\n", line.as_ref()));
    }
}

/// Log accumulator for a single deployment
#[derive(Clone)]
pub struct LogSink {
    db: DatabaseConnection,
    deployment_id: i64,
}

impl LogSink {
    pub fn new(db: DatabaseConnection, deployment_id: i64) -> Self {
        Self { db, deployment_id }
    }

    pub fn deployment_id(&self) -> i64 {
        self.deployment_id
    }

    /// Add `chunk` to the end of the phase's log. Empty chunks are ignored.
    pub async fn append(&self, phase: LogPhase, chunk: &str) -> Result<()> {
        if chunk.is_empty() {
            return Ok(());
        }

        let row = deployment_log::ActiveModel {
            deployment_id: Set(self.deployment_id),
            phase: Set(phase.as_str().to_string()),
            content: Set(chunk.to_string()),
            created_at: Set(chrono::Utc::now()),
            ..Default::default()
        };
        row.insert(&self.db).await?;
        Ok(())
    }

    /// Current full text of the phase's log
    pub async fn read(&self, phase: LogPhase) -> Result<String> {
        read_phase_log(&self.db, self.deployment_id, phase).await
    }

    /// Persist everything written to `rx` until all writers are dropped.
    /// Returns the number of chunks stored.
    pub async fn drain(
        &self,
        phase: LogPhase,
        mut rx: mpsc::UnboundedReceiver<String>,
    ) -> Result<usize> {
        let mut stored = 0;
        while let Some(chunk) = rx.recv().await {
            self.append(phase, &chunk).await?;
            stored += 1;
        }
        Ok(stored)
    }
}

/// Concatenate a phase's chunks in insertion order
pub async fn read_phase_log<C: ConnectionTrait>(
    db: &C,
    deployment_id: i64,
    phase: LogPhase,
) -> Result<String> {
    let chunks = DeploymentLog::find()
        .filter(deployment_log::Column::DeploymentId.eq(deployment_id))
        .filter(deployment_log::Column::Phase.eq(phase.as_str()))
        .order_by_asc(deployment_log::Column::Id)
        .all(db)
        .await?;

    Ok(chunks.into_iter().map(|c| c.content).collect())
}
