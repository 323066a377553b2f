use crate::db::DbConn;
use crate::services::queue::SharedQueue;
use crate::services::rollback::RollbackCoordinator;

/// Shared state handed to every HTTP handler
#[derive(Clone)]
pub struct AppState {
    pub db: DbConn,
    pub queue: SharedQueue,
}

impl AppState {
    pub fn new(db: DbConn, queue: SharedQueue) -> Self {
        Self { db, queue }
    }

    pub fn rollback(&self) -> RollbackCoordinator {
        RollbackCoordinator::new(self.db.clone(), self.queue.clone())
    }
}
