//! SnapshotStore port - 再起動をまたいでタスク定義を保持する

use async_trait::async_trait;

use crate::domain::{Task, TaskdError};

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// `Ok(None)` when no snapshot exists yet. A snapshot that exists but cannot be
    /// decoded is an error.
    async fn load(&self) -> Result<Option<Vec<Task>>, TaskdError>;

    async fn save(&self, tasks: &[Task]) -> Result<(), TaskdError>;
}

/// Store without durability.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSnapshot;

#[async_trait]
impl SnapshotStore for NoSnapshot {
    async fn load(&self) -> Result<Option<Vec<Task>>, TaskdError> {
        Ok(None)
    }

    async fn save(&self, _tasks: &[Task]) -> Result<(), TaskdError> {
        Ok(())
    }
}
