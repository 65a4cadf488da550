//! TaskStore port - タスク記録の正本（source of truth）
//!
//! # 設計原則
//! - すべての変更は `update` を通る（Dispatcher / Scheduler / Reaper の三者とも）
//! - 同じ id への変更は直列化され、異なる id は並行に進む
//! - mutator はコピーに適用され、`Ok` のときだけコミットされる
//! - ロックを握ったまま `.await` しない

use tokio::sync::watch;

use crate::domain::{Task, TaskdError};

pub trait TaskStore: Send + Sync + 'static {
    /// Register a new record. Fails with `DuplicateId` and leaves the existing one untouched.
    fn insert(&self, task: Task) -> Result<(), TaskdError>;

    fn get(&self, id: i64) -> Result<Task, TaskdError>;

    /// Atomic read-modify-write of one record.
    fn update<R, F>(&self, id: i64, mutator: F) -> Result<R, TaskdError>
    where
        F: FnOnce(&mut Task) -> Result<R, TaskdError>;

    /// Delete a record. Without `force` a running task fails with `StillRunning`.
    fn remove(&self, id: i64, force: bool) -> Result<Task, TaskdError>;

    /// Every record, ascending by id.
    fn list(&self) -> Vec<Task>;

    /// Replace the whole content (snapshot restore at startup).
    fn replace_all(&self, tasks: Vec<Task>);

    /// Revision counter bumped after every committed change.
    fn subscribe(&self) -> watch::Receiver<u64>;
}
