//! ReaperLoop - 子プロセスの終了を記録に反映する
//!
//! # フロー
//! 1. waiter から `ExitEvent` を受け取る
//! 2. `TaskStore::update` で exited / error と終了コードを記録
//! 3. pid が一致しないイベント（Stop 済み、再起動済み）は無視

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::domain::{ExitEvent, TaskdError};
use crate::ports::{Clock, SharedClock, TaskStore};

pub struct ReaperLoop<S> {
    store: Arc<S>,
    clock: SharedClock,
    exits: mpsc::UnboundedReceiver<ExitEvent>,
}

impl<S: TaskStore> ReaperLoop<S> {
    pub fn new(store: Arc<S>, clock: SharedClock, exits: mpsc::UnboundedReceiver<ExitEvent>) -> Self {
        Self { store, clock, exits }
    }

    /// Apply one exit. Returns whether the record changed.
    pub fn apply(&self, event: ExitEvent) -> bool {
        let now = self.clock.epoch_secs();
        let result = self.store.update(event.task_id, |task| {
            let applied = task.record_exit(event.pid, event.code, now);
            Ok((applied, task.status))
        });
        match result {
            Ok((true, status)) => {
                info!(task_id = event.task_id, pid = event.pid, code = ?event.code, %status, "task exited");
                true
            }
            Ok((false, _)) => {
                debug!(task_id = event.task_id, pid = event.pid, "stale exit ignored");
                false
            }
            Err(TaskdError::NotFound(_)) => {
                debug!(task_id = event.task_id, pid = event.pid, "exit for removed task");
                false
            }
            Err(e) => {
                debug!(task_id = event.task_id, error = %e, "exit not applied");
                false
            }
        }
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                event = self.exits.recv() => {
                    let Some(event) = event else { break };
                    self.apply(event);
                }
            }
        }
        debug!("reaper loop stopped");
    }
}
