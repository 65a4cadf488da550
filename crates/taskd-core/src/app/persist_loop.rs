//! PersistLoop - ストアの変更をスナップショットに書き出す
//!
//! ストアのリビジョン（watch）が進むたびに一覧を保存する。
//! 連続した変更は watch がまとめるので、保存は最新の状態に対して一回で済む。
//! シャットダウン時にもう一度保存する。

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error};

use crate::domain::TaskdError;
use crate::ports::{SnapshotStore, TaskStore};

pub struct PersistLoop<S> {
    store: Arc<S>,
    snapshot: Arc<dyn SnapshotStore>,
}

impl<S: TaskStore> PersistLoop<S> {
    pub fn new(store: Arc<S>, snapshot: Arc<dyn SnapshotStore>) -> Self {
        Self { store, snapshot }
    }

    pub async fn save_now(&self) -> Result<(), TaskdError> {
        let tasks = self.store.list();
        self.snapshot.save(&tasks).await?;
        debug!(tasks = tasks.len(), "snapshot saved");
        Ok(())
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut revision = self.store.subscribe();
        revision.borrow_and_update();
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
                changed = revision.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    revision.borrow_and_update();
                    if let Err(e) = self.save_now().await {
                        error!(error = %e, "failed to save snapshot");
                    }
                }
            }
        }
        if let Err(e) = self.save_now().await {
            error!(error = %e, "failed to save final snapshot");
        }
        debug!("persist loop stopped");
    }
}
