//! DaemonBuilder - デーモンの構築とワイヤリング
//!
//! # 起動手順
//! 1. スナップショットを読み込む（壊れている・不正な記録や重複 id があれば起動失敗）
//! 2. running のまま保存された記録は前のデーモンの子なので stopped に落とす
//! 3. Reaper / Scheduler / Persist の三つのループを起動
//! 4. `relaunch_running` なら落とした Async タスクを起動し直す
//!
//! # 停止手順
//! ループを止め（Persist が最後に保存）、その後で子プロセスを全て止める。

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::app::dispatcher::Dispatcher;
use crate::app::persist_loop::PersistLoop;
use crate::app::reaper_loop::ReaperLoop;
use crate::app::scheduler_loop::SchedulerLoop;
use crate::app::status::StatusCounts;
use crate::app::supervisor::{LaunchReason, Supervisor};
use crate::config::Config;
use crate::domain::{TaskKind, TaskdError};
use crate::impls::{JsonFileSnapshot, MemoryTaskStore};
use crate::ports::{NoSnapshot, SharedClock, SnapshotStore, SystemClock, TaskStore, UlidGenerator};

/// DaemonBuilder はデーモンを構築
///
/// # 使用例
/// ```ignore
/// let daemon = DaemonBuilder::new(Config::load(None)?).build().await?;
/// let resp = daemon.dispatcher().handle_json(body).await;
/// daemon.shutdown_and_join().await;
/// ```
pub struct DaemonBuilder<S> {
    config: Config,
    store: Arc<S>,
    snapshot: Arc<dyn SnapshotStore>,
    clock: SharedClock,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("failed to restore tasks from snapshot: {0}")]
    Restore(#[source] TaskdError),
}

impl DaemonBuilder<MemoryTaskStore> {
    /// In-memory store, wall clock, and the snapshot file named by the config (if any).
    pub fn new(config: Config) -> Self {
        let snapshot: Arc<dyn SnapshotStore> = match config.snapshot_path() {
            Some(path) => {
                let file = JsonFileSnapshot::new(path);
                debug!(path = %file.path().display(), "snapshot file");
                Arc::new(file)
            }
            None => Arc::new(NoSnapshot),
        };
        Self {
            config,
            store: Arc::new(MemoryTaskStore::new()),
            snapshot,
            clock: Arc::new(SystemClock),
        }
    }
}

impl<S: TaskStore> DaemonBuilder<S> {
    pub fn with_store<T: TaskStore>(self, store: Arc<T>) -> DaemonBuilder<T> {
        DaemonBuilder {
            config: self.config,
            store,
            snapshot: self.snapshot,
            clock: self.clock,
        }
    }

    pub fn with_snapshot(mut self, snapshot: Arc<dyn SnapshotStore>) -> Self {
        self.snapshot = snapshot;
        self
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub async fn build(self) -> Result<Daemon<S>, BuildError> {
        let DaemonBuilder {
            config,
            store,
            snapshot,
            clock,
        } = self;

        let mut tasks = snapshot
            .load()
            .await
            .map_err(BuildError::Restore)?
            .unwrap_or_default();
        let mut seen = HashSet::new();
        let mut orphaned = Vec::new();
        for task in &mut tasks {
            task.validate().map_err(BuildError::Restore)?;
            if !seen.insert(task.id) {
                return Err(BuildError::Restore(TaskdError::DuplicateId(task.id)));
            }
            if task.mark_orphaned() {
                orphaned.push((task.id, task.kind()));
            }
        }
        info!(tasks = tasks.len(), orphaned = orphaned.len(), "tasks restored");
        store.replace_all(tasks);

        let (exits_tx, exits_rx) = mpsc::unbounded_channel();
        let supervisor = Arc::new(Supervisor::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            exits_tx,
            config.stop_grace(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&supervisor),
            Arc::new(UlidGenerator::new(Arc::clone(&clock))),
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let reaper = ReaperLoop::new(Arc::clone(&store), Arc::clone(&clock), exits_rx);
        let scheduler = SchedulerLoop::new(
            Arc::clone(&supervisor),
            config.scheduler.calendar,
            config.tick(),
        );
        let persist = PersistLoop::new(Arc::clone(&store), snapshot);
        let joins = vec![
            tokio::spawn(reaper.run(shutdown_rx.clone())),
            tokio::spawn(scheduler.run(shutdown_rx.clone())),
            tokio::spawn(persist.run(shutdown_rx)),
        ];

        if config.storage.relaunch_running {
            for (id, kind) in orphaned {
                if kind != TaskKind::Async {
                    continue;
                }
                match supervisor.launch(id, LaunchReason::Manual) {
                    Ok(pid) => info!(task_id = id, pid, "task relaunched after restart"),
                    Err(e) => warn!(task_id = id, error = %e, "failed to relaunch task"),
                }
            }
        }

        Ok(Daemon {
            dispatcher,
            supervisor,
            shutdown_tx,
            joins,
        })
    }
}

/// Running daemon handle.
/// - `shutdown_and_join()` でループを止め、子プロセスも全て止める
pub struct Daemon<S> {
    dispatcher: Arc<Dispatcher<S>>,
    supervisor: Arc<Supervisor<S>>,
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl<S: TaskStore> Daemon<S> {
    pub fn dispatcher(&self) -> Arc<Dispatcher<S>> {
        Arc::clone(&self.dispatcher)
    }

    pub fn counts(&self) -> StatusCounts {
        self.dispatcher.counts()
    }

    pub fn request_shutdown(&self) {
        // ignore send error: receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(e) = join.await {
                warn!(error = %e, "background loop panicked");
            }
        }
        self.supervisor.stop_all().await;
        info!("daemon stopped");
    }
}
