//! Dispatcher - コマンドを検証して実行し、envelope を返す
//!
//! # 設計
//! - 全ての失敗は `TaskdError` として回収し、`{code, msg, data}` に変換する
//! - 状態の読み書きは `TaskStore::update` 経由のみ。Dispatcher 自身は記録を持たない
//! - 複数タスクに当たるコマンドは id 昇順に一件ずつ適用し、成功と失敗を data に並べる
//! - 各コマンドは request id 付きの span の中で実行する

use std::sync::Arc;

use tracing::{Instrument, debug, info, info_span, warn};

use crate::app::status::StatusCounts;
use crate::app::supervisor::{LaunchReason, Supervisor};
use crate::config::expand_home;
use crate::domain::{
    Command, Data, ErrorDetail, FailedTask, Incoming, Outgoing, Response, Stdin, Target, Task,
    TaskKind, TaskType, TaskdError,
};
use crate::ports::{Clock, IdGenerator, TaskStore};

pub struct Dispatcher<S> {
    supervisor: Arc<Supervisor<S>>,
    ids: Arc<dyn IdGenerator>,
}

impl<S: TaskStore> Dispatcher<S> {
    pub fn new(supervisor: Arc<Supervisor<S>>, ids: Arc<dyn IdGenerator>) -> Self {
        Self { supervisor, ids }
    }

    fn store(&self) -> &S {
        self.supervisor.store()
    }

    pub fn counts(&self) -> StatusCounts {
        StatusCounts::from_tasks(&self.store().list(), self.supervisor.live_children())
    }

    /// Raw request body → envelope(s). Malformed JSON becomes an `InvalidRequest` envelope.
    pub async fn handle_json(&self, body: &[u8]) -> Outgoing {
        match serde_json::from_slice::<Incoming>(body) {
            Ok(incoming) => self.handle(incoming).await,
            Err(e) => {
                warn!(error = %e, "malformed request");
                Outgoing::One(Response::from(TaskdError::InvalidRequest(e.to_string())))
            }
        }
    }

    /// A batch is executed in order and answered with envelopes in the same order.
    pub async fn handle(&self, incoming: Incoming) -> Outgoing {
        match incoming {
            Incoming::One(request) => Outgoing::One(self.dispatch(request.command).await),
            Incoming::Batch(requests) => {
                let mut responses = Vec::with_capacity(requests.len());
                for request in requests {
                    responses.push(self.dispatch(request.command).await);
                }
                Outgoing::Batch(responses)
            }
        }
    }

    pub async fn dispatch(&self, command: Command) -> Response {
        let request_id = self.ids.next_request_id();
        let span = info_span!("command", request_id = %request_id, command = command.name());
        async move {
            let response = self.execute(command).await;
            if response.is_success() {
                debug!(code = response.code, "command succeeded");
            } else {
                warn!(code = response.code, msg = %response.msg, "command failed");
            }
            response
        }
        .instrument(span)
        .await
    }

    async fn execute(&self, command: Command) -> Response {
        match command {
            Command::List(target) => self.list(target.as_ref()),
            Command::Add(task) => {
                let id = task.id;
                match self.add(task) {
                    Ok(()) => Response::success(format!("Task [{id}] added")),
                    Err(e) => Response::from(e),
                }
            }
            Command::Run(task) => self.run(task),
            Command::Reload(task) => self.reload(task),
            Command::Start(target) => self.for_each(&target, "started", |id| self.start(id)),
            Command::Stop(target) => self.for_each(&target, "stopped", |id| self.stop(id)),
            Command::Pause(target) => self.for_each(&target, "paused", |id| self.pause(id)),
            Command::Resume(target) => self.for_each(&target, "resumed", |id| self.resume(id)),
            Command::Restart(target) => {
                self.for_each(&target, "restarted", |id| self.restart(id))
            }
            Command::Remove(target) => {
                let force = target.force;
                self.for_each(&target, "removed", |id| self.remove(id, force))
            }
            Command::Write(target, data) => self.write(&target, data.as_bytes()).await,
        }
    }

    fn list(&self, target: Option<&Target>) -> Response {
        let tasks = self.store().list();
        let Some(target) = target else {
            return Response::status(tasks);
        };
        match target.select(&tasks) {
            Ok(ids) => Response::status(tasks.into_iter().filter(|t| ids.contains(&t.id)).collect()),
            Err(e) => Response::from(e),
        }
    }

    fn add(&self, mut task: Task) -> Result<(), TaskdError> {
        task.validate()?;
        expand_paths(&mut task);
        task.prepare_for_add(self.supervisor.clock().epoch_secs());

        let (id, kind) = (task.id, task.kind());
        let name = task.name.clone();
        self.store().insert(task)?;
        info!(task_id = id, %name, %kind, "task added");
        Ok(())
    }

    /// Add, then Start. A Scheduled task is only armed.
    fn run(&self, task: Task) -> Response {
        let (id, kind) = (task.id, task.kind());
        if let Err(e) = self.add(task) {
            return Response::from(e);
        }
        if kind == TaskKind::Scheduled {
            return Response::success(format!("Task [{id}] added"));
        }
        match self.start(id) {
            Ok(()) => Response::success(format!("Task [{id}] started")),
            Err(e) => Response::from(e),
        }
    }

    /// Replace the definition stored under the same id.
    fn reload(&self, task: Task) -> Response {
        let id = task.id;
        // validate first so a bad definition does not delete the current one
        if let Err(e) = task.validate() {
            return Response::from(e);
        }
        if let Err(e) = self.store().remove(id, false) {
            return Response::from(e);
        }
        match self.add(task) {
            Ok(()) => {
                info!(task_id = id, "task reloaded");
                Response::success(format!("Task [{id}] reloaded"))
            }
            Err(e) => Response::from(e),
        }
    }

    fn start(&self, id: i64) -> Result<(), TaskdError> {
        // paused Periodic: Start means Resume
        let resumed = self.store().update(id, |task| match &mut task.task_type {
            TaskType::Periodic(p) if p.paused => {
                p.paused = false;
                Ok(true)
            }
            _ => Ok(false),
        })?;
        if resumed {
            info!(task_id = id, "periodic task resumed");
            return Ok(());
        }
        self.supervisor.launch(id, LaunchReason::Manual).map(|_| ())
    }

    fn stop(&self, id: i64) -> Result<(), TaskdError> {
        let now = self.supervisor.clock().epoch_secs();
        let pid = self.store().update(id, |task| {
            let newly_paused = match &mut task.task_type {
                TaskType::Periodic(p) => Some(!std::mem::replace(&mut p.paused, true)),
                _ => None,
            };
            match newly_paused {
                // Periodic: Stop = Pause, and a run in progress ends too
                Some(true) if !task.is_running() => Ok(None),
                Some(false) if !task.is_running() => {
                    Err(TaskdError::invalid_state(id, "is already paused"))
                }
                _ => task.mark_stopped(now).map(Some),
            }
        })?;
        match pid {
            Some(pid) => {
                if !self.supervisor.signal_stop(pid) {
                    debug!(task_id = id, pid, "process already exited");
                }
                info!(task_id = id, pid, "task stopped");
            }
            None => info!(task_id = id, "periodic task paused"),
        }
        Ok(())
    }

    fn pause(&self, id: i64) -> Result<(), TaskdError> {
        self.store().update(id, |task| match &mut task.task_type {
            TaskType::Periodic(p) if !p.paused => {
                p.paused = true;
                Ok(())
            }
            TaskType::Periodic(_) => Err(TaskdError::invalid_state(id, "is already paused")),
            other => Err(TaskdError::invalid_state(
                id,
                format!("is {} and cannot be paused", other.kind()),
            )),
        })?;
        info!(task_id = id, "periodic task paused");
        Ok(())
    }

    fn resume(&self, id: i64) -> Result<(), TaskdError> {
        self.store().update(id, |task| match &mut task.task_type {
            TaskType::Periodic(p) if p.paused => {
                p.paused = false;
                Ok(())
            }
            TaskType::Periodic(_) => Err(TaskdError::invalid_state(id, "is not paused")),
            other => Err(TaskdError::invalid_state(
                id,
                format!("is {} and cannot be resumed", other.kind()),
            )),
        })?;
        info!(task_id = id, "periodic task resumed");
        Ok(())
    }

    /// Stop the current run if there is one, then launch again. A paused Periodic task
    /// is resumed first.
    fn restart(&self, id: i64) -> Result<(), TaskdError> {
        let now = self.supervisor.clock().epoch_secs();
        let stopped = self.store().update(id, |task| {
            if let TaskType::Periodic(p) = &mut task.task_type {
                p.paused = false;
            }
            if task.is_running() {
                task.mark_stopped(now).map(Some)
            } else {
                Ok(None)
            }
        })?;
        if let Some(pid) = stopped {
            self.supervisor.signal_stop(pid);
            debug!(task_id = id, pid, "previous run stopped");
        }
        self.supervisor.launch(id, LaunchReason::Manual).map(|_| ())
    }

    fn remove(&self, id: i64, force: bool) -> Result<(), TaskdError> {
        let removed = self.store().remove(id, force)?;
        if let Some(pid) = removed.pid.filter(|_| removed.is_running()) {
            self.supervisor.signal_stop(pid);
            info!(task_id = id, pid, "running task removed, process stopped");
        } else {
            info!(task_id = id, "task removed");
        }
        Ok(())
    }

    async fn write(&self, target: &Target, data: &[u8]) -> Response {
        let ids = match target.resolve(&self.store().list()) {
            Ok(ids) => ids,
            Err(e) => return Response::from(e),
        };
        let mut outcomes = Vec::with_capacity(ids.len());
        for id in ids {
            let result = self.write_one(id, data).await;
            outcomes.push((id, result));
        }
        aggregate("written", outcomes)
    }

    async fn write_one(&self, id: i64, data: &[u8]) -> Result<(), TaskdError> {
        let task = self.store().get(id)?;
        let pid = task
            .pid
            .filter(|_| task.is_running())
            .ok_or_else(|| TaskdError::invalid_state(id, "is not running"))?;
        self.supervisor.write_stdin(id, pid, data).await?;
        debug!(task_id = id, pid, bytes = data.len(), "stdin written");
        Ok(())
    }

    fn for_each<F>(&self, target: &Target, verb: &str, mut op: F) -> Response
    where
        F: FnMut(i64) -> Result<(), TaskdError>,
    {
        match target.resolve(&self.store().list()) {
            Ok(ids) => aggregate(verb, ids.into_iter().map(|id| (id, op(id))).collect()),
            Err(e) => Response::from(e),
        }
    }
}

/// Fold per-task outcomes into one envelope. The first failure decides the code.
fn aggregate(verb: &str, outcomes: Vec<(i64, Result<(), TaskdError>)>) -> Response {
    let outcomes = match <[_; 1]>::try_from(outcomes) {
        Ok([(id, Ok(()))]) => return Response::success(format!("Task [{id}] {verb}")),
        Ok([(_, Err(e))]) => return Response::from(e),
        Err(outcomes) => outcomes,
    };

    let mut succeeded = Vec::new();
    let mut failed: Vec<(i64, TaskdError)> = Vec::new();
    for (id, result) in outcomes {
        match result {
            Ok(()) => succeeded.push(id),
            Err(e) => failed.push((id, e)),
        }
    }

    let Some((_, first)) = failed.first() else {
        return Response::success(format!("Tasks {succeeded:?} {verb}"));
    };
    Response {
        code: first.code(),
        msg: first.to_string(),
        data: Some(Data::Error(ErrorDetail {
            kind: first.kind(),
            id: first.task_id(),
            succeeded,
            failed: failed
                .iter()
                .map(|(id, e)| FailedTask {
                    id: *id,
                    code: e.code(),
                    msg: e.to_string(),
                })
                .collect(),
        })),
    }
}

/// `~/` and `$HOME` in paths and arguments.
fn expand_paths(task: &mut Task) {
    for path in [&mut task.stdout, &mut task.stderr, &mut task.dir]
        .into_iter()
        .flatten()
    {
        *path = expand_home(path);
    }
    for arg in &mut task.args {
        *arg = expand_home(arg);
    }
    if let Some(Stdin::File(path)) = &mut task.stdin
        && let Some(text) = path.to_str()
    {
        *path = expand_home(text).into();
    }
}
