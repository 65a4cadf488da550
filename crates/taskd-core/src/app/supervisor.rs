//! Supervisor - 子プロセスの起動・停止・stdin 書き込み・回収
//!
//! # フロー
//! 1. `launch`: `TaskStore::update` の中で起動条件を再検証 → 記帳 → spawn → running
//! 2. 子プロセスごとに waiter タスクを一つ起動し、終了を待つ
//! 3. 終了したら process table から外し、`ExitEvent` を ReaperLoop に送る
//!
//! # 停止
//! シグナルを送るのは子プロセスの handle を持つ waiter だけ。
//! 回収前なので pid が別プロセスに再利用されていることはない。
//!
//! ロック順序はレコード → process table。table を握ったままレコードは取らない。

use std::collections::HashMap;
use std::fmt;
use std::fs::OpenOptions;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::domain::{ExitEvent, Stdin, Task, TaskStatus, TaskType, TaskdError};
use crate::ports::{Clock, SharedClock, TaskStore};

/// Why a launch was requested. Each reason has its own eligibility rule and bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchReason {
    /// Start / Run / Restart command.
    Manual,
    /// Scheduled calendar match.
    Calendar,
    /// Periodic interval elapsed.
    Interval,
    /// Async auto-restart after a failed run.
    Restart,
}

impl LaunchReason {
    /// Re-check eligibility against the current record and record the trigger.
    fn prepare(self, task: &mut Task, now: u64) -> Result<(), TaskdError> {
        let id = task.id;
        if task.is_running() {
            return Err(TaskdError::invalid_state(id, "is already running"));
        }
        let failed = task.status == TaskStatus::Error;

        match (self, &mut task.task_type) {
            (LaunchReason::Manual, TaskType::Async(a)) => {
                a.started_at = now;
                a.has_restart = 0;
            }
            (LaunchReason::Manual, TaskType::Scheduled(_)) => {}
            (LaunchReason::Manual, TaskType::Periodic(p)) => {
                p.last_run = p.last_run.max(now);
            }
            (LaunchReason::Calendar, TaskType::Scheduled(s)) if s.is_armed() => {
                s.fired_at = Some(now);
            }
            (LaunchReason::Interval, TaskType::Periodic(p)) if p.is_due(now) => {
                p.last_run = now;
            }
            (LaunchReason::Restart, TaskType::Async(a)) if failed && a.wants_restart() => {
                a.started_at = now;
                a.has_restart += 1;
            }
            (reason, _) => {
                return Err(TaskdError::invalid_state(
                    id,
                    format!("is not eligible for a {reason} launch"),
                ));
            }
        }
        Ok(())
    }
}

impl fmt::Display for LaunchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LaunchReason::Manual => "manual",
            LaunchReason::Calendar => "calendar",
            LaunchReason::Interval => "interval",
            LaunchReason::Restart => "restart",
        };
        f.write_str(label)
    }
}

/// Handles the daemon keeps for one live child.
struct ChildControl {
    task_id: i64,
    stop: Option<oneshot::Sender<()>>,
    stdin: Option<Arc<tokio::sync::Mutex<ChildStdin>>>,
}

type ProcessTable = Arc<Mutex<HashMap<u32, ChildControl>>>;

struct Spawned {
    child: Child,
    pid: u32,
    stdin: Option<ChildStdin>,
}

pub struct Supervisor<S> {
    store: Arc<S>,
    clock: SharedClock,
    children: ProcessTable,
    exits: mpsc::UnboundedSender<ExitEvent>,
    stop_grace: Duration,
}

impl<S: TaskStore> Supervisor<S> {
    pub fn new(
        store: Arc<S>,
        clock: SharedClock,
        exits: mpsc::UnboundedSender<ExitEvent>,
        stop_grace: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            children: Arc::new(Mutex::new(HashMap::new())),
            exits,
            stop_grace,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Spawn the task's process. Returns the new pid.
    ///
    /// A spawn failure is committed as `status = error` before `SpawnFailure` is returned.
    pub fn launch(&self, id: i64, reason: LaunchReason) -> Result<u32, TaskdError> {
        let now = self.clock.epoch_secs();
        let spawned = self.store.update(id, |task| {
            reason.prepare(task, now)?;
            match spawn_child(task) {
                Ok(spawned) => {
                    task.mark_running(spawned.pid);
                    let (stop_tx, stop_rx) = oneshot::channel();
                    let control = ChildControl {
                        task_id: id,
                        stop: Some(stop_tx),
                        stdin: spawned
                            .stdin
                            .map(|stdin| Arc::new(tokio::sync::Mutex::new(stdin))),
                    };
                    self.table().insert(spawned.pid, control);
                    Ok(Ok((spawned.child, spawned.pid, stop_rx)))
                }
                Err(reason) => {
                    task.mark_spawn_failed();
                    Ok(Err(reason))
                }
            }
        })?;

        match spawned {
            Ok((child, pid, stop_rx)) => {
                info!(task_id = id, pid, %reason, "task launched");
                tokio::spawn(watch_child(
                    child,
                    id,
                    pid,
                    stop_rx,
                    self.stop_grace,
                    Arc::clone(&self.children),
                    self.exits.clone(),
                ));
                Ok(pid)
            }
            Err(reason_text) => {
                warn!(task_id = id, %reason, error = %reason_text, "task failed to spawn");
                Err(TaskdError::SpawnFailure {
                    id,
                    reason: reason_text,
                })
            }
        }
    }

    /// Ask the waiter owning `pid` to terminate it (SIGTERM, SIGKILL after the grace period).
    ///
    /// Returns `false` when the pid is no longer supervised (it already exited).
    pub fn signal_stop(&self, pid: u32) -> bool {
        let mut children = self.table();
        let Some(control) = children.get_mut(&pid) else {
            return false;
        };
        if let Some(stop) = control.stop.take() {
            let _ = stop.send(());
            debug!(task_id = control.task_id, pid, "stop requested");
        }
        true
    }

    /// Write to the piped stdin of a running task.
    pub async fn write_stdin(&self, id: i64, pid: u32, data: &[u8]) -> Result<(), TaskdError> {
        let stdin = {
            let children = self.table();
            let control = children
                .get(&pid)
                .filter(|c| c.task_id == id)
                .ok_or_else(|| TaskdError::invalid_state(id, "is not running"))?;
            control
                .stdin
                .clone()
                .ok_or_else(|| TaskdError::invalid_state(id, "has no piped stdin"))?
        };
        let mut stdin = stdin.lock().await;
        stdin.write_all(data).await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Number of children still being waited on.
    pub fn live_children(&self) -> usize {
        self.table().len()
    }

    /// Terminate every supervised child and wait (bounded) until they are reaped.
    pub async fn stop_all(&self) {
        let pids: Vec<u32> = self.table().keys().copied().collect();
        if pids.is_empty() {
            return;
        }
        info!(count = pids.len(), "stopping supervised children");
        for pid in pids {
            self.signal_stop(pid);
        }

        let deadline = tokio::time::Instant::now() + self.stop_grace + Duration::from_secs(1);
        while self.live_children() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    fn table(&self) -> std::sync::MutexGuard<'_, HashMap<u32, ChildControl>> {
        self.children.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn spawn_child(task: &Task) -> Result<Spawned, String> {
    let mut cmd = Command::new(&task.command);
    cmd.args(&task.args)
        .envs(&task.env)
        .stdin(stdin_for(task.stdin.as_ref())?)
        .stdout(append_to(task.stdout.as_deref())?)
        .stderr(append_to(task.stderr.as_deref())?);
    if let Some(dir) = task.dir.as_deref().filter(|d| !d.is_empty()) {
        cmd.current_dir(dir);
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| format!("{}: {e}", task.command))?;
    let Some(pid) = child.id() else {
        return Err("child exited before its pid was read".to_string());
    };
    let stdin = child.stdin.take();
    Ok(Spawned { child, pid, stdin })
}

fn stdin_for(stdin: Option<&Stdin>) -> Result<Stdio, String> {
    match stdin {
        Some(Stdin::Pipe(true)) => Ok(Stdio::piped()),
        Some(Stdin::File(path)) => std::fs::File::open(path)
            .map(Stdio::from)
            .map_err(|e| format!("open stdin {}: {e}", path.display())),
        Some(Stdin::Pipe(false)) | None => Ok(Stdio::null()),
    }
}

/// Append-mode redirection, creating parent directories. No path discards the stream.
fn append_to(path: Option<&str>) -> Result<Stdio, String> {
    let Some(path) = path.filter(|p| !p.is_empty()) else {
        return Ok(Stdio::null());
    };
    let path = Path::new(path);
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("create {}: {e}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map(Stdio::from)
        .map_err(|e| format!("open {}: {e}", path.display()))
}

/// Waiter: owns the child handle until it is reaped.
async fn watch_child(
    mut child: Child,
    task_id: i64,
    pid: u32,
    mut stop_rx: oneshot::Receiver<()>,
    grace: Duration,
    children: ProcessTable,
    exits: mpsc::UnboundedSender<ExitEvent>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        Ok(()) = &mut stop_rx => terminate(&mut child, pid, grace).await,
    };

    children
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&pid);

    let event = match status {
        Ok(status) => ExitEvent::from_status(task_id, pid, status),
        Err(e) => {
            warn!(task_id, pid, error = %e, "failed to wait for child");
            ExitEvent {
                task_id,
                pid,
                code: None,
            }
        }
    };
    debug!(task_id, pid, code = ?event.code, "child exited");
    // reaper が止まった後（シャットダウン中）の送信失敗は無視する
    let _ = exits.send(event);
}

async fn terminate(child: &mut Child, pid: u32, grace: Duration) -> std::io::Result<ExitStatus> {
    if send_sigterm(pid) {
        if let Ok(status) = tokio::time::timeout(grace, child.wait()).await {
            return status;
        }
        warn!(pid, grace_ms = grace.as_millis() as u64, "child ignored SIGTERM, killing");
    }
    child.start_kill()?;
    child.wait().await
}

#[cfg(unix)]
fn send_sigterm(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: the child has not been reaped yet, so `pid` still names it.
    unsafe { libc::kill(pid, libc::SIGTERM) == 0 }
}

#[cfg(not(unix))]
fn send_sigterm(_pid: u32) -> bool {
    false
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::domain::{AsyncTask, PeriodicTask, ScheduledTask};
    use crate::impls::MemoryTaskStore;
    use crate::ports::FixedClock;
    use chrono::{TimeZone, Utc};

    struct Harness {
        supervisor: Supervisor<MemoryTaskStore>,
        exits: mpsc::UnboundedReceiver<ExitEvent>,
    }

    fn harness(grace: Duration) -> Harness {
        let store = Arc::new(MemoryTaskStore::new());
        let clock: SharedClock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let (tx, rx) = mpsc::unbounded_channel();
        Harness {
            supervisor: Supervisor::new(store, clock, tx, grace),
            exits: rx,
        }
    }

    fn sh(id: i64, script: &str) -> Task {
        Task::new(id, format!("sh-{id}"), "/bin/sh").with_args(["-c", script])
    }

    async fn next_exit(rx: &mut mpsc::UnboundedReceiver<ExitEvent>) -> ExitEvent {
        tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("exit event in time")
            .expect("channel open")
    }

    #[tokio::test]
    async fn launch_marks_running_and_reports_exit() {
        let mut h = harness(Duration::from_secs(1));
        h.supervisor.store().insert(sh(1, "exit 3")).unwrap();

        let pid = h.supervisor.launch(1, LaunchReason::Manual).unwrap();
        let task = h.supervisor.store().get(1).unwrap();
        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.pid, Some(pid));
        assert!(task.invariants_hold());

        let event = next_exit(&mut h.exits).await;
        assert_eq!(event, ExitEvent { task_id: 1, pid, code: Some(3) });
        assert_eq!(h.supervisor.live_children(), 0);
    }

    #[tokio::test]
    async fn spawn_failure_is_committed_as_error() {
        let h = harness(Duration::from_secs(1));
        h.supervisor
            .store()
            .insert(Task::new(1, "missing", "/nonexistent/taskd-test-binary"))
            .unwrap();

        let err = h.supervisor.launch(1, LaunchReason::Manual).unwrap_err();
        assert!(matches!(err, TaskdError::SpawnFailure { id: 1, .. }));

        let task = h.supervisor.store().get(1).unwrap();
        assert_eq!(task.status, TaskStatus::Error);
        assert_eq!(task.pid, None);
        assert_eq!(task.code, None);
    }

    #[tokio::test]
    async fn second_launch_while_running_is_rejected() {
        let h = harness(Duration::from_millis(200));
        h.supervisor.store().insert(sh(1, "sleep 30")).unwrap();

        let pid = h.supervisor.launch(1, LaunchReason::Manual).unwrap();
        let err = h.supervisor.launch(1, LaunchReason::Manual).unwrap_err();
        assert!(matches!(err, TaskdError::InvalidState { id: 1, .. }));

        assert!(h.supervisor.signal_stop(pid));
    }

    #[tokio::test]
    async fn stop_sends_sigterm() {
        let mut h = harness(Duration::from_secs(5));
        h.supervisor.store().insert(sh(1, "exec sleep 30")).unwrap();
        let pid = h.supervisor.launch(1, LaunchReason::Manual).unwrap();

        assert!(h.supervisor.signal_stop(pid));
        let event = next_exit(&mut h.exits).await;
        assert_eq!(event.code, Some(128 + libc::SIGTERM));
        assert!(!h.supervisor.signal_stop(pid), "reaped pid is no longer supervised");
    }

    #[tokio::test]
    async fn stop_escalates_to_sigkill_after_grace() {
        let mut h = harness(Duration::from_millis(200));
        h.supervisor
            .store()
            .insert(sh(1, "trap '' TERM; while true; do sleep 0.1; done"))
            .unwrap();
        let pid = h.supervisor.launch(1, LaunchReason::Manual).unwrap();
        // give the shell time to install its trap
        tokio::time::sleep(Duration::from_millis(200)).await;

        h.supervisor.signal_stop(pid);
        let event = next_exit(&mut h.exits).await;
        assert_eq!(event.code, Some(128 + libc::SIGKILL));
    }

    #[tokio::test]
    async fn stdout_is_appended_and_parent_dirs_created() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("logs/nested/out.log");
        let mut h = harness(Duration::from_secs(1));

        let mut task = sh(1, "echo hi");
        task.stdout = Some(out.to_string_lossy().into_owned());
        h.supervisor.store().insert(task).unwrap();

        for _ in 0..2 {
            h.supervisor.launch(1, LaunchReason::Manual).unwrap();
            let event = next_exit(&mut h.exits).await;
            h.supervisor
                .store()
                .update(1, |t| Ok(t.record_exit(event.pid, event.code, 0)))
                .unwrap();
        }
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "hi\nhi\n");
    }

    #[tokio::test]
    async fn piped_stdin_receives_writes() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("echo.txt");
        let mut h = harness(Duration::from_secs(1));

        let mut task = sh(1, "read line; echo \"got $line\"");
        task.stdin = Some(Stdin::Pipe(true));
        task.stdout = Some(out.to_string_lossy().into_owned());
        h.supervisor.store().insert(task).unwrap();

        let pid = h.supervisor.launch(1, LaunchReason::Manual).unwrap();
        h.supervisor.write_stdin(1, pid, b"hello\n").await.unwrap();
        next_exit(&mut h.exits).await;

        assert_eq!(std::fs::read_to_string(&out).unwrap(), "got hello\n");
    }

    #[tokio::test]
    async fn write_without_pipe_is_invalid_state() {
        let h = harness(Duration::from_millis(200));
        h.supervisor.store().insert(sh(1, "sleep 30")).unwrap();
        let pid = h.supervisor.launch(1, LaunchReason::Manual).unwrap();

        let err = h.supervisor.write_stdin(1, pid, b"x").await.unwrap_err();
        assert!(matches!(err, TaskdError::InvalidState { id: 1, .. }));
        h.supervisor.stop_all().await;
        assert_eq!(h.supervisor.live_children(), 0);
    }

    #[test]
    fn reasons_enforce_their_own_eligibility() {
        let mut async_task = Task::new(1, "a", "true");
        assert!(LaunchReason::Calendar.prepare(&mut async_task, 10).is_err());
        assert!(LaunchReason::Interval.prepare(&mut async_task, 10).is_err());
        // no restart budget
        async_task.status = TaskStatus::Error;
        assert!(LaunchReason::Restart.prepare(&mut async_task, 10).is_err());

        async_task.task_type = TaskType::Async(AsyncTask {
            max_restart: Some(1),
            ..Default::default()
        });
        LaunchReason::Restart.prepare(&mut async_task, 10).unwrap();
        let TaskType::Async(a) = &async_task.task_type else { unreachable!() };
        assert_eq!((a.started_at, a.has_restart), (10, 1));

        let mut scheduled = Task::new(2, "s", "true").with_type(TaskType::Scheduled(ScheduledTask::default()));
        LaunchReason::Calendar.prepare(&mut scheduled, 20).unwrap();
        assert!(LaunchReason::Calendar.prepare(&mut scheduled, 21).is_err(), "fires at most once");

        let mut periodic = Task::new(3, "p", "true").with_type(TaskType::Periodic(PeriodicTask {
            interval: 10,
            last_run: 100,
            ..Default::default()
        }));
        assert!(LaunchReason::Interval.prepare(&mut periodic, 105).is_err());
        LaunchReason::Interval.prepare(&mut periodic, 110).unwrap();
        LaunchReason::Manual.prepare(&mut periodic, 50).unwrap();
        let TaskType::Periodic(p) = &periodic.task_type else { unreachable!() };
        assert_eq!(p.last_run, 110, "last_run never moves backwards");
    }
}
