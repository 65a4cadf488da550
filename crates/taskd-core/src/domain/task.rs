//! Task record and its state transitions.
//!
//! Design:
//! - Every status change goes through a method here, so `pid ⇔ running` and
//!   `code ⇒ exited|error` hold after each call.
//! - Callers reach these methods only through `TaskStore::update`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use super::errors::TaskdError;
use super::state::TaskStatus;
use super::task_type::{TaskKind, TaskType};

/// What the child receives on stdin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Stdin {
    /// `true` attaches a writable pipe, `false` attaches nothing.
    Pipe(bool),
    /// Read input from a file.
    File(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub group: Option<String>,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub dir: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub stdin: Option<Stdin>,
    #[serde(default)]
    pub stdout: Option<String>,
    #[serde(default)]
    pub stderr: Option<String>,
    #[serde(default)]
    pub created_at: u64,
    #[serde(default)]
    pub task_type: TaskType,
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub code: Option<i32>,
}

impl Task {
    pub fn new(id: i64, name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            group: None,
            command: command.into(),
            args: Vec::new(),
            dir: None,
            env: HashMap::new(),
            stdin: None,
            stdout: None,
            stderr: None,
            created_at: 0,
            task_type: TaskType::default(),
            pid: None,
            status: TaskStatus::Added,
            code: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_type(mut self, task_type: TaskType) -> Self {
        self.task_type = task_type;
        self
    }

    pub fn kind(&self) -> TaskKind {
        self.task_type.kind()
    }

    pub fn is_running(&self) -> bool {
        self.status.is_running()
    }

    pub fn validate(&self) -> Result<(), TaskdError> {
        if self.id <= 0 {
            return Err(TaskdError::InvalidRequest(format!(
                "task id must be a positive integer, got {}",
                self.id
            )));
        }
        if self.command.trim().is_empty() {
            return Err(TaskdError::InvalidRequest(format!(
                "Task [{}] command must not be empty",
                self.id
            )));
        }
        self.task_type
            .validate()
            .map_err(|reason| TaskdError::InvalidRequest(format!("Task [{}] {reason}", self.id)))
    }

    /// Normalise a record arriving with an Add command.
    pub fn prepare_for_add(&mut self, now: u64) {
        self.status = TaskStatus::Added;
        self.pid = None;
        self.code = None;
        if self.created_at == 0 {
            self.created_at = now;
        }
        if let TaskType::Periodic(p) = &mut self.task_type
            && p.last_run == 0
        {
            p.last_run = self.created_at;
        }
    }

    /// Successful spawn.
    pub fn mark_running(&mut self, pid: u32) {
        self.status = TaskStatus::Running;
        self.pid = Some(pid);
        self.code = None;
    }

    /// Spawn (or redirection) failed; no run happened.
    pub fn mark_spawn_failed(&mut self) {
        self.status = TaskStatus::Error;
        self.pid = None;
        self.code = None;
    }

    /// Stop requested. Returns the pid that must be signalled.
    pub fn mark_stopped(&mut self, now: u64) -> Result<u32, TaskdError> {
        let Some(pid) = self.pid.filter(|_| self.is_running()) else {
            return Err(TaskdError::invalid_state(self.id, "is not running"));
        };
        self.status = TaskStatus::Stopped;
        self.pid = None;
        self.code = None;
        if let TaskType::Async(a) = &mut self.task_type {
            a.stopped_at = now;
        }
        Ok(pid)
    }

    /// Apply a reaped exit. Events for a pid the record no longer holds are stale
    /// (the run was stopped or relaunched) and are ignored; returns whether it applied.
    pub fn record_exit(&mut self, pid: u32, code: Option<i32>, now: u64) -> bool {
        if !self.is_running() || self.pid != Some(pid) {
            return false;
        }
        self.status = TaskStatus::from_exit_code(code);
        self.pid = None;
        self.code = code;
        if let TaskType::Async(a) = &mut self.task_type {
            a.stopped_at = now;
        }
        true
    }

    /// Restored from a snapshot: the previous daemon's children are not ours.
    pub fn mark_orphaned(&mut self) -> bool {
        if !self.is_running() {
            return false;
        }
        self.status = TaskStatus::Stopped;
        self.pid = None;
        self.code = None;
        true
    }

    pub fn invariants_hold(&self) -> bool {
        let pid_ok = self.pid.is_some() == self.is_running();
        let code_ok = self.code.is_none() || self.status.allows_code();
        pid_ok && code_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::task_type::{AsyncTask, PeriodicTask};
    use serde_json::json;

    #[test]
    fn deserializes_dashboard_payload() {
        let task: Task = serde_json::from_value(json!({
            "id": 1,
            "name": "demo",
            "command": "run-script",
            "args": ["-u", "script.task"],
            "task_type": "Async",
            "stdin": true,
            "pid": null,
            "status": "added",
            "code": null
        }))
        .unwrap();
        assert_eq!(task.args, vec!["-u", "script.task"]);
        assert_eq!(task.stdin, Some(Stdin::Pipe(true)));
        assert_eq!(task.kind(), TaskKind::Async);
        assert!(task.env.is_empty());
    }

    #[test]
    fn stdin_accepts_a_path() {
        let task: Task = serde_json::from_value(json!({
            "id": 2, "name": "x", "command": "cat", "stdin": "/tmp/input.txt"
        }))
        .unwrap();
        assert_eq!(task.stdin, Some(Stdin::File(PathBuf::from("/tmp/input.txt"))));
    }

    #[test]
    fn prepare_for_add_resets_runtime_fields() {
        let mut task = Task::new(3, "p", "true").with_type(TaskType::Periodic(PeriodicTask {
            interval: 10,
            ..Default::default()
        }));
        task.status = TaskStatus::Running;
        task.pid = Some(99);
        task.code = Some(1);
        task.prepare_for_add(1_000);

        assert_eq!(task.status, TaskStatus::Added);
        assert_eq!(task.pid, None);
        assert_eq!(task.code, None);
        assert_eq!(task.created_at, 1_000);
        let TaskType::Periodic(p) = &task.task_type else {
            panic!("expected periodic");
        };
        assert_eq!(p.last_run, 1_000);
    }

    #[test]
    fn lifecycle_keeps_invariants() {
        let mut task = Task::new(1, "demo", "true");
        assert!(task.invariants_hold());

        task.mark_running(42);
        assert!(task.invariants_hold());

        assert!(!task.record_exit(41, Some(0), 10), "stale pid is ignored");
        assert!(task.record_exit(42, Some(0), 10));
        assert_eq!(task.status, TaskStatus::Exited);
        assert_eq!(task.code, Some(0));
        assert!(task.invariants_hold());

        task.mark_running(43);
        assert_eq!(task.mark_stopped(20).unwrap(), 43);
        assert_eq!(task.status, TaskStatus::Stopped);
        assert!(task.invariants_hold());
        assert_eq!(task.task_type, TaskType::Async(AsyncTask { stopped_at: 20, ..Default::default() }));

        let err = task.mark_stopped(21).unwrap_err();
        assert!(matches!(err, TaskdError::InvalidState { id: 1, .. }));
    }

    #[test]
    fn empty_command_and_bad_id_are_rejected() {
        let task = Task::new(1, "demo", "  ");
        assert!(matches!(task.validate(), Err(TaskdError::InvalidRequest(_))));
        let task = Task::new(0, "demo", "true");
        assert!(matches!(task.validate(), Err(TaskdError::InvalidRequest(_))));
        assert!(Task::new(1, "demo", "true").validate().is_ok());
    }
}
