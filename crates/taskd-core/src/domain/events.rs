//! Events - ドメインイベント
//!
//! 子プロセスの終了は waiter タスクから一つの `ExitEvent` として送られ、
//! ReaperLoop が `TaskStore::update` 経由で反映する。

/// One reaped child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitEvent {
    pub task_id: i64,
    pub pid: u32,
    /// Exit code; `128 + signal` when the child died from a signal.
    pub code: Option<i32>,
}

impl ExitEvent {
    pub fn from_status(task_id: i64, pid: u32, status: std::process::ExitStatus) -> Self {
        Self {
            task_id,
            pid,
            code: exit_code(status),
        }
    }
}

#[cfg(unix)]
fn exit_code(status: std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.code().or_else(|| status.signal().map(|sig| 128 + sig))
}

#[cfg(not(unix))]
fn exit_code(status: std::process::ExitStatus) -> Option<i32> {
    status.code()
}
