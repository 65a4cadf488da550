//! State - タスクの状態
//!
//! # 状態遷移
//! - added: 登録直後（まだ一度も起動していない）
//! - running: 子プロセスが生きている（pid あり）
//! - stopped: Stop 要求で止めた / 再起動時に pid を失った
//! - exited: 終了コード 0 で終了
//! - error: 非 0 終了、シグナル死、または spawn 失敗

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Added,
    Running,
    Stopped,
    Exited,
    Error,
}

impl TaskStatus {
    pub fn is_running(self) -> bool {
        matches!(self, TaskStatus::Running)
    }

    /// Statuses that may carry an exit code.
    pub fn allows_code(self) -> bool {
        matches!(self, TaskStatus::Exited | TaskStatus::Error)
    }

    /// Status recorded for a finished run.
    pub fn from_exit_code(code: Option<i32>) -> Self {
        match code {
            Some(0) => TaskStatus::Exited,
            _ => TaskStatus::Error,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Added => "added",
            TaskStatus::Running => "running",
            TaskStatus::Stopped => "stopped",
            TaskStatus::Exited => "exited",
            TaskStatus::Error => "error",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
