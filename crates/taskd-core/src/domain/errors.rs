//! Errors - エラー型と応答コードへの対応付け
//!
//! すべての失敗は Dispatcher で回収され、`{code, msg, data}` の envelope になる。
//! デーモンを止めるのは起動時の復元失敗だけ。

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Envelope code for a successful command.
pub const CODE_SUCCESS: u32 = 10000;

/// Domain error for every store, supervisor and dispatcher operation.
#[derive(Debug, Error)]
pub enum TaskdError {
    #[error("Task [{0}] already exists")]
    DuplicateId(i64),

    #[error("Task [{0}] not exists")]
    NotFound(String),

    #[error("Target [{target}] matches {count} tasks, use mat=true to act on all of them")]
    Ambiguous { target: String, count: usize },

    #[error("Task [{id}] {reason}")]
    InvalidState { id: i64, reason: String },

    #[error("Task [{0}] is running, please stop it first")]
    StillRunning(i64),

    #[error("Task [{id}] failed to spawn: {reason}")]
    SpawnFailure { id: i64, reason: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot error: {0}")]
    Persist(#[from] serde_json::Error),
}

impl TaskdError {
    pub fn not_found_id(id: i64) -> Self {
        Self::NotFound(id.to_string())
    }

    pub fn invalid_state(id: i64, reason: impl Into<String>) -> Self {
        Self::InvalidState {
            id,
            reason: reason.into(),
        }
    }

    /// Response code carried by the failure envelope.
    pub fn code(&self) -> u32 {
        match self {
            TaskdError::InvalidRequest(_) => 40000,
            TaskdError::DuplicateId(_) => 40001,
            TaskdError::Ambiguous { .. } => 40002,
            TaskdError::NotFound(_) => 40004,
            TaskdError::InvalidState { .. } => 40009,
            TaskdError::StillRunning(_) => 40010,
            TaskdError::SpawnFailure { .. } => 50001,
            TaskdError::Io(_) => 50002,
            TaskdError::Persist(_) => 50003,
        }
    }

    /// Machine-readable classification, independent of the message text.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TaskdError::DuplicateId(_) => ErrorKind::DuplicateId,
            TaskdError::NotFound(_) => ErrorKind::NotFound,
            TaskdError::Ambiguous { .. } => ErrorKind::Ambiguous,
            TaskdError::InvalidState { .. } => ErrorKind::InvalidState,
            TaskdError::StillRunning(_) => ErrorKind::StillRunning,
            TaskdError::SpawnFailure { .. } => ErrorKind::SpawnFailure,
            TaskdError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            TaskdError::Io(_) => ErrorKind::Io,
            TaskdError::Persist(_) => ErrorKind::Persist,
        }
    }

    /// Task id the error refers to, when there is exactly one.
    pub fn task_id(&self) -> Option<i64> {
        match self {
            TaskdError::DuplicateId(id)
            | TaskdError::StillRunning(id)
            | TaskdError::InvalidState { id, .. }
            | TaskdError::SpawnFailure { id, .. } => Some(*id),
            _ => None,
        }
    }
}

/// ErrorKind は応答 data に載せる分類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    DuplicateId,
    NotFound,
    Ambiguous,
    InvalidState,
    StillRunning,
    SpawnFailure,
    InvalidRequest,
    Io,
    Persist,
}
