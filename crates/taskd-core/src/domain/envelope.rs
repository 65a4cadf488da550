//! Envelope - コマンドプロトコル（リクエストと応答）
//!
//! リクエスト: `{"command": {"<Variant>": <payload>}}`、またはその配列（バッチ）。
//! 応答: `{"code", "msg", "data"}`。バッチには同じ順序の配列で応答する。

use serde::{Deserialize, Serialize};

use super::errors::{CODE_SUCCESS, ErrorKind, TaskdError};
use super::target::Target;
use super::task::Task;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    List(Option<Target>),
    Add(Task),
    Start(Target),
    Stop(Target),
    Resume(Target),
    Pause(Target),
    Remove(Target),
    Run(Task),
    Restart(Target),
    Reload(Task),
    Write(Target, String),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::List(_) => "List",
            Command::Add(_) => "Add",
            Command::Start(_) => "Start",
            Command::Stop(_) => "Stop",
            Command::Resume(_) => "Resume",
            Command::Pause(_) => "Pause",
            Command::Remove(_) => "Remove",
            Command::Run(_) => "Run",
            Command::Restart(_) => "Restart",
            Command::Reload(_) => "Reload",
            Command::Write(..) => "Write",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub command: Command,
}

impl From<Command> for Request {
    fn from(command: Command) -> Self {
        Self { command }
    }
}

/// A single request or an ordered batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Incoming {
    One(Request),
    Batch(Vec<Request>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Outgoing {
    One(Response),
    Batch(Vec<Response>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub code: u32,
    pub msg: String,
    pub data: Option<Data>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Data {
    Status(Vec<Task>),
    Error(ErrorDetail),
}

/// Structured failure detail carried in `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub kind: ErrorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Multi-target commands: tasks the command succeeded on.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub succeeded: Vec<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<FailedTask>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedTask {
    pub id: i64,
    pub code: u32,
    pub msg: String,
}

impl Response {
    pub fn success(msg: impl Into<String>) -> Self {
        Self {
            code: CODE_SUCCESS,
            msg: msg.into(),
            data: None,
        }
    }

    pub fn status(tasks: Vec<Task>) -> Self {
        Self {
            code: CODE_SUCCESS,
            msg: "success".to_string(),
            data: Some(Data::Status(tasks)),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == CODE_SUCCESS
    }

    /// Tasks carried by a List response.
    pub fn tasks(&self) -> Option<&[Task]> {
        match &self.data {
            Some(Data::Status(tasks)) => Some(tasks),
            _ => None,
        }
    }

    pub fn error_detail(&self) -> Option<&ErrorDetail> {
        match &self.data {
            Some(Data::Error(detail)) => Some(detail),
            _ => None,
        }
    }
}

impl From<&TaskdError> for Response {
    fn from(err: &TaskdError) -> Self {
        Self {
            code: err.code(),
            msg: err.to_string(),
            data: Some(Data::Error(ErrorDetail {
                kind: err.kind(),
                id: err.task_id(),
                succeeded: Vec::new(),
                failed: Vec::new(),
            })),
        }
    }
}

impl From<TaskdError> for Response {
    fn from(err: TaskdError) -> Self {
        Response::from(&err)
    }
}
