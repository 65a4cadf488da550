//! Domain model (tasks, strategies, targets, protocol envelope, errors).

pub mod calendar;
pub mod envelope;
pub mod errors;
pub mod events;
pub mod ids;
pub mod state;
pub mod target;
pub mod task;
pub mod task_type;

pub use self::calendar::{CalendarFields, CalendarZone};
pub use self::envelope::{Command, Data, ErrorDetail, FailedTask, Incoming, Outgoing, Request, Response};
pub use self::errors::{CODE_SUCCESS, ErrorKind, TaskdError};
pub use self::events::ExitEvent;
pub use self::ids::RequestId;
pub use self::state::TaskStatus;
pub use self::target::Target;
pub use self::task::{Stdin, Task};
pub use self::task_type::{AsyncTask, PeriodicTask, ScheduledTask, TaskKind, TaskType};
