//! Status - デーモン全体の集計

use serde::{Deserialize, Serialize};

use crate::domain::{Task, TaskStatus, TaskType};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub added: usize,
    pub running: usize,
    pub stopped: usize,
    pub exited: usize,
    pub error: usize,
    /// Periodic tasks currently paused.
    pub paused: usize,
    /// Child processes the supervisor still owns (including ones being stopped).
    pub children: usize,
}

impl StatusCounts {
    pub fn from_tasks(tasks: &[Task], children: usize) -> Self {
        let mut counts = StatusCounts {
            children,
            ..Default::default()
        };
        for task in tasks {
            match task.status {
                TaskStatus::Added => counts.added += 1,
                TaskStatus::Running => counts.running += 1,
                TaskStatus::Stopped => counts.stopped += 1,
                TaskStatus::Exited => counts.exited += 1,
                TaskStatus::Error => counts.error += 1,
            }
            if let TaskType::Periodic(p) = &task.task_type
                && p.paused
            {
                counts.paused += 1;
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.added + self.running + self.stopped + self.exited + self.error
    }
}
