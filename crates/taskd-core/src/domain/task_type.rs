//! TaskType - スケジューリング戦略（閉じた variant）
//!
//! - `Async`: コマンドでのみ起動
//! - `Scheduled`: カレンダー条件に一致したとき一度だけ起動
//! - `Periodic`: `interval` 秒ごとに繰り返し起動
//!
//! ワイヤ上は外部タグ形式（`{"Async": {...}}`）。`"Async"` のような裸の文字列も
//! 「全フィールド既定値」として受け付ける。

use serde::{Deserialize, Serialize};
use std::fmt;

use super::calendar::{CalendarFields, field_matches};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AsyncTask {
    pub started_at: u64,
    pub stopped_at: u64,
    /// Auto-restart budget after a failed run (`None` disables auto-restart).
    pub max_restart: Option<u64>,
    pub has_restart: u64,
}

impl AsyncTask {
    /// Whether a failed run should be relaunched by the scheduler.
    pub fn wants_restart(&self) -> bool {
        self.max_restart.is_some_and(|max| self.has_restart < max)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduledTask {
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub day: Option<u32>,
    pub hour: Option<u32>,
    pub minute: Option<u32>,
    pub second: Option<u32>,
    /// Epoch seconds of the calendar fire. Once set the task never fires again.
    pub fired_at: Option<u64>,
}

impl ScheduledTask {
    pub fn is_armed(&self) -> bool {
        self.fired_at.is_none()
    }

    /// All six fields must match at the same instant.
    pub fn matches(&self, now: &CalendarFields) -> bool {
        field_matches(self.year, now.year)
            && field_matches(self.month, now.month)
            && field_matches(self.day, now.day)
            && field_matches(self.hour, now.hour)
            && field_matches(self.minute, now.minute)
            && field_matches(self.second, now.second)
    }

    fn validate(&self) -> Result<(), String> {
        let ranges = [
            ("month", self.month, 1, 12),
            ("day", self.day, 1, 31),
            ("hour", self.hour, 0, 23),
            ("minute", self.minute, 0, 59),
            ("second", self.second, 0, 59),
        ];
        for (field, value, min, max) in ranges {
            if let Some(v) = value
                && !(min..=max).contains(&v)
            {
                return Err(format!("{field}={v} is out of range {min}..={max}"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeriodicTask {
    pub started_after: u64,
    pub interval: u64,
    pub last_run: u64,
    /// Suspended by Pause; the scheduler skips the task without touching `last_run`.
    pub paused: bool,
}

impl PeriodicTask {
    pub fn is_due(&self, now: u64) -> bool {
        !self.paused && now >= self.started_after && now.saturating_sub(self.last_run) >= self.interval
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "TaskTypeRepr")]
pub enum TaskType {
    Async(AsyncTask),
    Scheduled(ScheduledTask),
    Periodic(PeriodicTask),
}

impl TaskType {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskType::Async(_) => TaskKind::Async,
            TaskType::Scheduled(_) => TaskKind::Scheduled,
            TaskType::Periodic(_) => TaskKind::Periodic,
        }
    }

    /// Add-time validation.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            TaskType::Async(_) => Ok(()),
            TaskType::Scheduled(s) => s.validate(),
            TaskType::Periodic(p) if p.interval == 0 => {
                Err("periodic interval must be greater than 0".to_string())
            }
            TaskType::Periodic(_) => Ok(()),
        }
    }
}

impl Default for TaskType {
    fn default() -> Self {
        TaskType::Async(AsyncTask::default())
    }
}

/// Variant name without payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskKind {
    Async,
    Scheduled,
    Periodic,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TaskKind::Async => "Async",
            TaskKind::Scheduled => "Scheduled",
            TaskKind::Periodic => "Periodic",
        };
        f.write_str(label)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TaskTypeRepr {
    Bare(TaskKind),
    Tagged(TaggedTaskType),
}

#[derive(Deserialize)]
enum TaggedTaskType {
    Async(AsyncTask),
    Scheduled(ScheduledTask),
    Periodic(PeriodicTask),
}

impl From<TaskTypeRepr> for TaskType {
    fn from(repr: TaskTypeRepr) -> Self {
        match repr {
            TaskTypeRepr::Bare(TaskKind::Async) => TaskType::Async(AsyncTask::default()),
            TaskTypeRepr::Bare(TaskKind::Scheduled) => {
                TaskType::Scheduled(ScheduledTask::default())
            }
            TaskTypeRepr::Bare(TaskKind::Periodic) => TaskType::Periodic(PeriodicTask::default()),
            TaskTypeRepr::Tagged(TaggedTaskType::Async(t)) => TaskType::Async(t),
            TaskTypeRepr::Tagged(TaggedTaskType::Scheduled(t)) => TaskType::Scheduled(t),
            TaskTypeRepr::Tagged(TaggedTaskType::Periodic(t)) => TaskType::Periodic(t),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32, second: u32) -> CalendarFields {
        CalendarFields {
            year,
            month,
            day,
            hour,
            minute,
            second,
        }
    }

    #[test]
    fn bare_and_tagged_forms_are_accepted() {
        let bare: TaskType = serde_json::from_value(json!("Async")).unwrap();
        assert_eq!(bare, TaskType::Async(AsyncTask::default()));

        let tagged: TaskType =
            serde_json::from_value(json!({"Periodic": {"interval": 30}})).unwrap();
        assert_eq!(
            tagged,
            TaskType::Periodic(PeriodicTask {
                interval: 30,
                ..Default::default()
            })
        );

        let out = serde_json::to_value(&tagged).unwrap();
        assert_eq!(out["Periodic"]["interval"], 30);
        assert_eq!(out["Periodic"]["paused"], false);
    }

    #[rstest]
    #[case(ScheduledTask::default(), true)]
    #[case(ScheduledTask { second: Some(30), ..Default::default() }, true)]
    #[case(ScheduledTask { second: Some(31), ..Default::default() }, false)]
    #[case(ScheduledTask { hour: Some(0), ..Default::default() }, false)]
    #[case(
        ScheduledTask {
            year: Some(2024), month: Some(3), day: Some(5),
            hour: Some(6), minute: Some(7), second: Some(30),
            fired_at: None,
        },
        true
    )]
    #[case(ScheduledTask { year: Some(2025), ..Default::default() }, false)]
    fn scheduled_matching(#[case] trigger: ScheduledTask, #[case] expected: bool) {
        assert_eq!(trigger.matches(&at(2024, 3, 5, 6, 7, 30)), expected);
    }

    #[rstest]
    #[case(TaskType::Periodic(PeriodicTask::default()), false)]
    #[case(TaskType::Periodic(PeriodicTask { interval: 1, ..Default::default() }), true)]
    #[case(TaskType::Scheduled(ScheduledTask { month: Some(13), ..Default::default() }), false)]
    #[case(TaskType::Scheduled(ScheduledTask { minute: Some(59), ..Default::default() }), true)]
    #[case(TaskType::Async(AsyncTask::default()), true)]
    fn validation(#[case] task_type: TaskType, #[case] ok: bool) {
        assert_eq!(task_type.validate().is_ok(), ok);
    }

    #[test]
    fn periodic_due_respects_pause_and_start() {
        let mut p = PeriodicTask {
            started_after: 100,
            interval: 10,
            last_run: 95,
            paused: false,
        };
        assert!(!p.is_due(99));
        assert!(p.is_due(105));
        assert!(!p.is_due(104));
        p.paused = true;
        assert!(!p.is_due(200));
    }

    #[test]
    fn async_restart_budget() {
        let mut a = AsyncTask {
            max_restart: Some(2),
            ..Default::default()
        };
        assert!(a.wants_restart());
        a.has_restart = 2;
        assert!(!a.wants_restart());
        assert!(!AsyncTask::default().wants_restart());
    }
}
