//! SchedulerLoop - 時刻を見て Scheduled / Periodic を起動する
//!
//! # フロー（1 tick）
//! 1. ストアの一覧を取る
//! 2. `plan` で起動すべき (id, 理由) を決める（純粋関数）
//! 3. 各起動を独立した tokio タスクとして Supervisor に渡す
//!
//! # 時刻の扱い
//! - Scheduled は前回 tick から今回までの全ての秒を照合する（遅れた tick でも取りこぼさない）。
//!   遡るのは最大 60 秒。
//! - Periodic は `now - last_run >= interval` のとき。停止中に溜まった分をまとめて実行はしない。
//! - Async は失敗終了かつ再起動枠が残っているときだけ再起動する。

use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::app::supervisor::{LaunchReason, Supervisor};
use crate::domain::{CalendarFields, CalendarZone, Task, TaskStatus, TaskType, TaskdError};
use crate::ports::{Clock, TaskStore};

/// How far back a late tick looks for matching calendar seconds.
pub const MAX_CATCH_UP_SECS: u64 = 60;

pub struct SchedulerLoop<S> {
    supervisor: Arc<Supervisor<S>>,
    zone: CalendarZone,
    period: Duration,
    last_tick: Mutex<Option<u64>>,
}

impl<S: TaskStore> SchedulerLoop<S> {
    pub fn new(supervisor: Arc<Supervisor<S>>, zone: CalendarZone, period: Duration) -> Self {
        Self {
            supervisor,
            zone,
            period,
            last_tick: Mutex::new(None),
        }
    }

    /// Evaluate once and start the due launches. The handles resolve when each launch
    /// attempt has been committed.
    pub fn tick(&self) -> Vec<JoinHandle<()>> {
        let now = self.supervisor.clock().epoch_secs();
        let seconds = {
            let mut last = self.last_tick.lock().unwrap_or_else(PoisonError::into_inner);
            let seconds = calendar_window(*last, now);
            *last = Some(last.map_or(now, |prev| prev.max(now)));
            seconds
        };

        let tasks = self.supervisor.store().list();
        let due = plan(&tasks, seconds, now, self.zone);
        debug!(now, tasks = tasks.len(), due = due.len(), "scheduler tick");

        due.into_iter()
            .map(|(id, reason)| {
                let supervisor = Arc::clone(&self.supervisor);
                tokio::spawn(async move {
                    match supervisor.launch(id, reason) {
                        Ok(_) => {}
                        // 計画後に Stop / Remove などで状態が変わった
                        Err(e @ (TaskdError::InvalidState { .. } | TaskdError::NotFound(_))) => {
                            debug!(task_id = id, %reason, error = %e, "launch skipped");
                        }
                        Err(e) => warn!(task_id = id, %reason, error = %e, "scheduled launch failed"),
                    }
                })
            })
            .collect()
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    // launches run detached; failures are logged per task
                    drop(self.tick());
                }
            }
        }
        debug!("scheduler loop stopped");
    }
}

/// Seconds a tick at `now` must check against calendar triggers.
fn calendar_window(last: Option<u64>, now: u64) -> RangeInclusive<u64> {
    let earliest = now.saturating_sub(MAX_CATCH_UP_SECS - 1);
    match last {
        None => now..=now,
        Some(last) => (last + 1).max(earliest)..=now,
    }
}

/// Decide which tasks are due. `seconds` are the calendar instants to match Scheduled
/// tasks against; `now` drives Periodic cadence.
pub fn plan(
    tasks: &[Task],
    seconds: RangeInclusive<u64>,
    now: u64,
    zone: CalendarZone,
) -> Vec<(i64, LaunchReason)> {
    let instants: Vec<CalendarFields> = seconds
        .filter_map(|sec| i64::try_from(sec).ok())
        .filter_map(|sec| zone.fields(sec))
        .collect();

    tasks
        .iter()
        .filter(|task| !task.is_running())
        .filter_map(|task| {
            let reason = match &task.task_type {
                TaskType::Scheduled(s) if s.is_armed() && instants.iter().any(|f| s.matches(f)) => {
                    LaunchReason::Calendar
                }
                TaskType::Periodic(p) if p.is_due(now) => LaunchReason::Interval,
                TaskType::Async(a) if task.status == TaskStatus::Error && a.wants_restart() => {
                    LaunchReason::Restart
                }
                _ => return None,
            };
            Some((task.id, reason))
        })
        .collect()
}
