//! MemoryTaskStore - プロセス内の正本ストア
//!
//! # 実装詳細
//! - `RwLock<BTreeMap<id, Arc<Mutex<Option<Task>>>>>`: map のロックは短く、
//!   レコードごとの Mutex で同じ id への変更を直列化する
//! - 削除されたレコードは `None` にしてから map から外す。
//!   削除と競合した `update` は `None` を見て NotFound を返す
//! - BTreeMap なので `list` は常に id 昇順
//!
//! ロック順序は map → レコード。レコードのロック中に map のロックは取らない。

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::sync::watch;

use crate::domain::{Task, TaskdError};
use crate::ports::TaskStore;

type Slot = Arc<Mutex<Option<Task>>>;

pub struct MemoryTaskStore {
    records: RwLock<BTreeMap<i64, Slot>>,
    revision: watch::Sender<u64>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            records: RwLock::new(BTreeMap::new()),
            revision,
        }
    }

    fn slot(&self, id: i64) -> Result<Slot, TaskdError> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        records
            .get(&id)
            .cloned()
            .ok_or_else(|| TaskdError::not_found_id(id))
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }
}

impl Default for MemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskStore for MemoryTaskStore {
    fn insert(&self, task: Task) -> Result<(), TaskdError> {
        {
            let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
            if records.contains_key(&task.id) {
                return Err(TaskdError::DuplicateId(task.id));
            }
            records.insert(task.id, Arc::new(Mutex::new(Some(task))));
        }
        self.bump();
        Ok(())
    }

    fn get(&self, id: i64) -> Result<Task, TaskdError> {
        let slot = self.slot(id)?;
        let guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
        guard.clone().ok_or_else(|| TaskdError::not_found_id(id))
    }

    fn update<R, F>(&self, id: i64, mutator: F) -> Result<R, TaskdError>
    where
        F: FnOnce(&mut Task) -> Result<R, TaskdError>,
    {
        let slot = self.slot(id)?;
        let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(current) = guard.as_ref() else {
            return Err(TaskdError::not_found_id(id));
        };

        let mut draft = current.clone();
        let result = mutator(&mut draft)?;
        // id is immutable once assigned
        draft.id = id;

        let changed = draft != *current;
        if changed {
            *guard = Some(draft);
        }
        drop(guard);

        if changed {
            self.bump();
        }
        Ok(result)
    }

    fn remove(&self, id: i64, force: bool) -> Result<Task, TaskdError> {
        let removed = {
            let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
            let slot = records
                .get(&id)
                .cloned()
                .ok_or_else(|| TaskdError::not_found_id(id))?;
            let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
            match guard.as_ref() {
                None => return Err(TaskdError::not_found_id(id)),
                Some(task) if task.is_running() && !force => {
                    return Err(TaskdError::StillRunning(id));
                }
                Some(_) => {}
            }
            let task = guard.take();
            drop(guard);
            records.remove(&id);
            task
        };
        self.bump();
        removed.ok_or_else(|| TaskdError::not_found_id(id))
    }

    fn list(&self) -> Vec<Task> {
        let slots: Vec<Slot> = {
            let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
            records.values().cloned().collect()
        };
        slots
            .iter()
            .filter_map(|slot| slot.lock().unwrap_or_else(PoisonError::into_inner).clone())
            .collect()
    }

    fn replace_all(&self, tasks: Vec<Task>) {
        {
            let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
            records.clear();
            for task in tasks {
                records.insert(task.id, Arc::new(Mutex::new(Some(task))));
            }
        }
        self.bump();
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskStatus;

    fn store_with(ids: &[i64]) -> MemoryTaskStore {
        let store = MemoryTaskStore::new();
        for id in ids {
            store.insert(Task::new(*id, format!("t{id}"), "true")).unwrap();
        }
        store
    }

    #[test]
    fn duplicate_insert_keeps_existing_record() {
        let store = store_with(&[1]);
        let mut other = Task::new(1, "other", "false");
        other.group = Some("g".into());

        let err = store.insert(other).unwrap_err();
        assert!(matches!(err, TaskdError::DuplicateId(1)));
        let kept = store.get(1).unwrap();
        assert_eq!(kept.name, "t1");
        assert_eq!(kept.command, "true");
    }

    #[test]
    fn list_is_ascending_and_stable() {
        let store = store_with(&[5, 1, 3]);
        let ids: Vec<i64> = store.list().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![1, 3, 5]);
        assert_eq!(store.list(), store.list());
    }

    #[test]
    fn failed_mutator_leaves_record_untouched() {
        let store = store_with(&[1]);
        let before = store.get(1).unwrap();

        let result: Result<(), _> = store.update(1, |task| {
            task.mark_running(10);
            task.name = "half-written".into();
            Err(TaskdError::invalid_state(1, "refused"))
        });

        assert!(result.is_err());
        assert_eq!(store.get(1).unwrap(), before);
    }

    #[test]
    fn update_cannot_change_the_id() {
        let store = store_with(&[1]);
        store.update(1, |task| {
            task.id = 99;
            Ok(())
        })
        .unwrap();
        assert!(store.get(1).is_ok());
        assert!(matches!(store.get(99), Err(TaskdError::NotFound(_))));
    }

    #[test]
    fn remove_refuses_running_task_without_force() {
        let store = store_with(&[1]);
        store.update(1, |task| {
            task.mark_running(77);
            Ok(())
        })
        .unwrap();

        assert!(matches!(store.remove(1, false), Err(TaskdError::StillRunning(1))));
        assert_eq!(store.get(1).unwrap().status, TaskStatus::Running);

        let removed = store.remove(1, true).unwrap();
        assert_eq!(removed.pid, Some(77));
        assert!(store.list().is_empty());
        assert!(matches!(store.remove(1, true), Err(TaskdError::NotFound(_))));
    }

    #[test]
    fn update_on_removed_record_is_not_found() {
        let store = store_with(&[1]);
        store.remove(1, false).unwrap();
        let result = store.update(1, |_| Ok(()));
        assert!(matches!(result, Err(TaskdError::NotFound(_))));
    }

    #[test]
    fn concurrent_updates_on_one_id_are_serialized() {
        let store = Arc::new(store_with(&[1]));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        store
                            .update(1, |task| {
                                task.args.push("x".into());
                                Ok(())
                            })
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.get(1).unwrap().args.len(), 800);
    }

    #[test]
    fn revision_moves_only_on_commit() {
        let store = store_with(&[1]);
        let rx = store.subscribe();
        let start = *rx.borrow();

        store.update(1, |_| Ok(())).unwrap();
        assert_eq!(*rx.borrow(), start, "no-op update does not bump");

        store.update(1, |task| {
            task.name = "renamed".into();
            Ok(())
        })
        .unwrap();
        assert_eq!(*rx.borrow(), start + 1);
    }
}
