//! JsonFileSnapshot - タスク定義を JSON ファイルに保存する
//!
//! 書き込みは temp ファイル → fsync → rename で行い、途中でクラッシュしても
//! 既存のスナップショットを壊さない。

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use crate::domain::{Task, TaskdError};
use crate::ports::SnapshotStore;

#[derive(Debug, Clone)]
pub struct JsonFileSnapshot {
    path: PathBuf,
}

impl JsonFileSnapshot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        self.path.with_extension("json.tmp")
    }
}

#[async_trait]
impl SnapshotStore for JsonFileSnapshot {
    async fn load(&self) -> Result<Option<Vec<Task>>, TaskdError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        // 空ファイルは「まだ何も保存していない」扱い
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        let tasks: Vec<Task> = serde_json::from_slice(&bytes)?;
        Ok(Some(tasks))
    }

    async fn save(&self, tasks: &[Task]) -> Result<(), TaskdError> {
        let body = serde_json::to_vec_pretty(tasks)?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp_path = self.tmp_path();
        let mut file = tokio::fs::File::create(&tmp_path).await?;
        file.write_all(&body).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{PeriodicTask, TaskType};

    #[tokio::test]
    async fn missing_file_means_no_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = JsonFileSnapshot::new(dir.path().join("tasks.json"));
        assert!(snapshot.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_creates_parent_dirs_and_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = JsonFileSnapshot::new(dir.path().join("nested/state/tasks.json"));
        let tasks = vec![
            Task::new(1, "a", "true"),
            Task::new(2, "b", "sleep")
                .with_args(["5"])
                .with_type(TaskType::Periodic(PeriodicTask {
                    interval: 60,
                    paused: true,
                    ..Default::default()
                })),
        ];

        snapshot.save(&tasks).await.unwrap();
        assert!(snapshot.path().is_file());
        assert!(!snapshot.tmp_path().exists());

        let loaded = snapshot.load().await.unwrap().unwrap();
        assert_eq!(loaded, tasks);
    }

    #[tokio::test]
    async fn corrupt_file_is_a_persist_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let err = JsonFileSnapshot::new(&path).load().await.unwrap_err();
        assert!(matches!(err, TaskdError::Persist(_)));
    }
}
