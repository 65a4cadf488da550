//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **MemoryTaskStore**: プロセス内の正本ストア
//! - **JsonFileSnapshot**: タスク定義の JSON スナップショット

pub mod json_snapshot;
pub mod memory_store;

pub use self::json_snapshot::JsonFileSnapshot;
pub use self::memory_store::MemoryTaskStore;
