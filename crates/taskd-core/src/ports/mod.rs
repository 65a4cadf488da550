//! Ports - 抽象化レイヤー
//!
//! 各 trait は外部（時刻、永続化、ID 生成）や正本ストアへのインターフェースを提供し、
//! 実装の詳細を隠蔽します。実装は `impls` に置く。

pub mod clock;
pub mod id_generator;
pub mod snapshot;
pub mod task_store;

pub use self::clock::{Clock, FixedClock, SharedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::snapshot::{NoSnapshot, SnapshotStore};
pub use self::task_store::TaskStore;
