//! App - アプリケーション層
//!
//! ports を組み合わせてデーモンの振る舞いを実装します。
//!
//! # 主要コンポーネント
//! - **DaemonBuilder**: 起動時の復元とワイヤリング
//! - **Dispatcher**: コマンドの検証・実行・envelope 化
//! - **Supervisor**: 子プロセスの spawn / 停止 / stdin
//! - **ReaperLoop**: 子プロセスの終了を記録に反映
//! - **SchedulerLoop**: Scheduled / Periodic / 自動再起動の起動判定
//! - **PersistLoop**: 変更をスナップショットへ保存

pub mod builder;
pub mod dispatcher;
pub mod persist_loop;
pub mod reaper_loop;
pub mod scheduler_loop;
pub mod status;
pub mod supervisor;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, Daemon, DaemonBuilder};
pub use self::dispatcher::Dispatcher;
pub use self::persist_loop::PersistLoop;
pub use self::reaper_loop::ReaperLoop;
pub use self::scheduler_loop::SchedulerLoop;
pub use self::status::StatusCounts;
pub use self::supervisor::{LaunchReason, Supervisor};
