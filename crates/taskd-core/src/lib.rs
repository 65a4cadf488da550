//! taskd-core
//!
//! Core building blocks for the taskd daemon.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（task, task_type, state, target, envelope, errors, events）
//! - **ports**: 抽象化レイヤー（TaskStore, SnapshotStore, Clock, IdGenerator）
//! - **impls**: 実装（MemoryTaskStore, JsonFileSnapshot）
//! - **app**: アプリケーションロジック（builder, dispatcher, supervisor, 各ループ）
//! - **config**: TOML 設定
//! - **observability**: tracing の初期化

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;
