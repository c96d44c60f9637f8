//! spindle-core
//!
//! Async job-orchestration engine: long-running infrastructure operations
//! run as tracked jobs with progress, per-job log capture, cancellation and
//! durable state.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, kind, job, outcome, errors, log）
//! - **ports**: 抽象化レイヤー（JobRepository, Transport, AppCatalog, providers, Clock）
//! - **impls**: ports の実装（FileJobRepository, LocalTransport, SshTransport, など）
//! - **store**: ジョブ集合の所有者（atomic persistence, 起動時 recovery）
//! - **capture**: ジョブごとのログ（ring buffer + artifact file）
//! - **resolver**: 依存関係の解決と cycle 検出
//! - **exec**: リモートコマンド実行（streaming, timeout, cancel, denylist）
//! - **typed**: 型付き Handler API（JobSpec, Handler, HandlerRegistry）
//! - **handlers**: 組み込み handler
//! - **app**: JobManager / JobContext / EngineBuilder
//! - **config** / **observability**: 設定読み込みとプロセスログ

pub mod app;
pub mod capture;
pub mod config;
pub mod domain;
pub mod exec;
pub mod handlers;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod resolver;
pub mod store;
pub mod typed;
