//! JobRepository port - ジョブ集合の永続化
//!
//! JobStore（store モジュール）がメモリ上の正本を持ち、
//! JobRepository はその「全体」を durable に書き出す / 読み戻すだけの役割です。
//!
//! # 実装
//! - **FileJobRepository**: JSON ファイル（tmp に書いて rename、原子的置換）
//! - **InMemoryJobRepository**: テスト用

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::JobRecord;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("store task failed: {0}")]
    Task(String),
}

/// JobRepository は job 集合全体の durable 表現
///
/// # 設計原則
/// - `save_all` は完全な新しい表現を stage してから一度に置き換える
///   （読み手が途中状態を観測することはない）
/// - 呼び出し側（JobStore）がロックを保持した状態で呼ぶ
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn load_all(&self) -> Result<Vec<JobRecord>, StoreError>;

    async fn save_all(&self, jobs: &[JobRecord]) -> Result<(), StoreError>;
}
