//! Observability - プロセスログの初期化とジョブ集計
//!
//! ジョブごとのログは capture モジュールが扱い、ここではプロセス全体の
//! `tracing` 出力と `counts()` の集計型だけを定義します。

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use crate::domain::{JobRecord, JobStatus};

/// Jobs per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl JobCounts {
    pub fn tally<'a>(jobs: impl IntoIterator<Item = &'a JobRecord>) -> Self {
        let mut counts = Self::default();
        for job in jobs {
            match job.status {
                JobStatus::Pending => counts.pending += 1,
                JobStatus::Running => counts.running += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
                JobStatus::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.pending + self.running + self.completed + self.failed + self.cancelled
    }

    pub fn active(&self) -> usize {
        self.pending + self.running
    }
}

/// Install the process-wide subscriber (`RUST_LOG`, default `info`).
///
/// Calling it again is a no-op.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}
