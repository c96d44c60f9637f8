//! InMemoryJobRepository - テスト用の永続化
//!
//! 書き込み失敗を注入できる（degraded モードのテスト用）。

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::domain::JobRecord;
use crate::ports::{JobRepository, StoreError};

#[derive(Default)]
pub struct InMemoryJobRepository {
    jobs: Mutex<Vec<JobRecord>>,
    fail_writes: AtomicBool,
    saves: AtomicUsize,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_jobs(jobs: Vec<JobRecord>) -> Self {
        Self {
            jobs: Mutex::new(jobs),
            ..Self::default()
        }
    }

    /// Make subsequent `save_all` calls fail with an I/O error.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> Vec<JobRecord> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn load_all(&self) -> Result<Vec<JobRecord>, StoreError> {
        Ok(self.snapshot())
    }

    async fn save_all(&self, jobs: &[JobRecord]) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::other("injected write failure")));
        }
        *self.jobs.lock().unwrap_or_else(|e| e.into_inner()) = jobs.to_vec();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
