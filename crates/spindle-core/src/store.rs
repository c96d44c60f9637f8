//! JobStore - ジョブ集合の正本（メモリ）と永続化
//!
//! Design:
//! - One `tokio::sync::Mutex` guards the map; every mutation persists the
//!   full set before the lock is released, so the durable copy never reorders
//! - Persistence failures are logged and flip the store into degraded mode;
//!   the in-memory state keeps serving queries
//! - `open` reloads the durable copy and fails jobs interrupted by a restart

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{JobFailure, JobId, JobKind, JobParams, JobRecord, JobStatus};
use crate::ports::{Clock, IdGenerator, JobRepository, StoreError};

/// Error recorded on jobs found unfinished at startup.
pub const INTERRUPTED_BY_RESTART: &str = "interrupted by restart";

pub struct JobStore {
    jobs: Mutex<HashMap<JobId, JobRecord>>,
    repo: Arc<dyn JobRepository>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    log_dir: PathBuf,
    degraded: AtomicBool,
}

impl JobStore {
    /// Load the durable job set and recover jobs left unfinished.
    ///
    /// A job found `Running` or `Pending` belonged to a previous process and
    /// nothing can resume it: it is marked `Failed`.
    pub async fn open(
        repo: Arc<dyn JobRepository>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        log_dir: impl Into<PathBuf>,
    ) -> Result<Self, StoreError> {
        let loaded = repo.load_all().await?;
        let now = clock.now();
        let mut recovered = 0;
        let mut jobs = HashMap::with_capacity(loaded.len());
        for mut job in loaded {
            if !job.is_terminal() {
                fail_interrupted(&mut job, now);
                recovered += 1;
            }
            jobs.insert(job.id, job);
        }

        let store = Self {
            jobs: Mutex::new(jobs),
            repo,
            clock,
            ids,
            log_dir: log_dir.into(),
            degraded: AtomicBool::new(false),
        };
        if recovered > 0 {
            tracing::warn!(recovered, "unfinished jobs from a previous run marked failed");
            store.persist().await;
        }
        Ok(store)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Whether the last persistence attempt failed.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    /// Create a Pending job; it is persisted before this returns.
    pub async fn create(&self, kind: JobKind, params: JobParams) -> JobRecord {
        let id = self.ids.generate_job_id();
        let log_ref = self.log_dir.join(format!("{id}.log"));
        let job = JobRecord::new(id, kind, params, self.clock.now(), log_ref);

        let mut jobs = self.jobs.lock().await;
        jobs.insert(id, job.clone());
        self.persist_locked(&jobs).await;
        job
    }

    pub async fn get(&self, id: JobId) -> Option<JobRecord> {
        self.jobs.lock().await.get(&id).cloned()
    }

    /// Jobs newest first, optionally filtered by status.
    pub async fn list(&self, status: Option<JobStatus>) -> Vec<JobRecord> {
        let jobs = self.jobs.lock().await;
        let mut out: Vec<JobRecord> = jobs
            .values()
            .filter(|job| status.is_none_or(|s| job.status == s))
            .cloned()
            .collect();
        sort_newest_first(&mut out);
        out
    }

    /// Apply `f` to the job and persist if it changed anything.
    ///
    /// Returns `None` for unknown ids.
    pub async fn update<R>(&self, id: JobId, f: impl FnOnce(&mut JobRecord) -> R) -> Option<R> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs.get_mut(&id)?;
        let before = job.clone();
        let out = f(job);
        if *job != before {
            self.persist_locked(&jobs).await;
        }
        Some(out)
    }

    /// Remove every job matching `pred` and return the removed records.
    pub async fn remove_where(&self, pred: impl Fn(&JobRecord) -> bool) -> Vec<JobRecord> {
        let mut jobs = self.jobs.lock().await;
        let ids: Vec<JobId> = jobs
            .values()
            .filter(|&job| pred(job))
            .map(|job| job.id)
            .collect();
        if ids.is_empty() {
            return Vec::new();
        }
        let removed = ids.iter().filter_map(|id| jobs.remove(id)).collect();
        self.persist_locked(&jobs).await;
        removed
    }

    /// Write the full job set.
    pub async fn persist(&self) {
        let jobs = self.jobs.lock().await;
        self.persist_locked(&jobs).await;
    }

    async fn persist_locked(&self, jobs: &HashMap<JobId, JobRecord>) {
        let mut snapshot: Vec<JobRecord> = jobs.values().cloned().collect();
        sort_newest_first(&mut snapshot);
        match self.repo.save_all(&snapshot).await {
            Ok(()) => {
                if self.degraded.swap(false, Ordering::SeqCst) {
                    tracing::info!("job store persistence recovered");
                }
            }
            Err(e) => {
                tracing::error!(error = %e, jobs = snapshot.len(), "failed to persist job store");
                self.degraded.store(true, Ordering::SeqCst);
            }
        }
    }
}

fn fail_interrupted(job: &mut JobRecord, now: DateTime<Utc>) {
    if job.status == JobStatus::Pending {
        // Pending has no direct edge to Failed
        let _ = job.mark_running(now);
    }
    if let Err(e) = job.mark_failed(JobFailure::execution(INTERRUPTED_BY_RESTART), now) {
        tracing::warn!(job_id = %job.id, error = %e, "could not recover job");
    }
}

fn sort_newest_first(jobs: &mut [JobRecord]) {
    jobs.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.id.as_ulid().cmp(&a.id.as_ulid()))
    });
}
