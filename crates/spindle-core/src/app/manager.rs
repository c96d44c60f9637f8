//! JobManager - ジョブのライフサイクル全体を所有する
//!
//! # フロー
//! 1. `submit`: kind を検証 → Pending で作成（永続化）→ job 実行コンテキストへ spawn → 即 return
//! 2. `run`: Pending→Running → log capture を有効化 → handler を dispatch
//! 3. 結果を一度だけ捕捉: Success→Completed, Failure/Err→Failed, cancel→Cancelled
//! 4. capture を閉じて artifact を flush してから terminal 状態を永続化
//!
//! 各ジョブは独立した tokio task として、注入された `Handle` 上で動きます。
//! クエリ（status / logs / list）はストアとメモリ上のリングしか読まないので
//! 実行中のジョブにブロックされません。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::context::{Collaborators, JobContext};
use crate::capture::LogCapture;
use crate::domain::{
    JobError, JobFailure, JobId, JobKind, JobParams, JobRecord, JobStatus, JobSummary, JobView,
    LogEntry, LogLevel, Outcome, ValidationError,
};
use crate::observability::JobCounts;
use crate::store::JobStore;
use crate::typed::{HandlerRegistry, JobSpec};

/// After a timed-out shutdown fires the cancellation tokens, how long
/// cooperative handlers get to wind down before being marked Cancelled.
const SHUTDOWN_SETTLE: Duration = Duration::from_millis(500);

/// Retention and sweep settings.
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// Entries returned as `recent_logs` by `status`.
    pub recent_logs: usize,
    pub job_retention: Duration,
    pub log_retention: Duration,
    pub sweep_interval: Duration,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            recent_logs: 100,
            job_retention: Duration::from_secs(7 * 24 * 3600),
            log_retention: Duration::from_secs(72 * 3600),
            sweep_interval: Duration::from_secs(3600),
        }
    }
}

/// What one maintenance pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub jobs_removed: usize,
    pub artifacts_removed: usize,
}

enum Terminal {
    Completed(serde_json::Value),
    Failed(JobFailure),
    Cancelled,
}

#[derive(Clone)]
pub struct JobManager {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<JobStore>,
    capture: Arc<LogCapture>,
    registry: HandlerRegistry,
    collaborators: Arc<Collaborators>,
    runtime: Handle,
    settings: ManagerSettings,
    /// Cancellation tokens of submitted, not yet finished jobs.
    running: Mutex<HashMap<JobId, CancellationToken>>,
    idle: Notify,
    accepting: AtomicBool,
    maintenance: CancellationToken,
}

impl JobManager {
    pub(crate) fn new(
        store: Arc<JobStore>,
        capture: Arc<LogCapture>,
        registry: HandlerRegistry,
        collaborators: Collaborators,
        runtime: Handle,
        settings: ManagerSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                capture,
                registry,
                collaborators: Arc::new(collaborators),
                runtime,
                settings,
                running: Mutex::new(HashMap::new()),
                idle: Notify::new(),
                accepting: AtomicBool::new(true),
                maintenance: CancellationToken::new(),
            }),
        }
    }

    // =========================================================================
    // Submission and execution
    // =========================================================================

    /// Create a Pending job and schedule it; returns without waiting for it.
    ///
    /// # Errors
    /// - `UnknownKind` when no handler is registered (nothing is created)
    /// - `ShuttingDown` once `shutdown` has begun
    pub async fn submit(&self, kind: JobKind, params: JobParams) -> Result<JobId, JobError> {
        if !self.inner.accepting.load(Ordering::SeqCst) {
            return Err(ValidationError::ShuttingDown.into());
        }
        if !self.inner.registry.contains(kind) {
            return Err(ValidationError::UnknownKind(kind.to_string()).into());
        }

        let job = self.inner.store.create(kind, params).await;
        let id = job.id;
        self.track(id);
        tracing::info!(job_id = %id, %kind, "job submitted");

        let manager = self.clone();
        self.inner.runtime.spawn(async move {
            if let Err(e) = manager.run(id).await {
                tracing::error!(job_id = %id, error = %e, "job could not be run");
            }
        });
        Ok(id)
    }

    /// `submit` with the kind given as a string (`"remote-exec"`).
    pub async fn submit_named(&self, kind: &str, params: JobParams) -> Result<JobId, JobError> {
        let kind: JobKind = kind
            .parse()
            .map_err(|_| ValidationError::UnknownKind(kind.to_string()))?;
        self.submit(kind, params).await
    }

    /// `submit` with typed params.
    pub async fn submit_typed<T: JobSpec>(&self, params: &T) -> Result<JobId, JobError> {
        let params = params
            .into_params()
            .map_err(|e| ValidationError::InvalidParams {
                kind: T::KIND,
                reason: e.to_string(),
            })?;
        self.submit(T::KIND, params).await
    }

    /// Execute a Pending job to a terminal state.
    ///
    /// A job that is not Pending (already running, finished, or cancelled
    /// before it started) is left alone.
    pub async fn run(&self, id: JobId) -> Result<(), JobError> {
        let now = self.inner.store.now();
        let started = self
            .inner
            .store
            .update(id, |job| {
                job.mark_running(now)
                    .map(|_| (job.kind, job.params.clone()))
            })
            .await
            .ok_or(JobError::NotFound(id))?;
        let (kind, params) = match started {
            Ok(started) => started,
            Err(e) => {
                if e.from.is_terminal() {
                    self.untrack(id);
                }
                tracing::debug!(job_id = %id, error = %e, "run skipped");
                return Ok(());
            }
        };

        let cancel = self.track(id);
        let log = self.inner.capture.activate(id);
        log.info(format!("job started: {kind}"));
        tracing::info!(job_id = %id, %kind, "job started");

        let ctx = JobContext::new(
            id,
            kind,
            log.clone(),
            cancel,
            self.inner.store.clone(),
            self.inner.collaborators.clone(),
        );
        let terminal = match self.dispatch(kind, params, ctx).await {
            Ok(Outcome::Success(value)) => Terminal::Completed(value),
            Ok(Outcome::Failure(failure)) => Terminal::Failed(failure),
            Err(e) if e.is_cancellation() => Terminal::Cancelled,
            Err(e) => Terminal::Failed(JobFailure::from(&e)),
        };

        match &terminal {
            Terminal::Completed(_) => {
                log.info("job completed");
                tracing::info!(job_id = %id, %kind, "job completed");
            }
            Terminal::Failed(failure) => {
                log.error(format!("job failed: {failure}"));
                tracing::warn!(
                    job_id = %id,
                    %kind,
                    error_kind = %failure.kind,
                    error = %failure.message,
                    "job failed"
                );
            }
            Terminal::Cancelled => {
                log.warn("job cancelled");
                tracing::info!(job_id = %id, %kind, "job cancelled");
            }
        }

        // every line must be on disk before the terminal state is visible
        self.inner.capture.deactivate(id).await;

        let now = self.inner.store.now();
        let recorded = self
            .inner
            .store
            .update(id, |job| match terminal {
                Terminal::Completed(value) => job.mark_completed(value, now),
                Terminal::Failed(failure) => job.mark_failed(failure, now),
                Terminal::Cancelled => job.mark_cancelled(now),
            })
            .await;
        if let Some(Err(e)) = recorded {
            // shutdown may have already marked it Cancelled
            tracing::warn!(job_id = %id, error = %e, "terminal state not recorded");
        }
        self.untrack(id);
        Ok(())
    }

    /// Hand the job to its handler on a task of its own so a panic is
    /// contained and recorded.
    async fn dispatch(
        &self,
        kind: JobKind,
        params: JobParams,
        ctx: JobContext,
    ) -> Result<Outcome, JobError> {
        let Some(handler) = self.inner.registry.get(kind) else {
            return Err(ValidationError::UnknownKind(kind.to_string()).into());
        };
        let task = tokio::spawn(async move { handler.execute_dyn(&params, &ctx).await });
        match task.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Ok(Outcome::failure(format!(
                "handler panicked: {}",
                panic_message(e.into_panic())
            ))),
            Err(_) => Err(JobError::Cancelled),
        }
    }

    // =========================================================================
    // Cancellation and shutdown
    // =========================================================================

    /// Request cancellation.
    ///
    /// Pending jobs become Cancelled immediately. Running jobs get their
    /// token fired and reach Cancelled once the handler observes it.
    /// Returns false for unknown and already terminal jobs.
    pub async fn cancel(&self, id: JobId) -> bool {
        let now = self.inner.store.now();
        let prior = self
            .inner
            .store
            .update(id, |job| {
                let prior = job.status;
                if prior == JobStatus::Pending {
                    let _ = job.mark_cancelled(now);
                }
                prior
            })
            .await;

        match prior {
            Some(JobStatus::Pending) => {
                if let Some(token) = self.untrack(id) {
                    token.cancel();
                }
                tracing::info!(job_id = %id, "pending job cancelled");
                true
            }
            Some(JobStatus::Running) => {
                if let Some(token) = self.token(id) {
                    token.cancel();
                }
                if let Some(log) = self.inner.capture.logger(id) {
                    log.warn("cancellation requested");
                }
                tracing::info!(job_id = %id, "cancellation requested");
                true
            }
            _ => false,
        }
    }

    /// Stop accepting jobs and wait up to `grace` for running ones.
    ///
    /// Jobs still unfinished after `grace` are cancelled and marked
    /// Cancelled. Returns how many jobs had to be cancelled.
    pub async fn shutdown(&self, grace: Duration) -> usize {
        self.inner.accepting.store(false, Ordering::SeqCst);
        self.inner.maintenance.cancel();
        tracing::info!(
            running = self.running_count(),
            grace_secs = grace.as_secs_f64(),
            "job manager shutting down"
        );

        if tokio::time::timeout(grace, self.wait_idle()).await.is_ok() {
            tracing::info!("all jobs finished");
            return 0;
        }

        let remaining: Vec<(JobId, CancellationToken)> = {
            let running = self.inner.running.lock().unwrap_or_else(|e| e.into_inner());
            running.iter().map(|(id, t)| (*id, t.clone())).collect()
        };
        for (_, token) in &remaining {
            token.cancel();
        }
        let _ = tokio::time::timeout(SHUTDOWN_SETTLE, self.wait_idle()).await;

        let now = self.inner.store.now();
        for (id, _) in &remaining {
            let marked = self
                .inner
                .store
                .update(*id, |job| !job.is_terminal() && job.mark_cancelled(now).is_ok())
                .await;
            if marked == Some(true) {
                if let Some(log) = self.inner.capture.logger(*id) {
                    log.warn("job cancelled by shutdown");
                }
                self.inner.capture.deactivate(*id).await;
            }
            self.untrack(*id);
        }
        tracing::warn!(cancelled = remaining.len(), "jobs cancelled by shutdown");
        remaining.len()
    }

    pub fn is_accepting(&self) -> bool {
        self.inner.accepting.load(Ordering::SeqCst)
    }

    fn track(&self, id: JobId) -> CancellationToken {
        let mut running = self.inner.running.lock().unwrap_or_else(|e| e.into_inner());
        running
            .entry(id)
            .or_insert_with(CancellationToken::new)
            .clone()
    }

    fn token(&self, id: JobId) -> Option<CancellationToken> {
        let running = self.inner.running.lock().unwrap_or_else(|e| e.into_inner());
        running.get(&id).cloned()
    }

    fn untrack(&self, id: JobId) -> Option<CancellationToken> {
        let mut running = self.inner.running.lock().unwrap_or_else(|e| e.into_inner());
        let token = running.remove(&id);
        if running.is_empty() {
            self.inner.idle.notify_waiters();
        }
        token
    }

    fn running_count(&self) -> usize {
        let running = self.inner.running.lock().unwrap_or_else(|e| e.into_inner());
        running.len()
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.running_count() == 0 {
                return;
            }
            notified.await;
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn job(&self, id: JobId) -> Option<JobRecord> {
        self.inner.store.get(id).await
    }

    /// Status, progress, step, result or error, and the most recent log lines.
    pub async fn status(&self, id: JobId) -> Result<JobView, JobError> {
        let job = self.inner.store.get(id).await.ok_or(JobError::NotFound(id))?;
        let limit = self.inner.settings.recent_logs;
        let mut recent = self.inner.capture.recent(id, limit);
        if recent.is_empty() && job.status != JobStatus::Pending {
            // ring is gone after a restart; the artifact still has the lines
            recent = self
                .inner
                .capture
                .tail_entries(id, limit, None)
                .await
                .unwrap_or_default();
        }
        Ok(job.view(recent))
    }

    /// The last `tail` artifact entries at or above `level`.
    pub async fn logs(
        &self,
        id: JobId,
        tail: usize,
        level: Option<LogLevel>,
    ) -> Result<Vec<LogEntry>, JobError> {
        if self.inner.store.get(id).await.is_none() {
            return Err(JobError::NotFound(id));
        }
        self.inner
            .capture
            .tail_entries(id, tail, level)
            .await
            .map_err(|e| JobError::execution(format!("log read failed: {e}")))
    }

    /// Jobs newest first.
    pub async fn list(&self, status: Option<JobStatus>) -> Vec<JobSummary> {
        self.inner
            .store
            .list(status)
            .await
            .iter()
            .map(JobRecord::summary)
            .collect()
    }

    pub async fn counts(&self) -> JobCounts {
        JobCounts::tally(&self.inner.store.list(None).await)
    }

    /// Whether job persistence is currently failing.
    pub fn is_degraded(&self) -> bool {
        self.inner.store.is_degraded()
    }

    // =========================================================================
    // Retention
    // =========================================================================

    /// Remove terminal jobs finished more than `older_than` ago, optionally
    /// only those in `status`, together with their log artifacts.
    pub async fn cleanup(&self, older_than: Duration, status: Option<JobStatus>) -> usize {
        let now = self.inner.store.now();
        let Some(cutoff) = chrono::Duration::from_std(older_than)
            .ok()
            .and_then(|age| now.checked_sub_signed(age))
        else {
            return 0;
        };

        let removed = self
            .inner
            .store
            .remove_where(|job| {
                job.is_terminal()
                    && status.is_none_or(|s| job.status == s)
                    && job.completed_at.is_some_and(|at| at <= cutoff)
            })
            .await;
        for job in &removed {
            if let Err(e) = self.inner.capture.forget(job.id).await {
                tracing::warn!(job_id = %job.id, error = %e, "failed to delete log artifact");
            }
        }
        if !removed.is_empty() {
            tracing::info!(removed = removed.len(), "expired jobs removed");
        }
        removed.len()
    }

    /// One pass of the job-retention and log-artifact sweeps.
    pub async fn run_maintenance(&self) -> MaintenanceReport {
        let settings = &self.inner.settings;
        let jobs_removed = self.cleanup(settings.job_retention, None).await;
        let artifacts_removed = match self.inner.capture.sweep(settings.log_retention).await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, "log artifact sweep failed");
                0
            }
        };
        MaintenanceReport {
            jobs_removed,
            artifacts_removed,
        }
    }

    /// Run maintenance every `sweep_interval` until shutdown.
    pub fn spawn_maintenance(&self) -> JoinHandle<()> {
        let manager = self.clone();
        let stop = self.inner.maintenance.clone();
        self.inner.runtime.spawn(async move {
            let mut ticker = tokio::time::interval(manager.inner.settings.sweep_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        let report = manager.run_maintenance().await;
                        tracing::debug!(?report, "maintenance pass finished");
                    }
                }
            }
            tracing::debug!("maintenance stopped");
        })
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
