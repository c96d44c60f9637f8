//! JobContext - handler に渡される実行コンテキスト
//!
//! collaborators（catalog / executor / provider）、ジョブ専用の log sink、
//! progress reporter、cancellation token をまとめて持ちます。

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::capture::JobLogger;
use crate::domain::{JobError, JobId, JobKind, StepInfo, ValidationError};
use crate::exec::RemoteExecutor;
use crate::ports::{AppCatalog, ComputeProvider, DnsProvider, StackDeployer};
use crate::resolver::DependencyResolver;
use crate::store::JobStore;

/// External collaborators shared by every job.
///
/// Handlers that need a missing collaborator fail with a validation error.
#[derive(Clone)]
pub struct Collaborators {
    pub catalog: Option<Arc<dyn AppCatalog>>,
    pub executor: Option<RemoteExecutor>,
    pub compute: Option<Arc<dyn ComputeProvider>>,
    pub stacks: Option<Arc<dyn StackDeployer>>,
    pub dns: Option<Arc<dyn DnsProvider>>,
    /// Used when a command does not carry its own timeout.
    pub default_command_timeout: Duration,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            catalog: None,
            executor: None,
            compute: None,
            stacks: None,
            dns: None,
            default_command_timeout: Duration::from_secs(300),
        }
    }
}

enum ProgressSink {
    Store(Arc<JobStore>),
    Local(Mutex<(u8, Option<StepInfo>)>),
}

pub struct JobContext {
    job_id: JobId,
    kind: JobKind,
    log: JobLogger,
    cancel: CancellationToken,
    progress: ProgressSink,
    collaborators: Arc<Collaborators>,
}

impl JobContext {
    pub(crate) fn new(
        job_id: JobId,
        kind: JobKind,
        log: JobLogger,
        cancel: CancellationToken,
        store: Arc<JobStore>,
        collaborators: Arc<Collaborators>,
    ) -> Self {
        Self {
            job_id,
            kind,
            log,
            cancel,
            progress: ProgressSink::Store(store),
            collaborators,
        }
    }

    /// A context outside the manager: fresh id, in-memory log and progress.
    pub fn detached(kind: JobKind) -> Self {
        let job_id = JobId::from_ulid(ulid::Ulid::new());
        Self {
            job_id,
            kind,
            log: JobLogger::detached(job_id, 100),
            cancel: CancellationToken::new(),
            progress: ProgressSink::Local(Mutex::new((0, None))),
            collaborators: Arc::new(Collaborators::default()),
        }
    }

    pub fn with_collaborators(mut self, collaborators: Collaborators) -> Self {
        self.collaborators = Arc::new(collaborators);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    /// The job's log sink.
    pub fn log(&self) -> &JobLogger {
        &self.log
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cooperative cancellation point between steps.
    pub fn checkpoint(&self) -> Result<(), JobError> {
        if self.cancel.is_cancelled() {
            self.log.warn("cancellation observed");
            return Err(JobError::Cancelled);
        }
        Ok(())
    }

    /// Raise progress (monotonic, clamped to 100).
    pub async fn progress(&self, percent: u8) {
        self.report(percent, None).await;
    }

    /// Discrete step progress: entering step `current` of `total`.
    pub async fn step(&self, current: u32, total: u32, label: impl Into<String>) {
        let step = StepInfo::new(current, total, Some(label.into()));
        let percent = step.progress();
        if let Some(label) = &step.label {
            self.log
                .info(format!("step {}/{}: {label}", step.current, step.total));
        }
        self.report(percent, Some(step)).await;
    }

    async fn report(&self, percent: u8, step: Option<StepInfo>) {
        match &self.progress {
            ProgressSink::Store(store) => {
                store
                    .update(self.job_id, |job| job.advance_progress(percent, step))
                    .await;
            }
            ProgressSink::Local(state) => {
                let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
                state.0 = state.0.max(percent.min(100));
                if step.is_some() {
                    state.1 = step;
                }
            }
        }
    }

    /// Current `(progress, step)`.
    pub async fn progress_state(&self) -> (u8, Option<StepInfo>) {
        match &self.progress {
            ProgressSink::Store(store) => store
                .get(self.job_id)
                .await
                .map(|job| (job.progress, job.step))
                .unwrap_or_default(),
            ProgressSink::Local(state) => state.lock().unwrap_or_else(|e| e.into_inner()).clone(),
        }
    }

    /// Run a blocking collaborator call on the blocking pool.
    pub async fn blocking<F, R>(&self, f: F) -> Result<R, JobError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        tokio::task::spawn_blocking(f)
            .await
            .map_err(|e| JobError::execution(format!("blocking call failed: {e}")))
    }

    pub fn default_command_timeout(&self) -> Duration {
        self.collaborators.default_command_timeout
    }

    pub fn catalog(&self) -> Result<&Arc<dyn AppCatalog>, JobError> {
        self.collaborators
            .catalog
            .as_ref()
            .ok_or_else(|| missing("application catalog"))
    }

    pub fn resolver(&self) -> Result<DependencyResolver, JobError> {
        Ok(DependencyResolver::new(self.catalog()?.clone()))
    }

    pub fn executor(&self) -> Result<&RemoteExecutor, JobError> {
        self.collaborators
            .executor
            .as_ref()
            .ok_or_else(|| missing("remote executor"))
    }

    pub fn compute(&self) -> Result<&Arc<dyn ComputeProvider>, JobError> {
        self.collaborators
            .compute
            .as_ref()
            .ok_or_else(|| missing("compute provider"))
    }

    pub fn stacks(&self) -> Result<&Arc<dyn StackDeployer>, JobError> {
        self.collaborators
            .stacks
            .as_ref()
            .ok_or_else(|| missing("stack deployer"))
    }

    pub fn dns(&self) -> Result<&Arc<dyn DnsProvider>, JobError> {
        self.collaborators
            .dns
            .as_ref()
            .ok_or_else(|| missing("DNS provider"))
    }
}

fn missing(what: &str) -> JobError {
    ValidationError::MissingPrecondition(format!("no {what} configured")).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn checkpoint_reports_cancellation() {
        let cancel = CancellationToken::new();
        let ctx = JobContext::detached(JobKind::DeployApp).with_cancellation(cancel.clone());
        assert!(ctx.checkpoint().is_ok());
        cancel.cancel();
        assert_eq!(ctx.checkpoint(), Err(JobError::Cancelled));
    }

    #[tokio::test]
    async fn local_progress_is_monotonic() {
        let ctx = JobContext::detached(JobKind::DeployApp);
        ctx.step(3, 4, "redis").await;
        ctx.progress(10).await;
        let (percent, step) = ctx.progress_state().await;
        assert_eq!(percent, 50);
        assert_eq!(step.unwrap().label.as_deref(), Some("redis"));
        assert_eq!(ctx.log().recent(10)[0].message, "step 3/4: redis");
    }

    #[tokio::test]
    async fn missing_collaborator_is_a_validation_error() {
        let ctx = JobContext::detached(JobKind::ProvisionHost);
        let err = ctx.compute().err().unwrap();
        assert_eq!(err.kind(), crate::domain::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn blocking_runs_off_the_async_threads() {
        let ctx = JobContext::detached(JobKind::RemoteExec);
        let value = ctx.blocking(|| 6 * 7).await.unwrap();
        assert_eq!(value, 42);
    }
}
