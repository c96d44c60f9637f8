//! EngineBuilder - JobManager の構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - 依存の注入（repository / clock / runtime handle / collaborators）

use std::sync::Arc;

use tokio::runtime::Handle;

use super::context::Collaborators;
use super::manager::{JobManager, ManagerSettings};
use crate::capture::LogCapture;
use crate::config::EngineConfig;
use crate::domain::JobKind;
use crate::exec::RemoteExecutor;
use crate::handlers;
use crate::impls::FileJobRepository;
use crate::ports::{
    AppCatalog, Clock, ComputeProvider, CredentialStore, DnsProvider, IdGenerator, JobRepository,
    StackDeployer, StoreError, SystemClock, Transport, UlidGenerator,
};
use crate::store::JobStore;
use crate::typed::{Handler, HandlerRegistry, JobSpec, RegistryError};

/// EngineBuilder は JobManager を構築
///
/// # 使用例
/// ```ignore
/// let manager = EngineBuilder::new(config)
///     .with_builtin_handlers()?
///     .catalog(Arc::new(catalog))
///     .transport(Arc::new(SshTransport::new(ssh)), Arc::new(credentials))
///     .expect_kinds(&[JobKind::DeployApp, JobKind::RemoteExec])
///     .build()
///     .await?;
/// ```
///
/// # Fail-fast 設計
/// - `expect_kinds()` で期待される JobKind を登録
/// - `build()` 時に「期待集合 ⊆ 登録済み集合」をチェック
/// - 不足があれば `BuildError::MissingKinds` を返す
pub struct EngineBuilder {
    config: EngineConfig,
    registry: HandlerRegistry,
    expected_kinds: Option<Vec<JobKind>>,
    collaborators: Collaborators,
    repository: Option<Arc<dyn JobRepository>>,
    clock: Arc<dyn Clock>,
    ids: Option<Arc<dyn IdGenerator>>,
    runtime: Option<Handle>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing job kinds: {0:?}. These kinds were expected but have no handler.")]
    MissingKinds(Vec<JobKind>),

    #[error("cannot load job store: {0}")]
    Store(#[from] StoreError),

    #[error("cannot prepare log directory: {0}")]
    LogDir(std::io::Error),

    #[error("no tokio runtime to run jobs on")]
    NoRuntime,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        let collaborators = Collaborators {
            default_command_timeout: config.default_command_timeout,
            ..Collaborators::default()
        };
        Self {
            config,
            registry: HandlerRegistry::new(),
            expected_kinds: None,
            collaborators,
            repository: None,
            clock: Arc::new(SystemClock),
            ids: None,
            runtime: None,
        }
    }

    /// Handler を登録
    pub fn register<T: JobSpec, H: Handler<T> + 'static>(
        mut self,
        handler: H,
    ) -> Result<Self, RegistryError> {
        self.registry.register::<T, H>(handler)?;
        Ok(self)
    }

    /// Register the handlers of every built-in kind.
    pub fn with_builtin_handlers(mut self) -> Result<Self, RegistryError> {
        handlers::register_all(&mut self.registry)?;
        Ok(self)
    }

    /// 期待される JobKind のリストを設定
    pub fn expect_kinds(mut self, kinds: &[JobKind]) -> Self {
        self.expected_kinds = Some(kinds.to_vec());
        self
    }

    pub fn catalog(mut self, catalog: Arc<dyn AppCatalog>) -> Self {
        self.collaborators.catalog = Some(catalog);
        self
    }

    /// Remote command execution through `transport`, capped per config.
    pub fn transport(
        mut self,
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        let executor = RemoteExecutor::new(transport, credentials)
            .with_output_cap(self.config.output_cap_bytes);
        self.collaborators.executor = Some(executor);
        self
    }

    pub fn compute(mut self, compute: Arc<dyn ComputeProvider>) -> Self {
        self.collaborators.compute = Some(compute);
        self
    }

    pub fn stacks(mut self, stacks: Arc<dyn StackDeployer>) -> Self {
        self.collaborators.stacks = Some(stacks);
        self
    }

    pub fn dns(mut self, dns: Arc<dyn DnsProvider>) -> Self {
        self.collaborators.dns = Some(dns);
        self
    }

    /// Persistence backend (defaults to `jobs.json` under `state_dir`).
    pub fn repository(mut self, repository: Arc<dyn JobRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Execution context for jobs (defaults to the current runtime).
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Validate the registrations, open the store and build the manager.
    ///
    /// # 検証
    /// - `expect_kinds()` の kind が全て登録されているか
    /// - 不足があれば `BuildError::MissingKinds`
    pub async fn build(self) -> Result<JobManager, BuildError> {
        if let Some(expected) = &self.expected_kinds {
            let missing: Vec<JobKind> = expected
                .iter()
                .copied()
                .filter(|kind| !self.registry.contains(*kind))
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingKinds(missing));
            }
        }

        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|_| BuildError::NoRuntime)?,
        };

        let log_dir = self.config.log_dir.clone();
        tokio::fs::create_dir_all(&log_dir)
            .await
            .map_err(BuildError::LogDir)?;

        let repository: Arc<dyn JobRepository> = match self.repository {
            Some(repository) => repository,
            None => Arc::new(FileJobRepository::new(&self.config.state_dir)),
        };
        let ids: Arc<dyn IdGenerator> = match self.ids {
            Some(ids) => ids,
            None => Arc::new(UlidGenerator::new(self.clock.clone())),
        };
        let store = JobStore::open(repository, self.clock, ids, &log_dir).await?;
        let capture = LogCapture::new(&log_dir, self.config.recent_log_capacity);

        let settings = ManagerSettings {
            recent_logs: self.config.recent_log_capacity,
            job_retention: self.config.job_retention,
            log_retention: self.config.log_retention,
            sweep_interval: self.config.sweep_interval,
        };
        tracing::info!(
            kinds = ?self.registry.registered_kinds(),
            state_dir = %self.config.state_dir.display(),
            log_dir = %log_dir.display(),
            "job manager ready"
        );
        Ok(JobManager::new(
            Arc::new(store),
            Arc::new(capture),
            self.registry,
            self.collaborators,
            runtime,
            settings,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryJobRepository;

    fn config() -> (tempfile::TempDir, EngineConfig) {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            state_dir: dir.path().join("state"),
            log_dir: dir.path().join("logs"),
            ..EngineConfig::default()
        };
        (dir, config)
    }

    #[tokio::test]
    async fn build_with_builtin_handlers_covers_every_kind() {
        let (_dir, config) = config();
        let manager = EngineBuilder::new(config)
            .with_builtin_handlers()
            .unwrap()
            .repository(Arc::new(InMemoryJobRepository::new()))
            .expect_kinds(&JobKind::ALL)
            .build()
            .await;
        assert!(manager.is_ok());
    }

    #[tokio::test]
    async fn missing_kinds_fail_the_build() {
        let (_dir, config) = config();
        let result = EngineBuilder::new(config)
            .repository(Arc::new(InMemoryJobRepository::new()))
            .expect_kinds(&[JobKind::DeployApp, JobKind::RemoteExec])
            .build()
            .await;
        assert!(matches!(
            result,
            Err(BuildError::MissingKinds(missing))
                if missing == vec![JobKind::DeployApp, JobKind::RemoteExec]
        ));
    }

    #[tokio::test]
    async fn builtin_handlers_cannot_be_registered_twice() {
        let (_dir, config) = config();
        let result = EngineBuilder::new(config)
            .with_builtin_handlers()
            .unwrap()
            .with_builtin_handlers();
        assert!(matches!(result, Err(RegistryError::AlreadyRegistered(_))));
    }

    #[tokio::test]
    async fn default_repository_lives_under_state_dir() {
        let (dir, config) = config();
        let manager = EngineBuilder::new(config)
            .with_builtin_handlers()
            .unwrap()
            .build()
            .await
            .unwrap();
        let _ = manager
            .submit_named("register-dns", crate::domain::JobParams::new())
            .await
            .unwrap();
        assert!(dir.path().join("state").join("jobs.json").exists());
        assert!(dir.path().join("logs").is_dir());
    }
}
