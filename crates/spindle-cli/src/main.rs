//! spindle - ジョブエンジンのデモ CLI
//!
//! exec / deploy / cleanup はエンジンを組み立ててジョブを投入し、
//! 終了までポーリングします。jobs / logs は永続化されたファイルを直接読むだけで、
//! 実行中の別プロセスの状態には触れません。

use std::collections::BTreeMap;
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio_util::sync::CancellationToken;

use spindle_core::app::{EngineBuilder, JobManager};
use spindle_core::capture::LogCapture;
use spindle_core::config::{EngineConfig, parse_duration};
use spindle_core::domain::{JobId, JobKind, JobStatus, LogLevel};
use spindle_core::exec::RemoteExecutor;
use spindle_core::handlers::{DeployApp, RemoteExec};
use spindle_core::impls::ssh_transport::shell_quote;
use spindle_core::impls::{
    FileJobRepository, LocalTransport, SshTransport, StaticCatalog, StaticCredentials,
};
use spindle_core::observability::init_tracing;
use spindle_core::ports::{
    CredentialStore, Credentials, JobRepository, ProviderError, StackDefinition, StackDeployer,
    StackOutcome, Transport,
};

const POLL_INTERVAL: Duration = Duration::from_millis(200);
const STACKS_ROOT: &str = "/opt/stacks";

#[derive(Parser, Debug)]
#[command(name = "spindle")]
#[command(version)]
#[command(about = "Run infrastructure operations as tracked jobs")]
#[command(propagate_version = true)]
struct Args {
    /// Configuration file (TOML); defaults plus SPINDLE_* variables otherwise
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run one command on a target ("local" runs it on this machine)
    Exec {
        target: String,
        command: String,

        #[arg(long, value_parser = parse_duration)]
        timeout: Option<Duration>,
    },

    /// Install an application and its missing dependencies on a target
    Deploy {
        app: String,

        #[arg(long)]
        target: String,

        /// Application catalog (TOML)
        #[arg(long)]
        catalog: PathBuf,
    },

    /// List recorded jobs, newest first
    Jobs {
        #[arg(long)]
        status: Option<JobStatus>,
    },

    /// Print the captured log of a job
    Logs {
        job_id: JobId,

        #[arg(long, default_value_t = 50)]
        tail: usize,

        #[arg(long)]
        level: Option<LogLevel>,
    },

    /// Remove finished jobs and their logs
    Cleanup {
        #[arg(long, value_parser = parse_duration)]
        older_than: Duration,

        #[arg(long)]
        status: Option<JobStatus>,
    },
}

fn main() -> Result<ExitCode, Box<dyn Error>> {
    init_tracing();
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => EngineConfig::load_from(path)?,
        None => EngineConfig::from_env()?,
    };

    let queries = Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("spindle-query")
        .enable_all()
        .build()?;

    match args.command {
        Commands::Jobs { status } => queries.block_on(list_jobs(&config, status)),
        Commands::Logs {
            job_id,
            tail,
            level,
        } => queries.block_on(print_logs(&config, job_id, tail, level)),
        command => {
            let jobs = job_runtime(&config)?;
            let result = queries.block_on(run_engine(config, jobs.handle().clone(), command));
            jobs.shutdown_timeout(Duration::from_secs(1));
            result
        }
    }
}

/// Dedicated runtime the jobs execute on, apart from the query runtime.
fn job_runtime(config: &EngineConfig) -> std::io::Result<Runtime> {
    Builder::new_multi_thread()
        .worker_threads(config.job_worker_threads)
        .thread_name("spindle-jobs")
        .enable_all()
        .build()
}

async fn list_jobs(
    config: &EngineConfig,
    status: Option<JobStatus>,
) -> Result<ExitCode, Box<dyn Error>> {
    let mut jobs = FileJobRepository::new(&config.state_dir).load_all().await?;
    jobs.retain(|job| status.is_none_or(|s| job.status == s));
    jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    if jobs.is_empty() {
        println!("no jobs");
        return Ok(ExitCode::SUCCESS);
    }
    println!(
        "{:<32} {:<15} {:<10} {:>4}  CREATED",
        "ID", "KIND", "STATUS", "%"
    );
    for job in &jobs {
        println!(
            "{:<32} {:<15} {:<10} {:>4}  {}",
            job.id.to_string(),
            job.kind.as_str(),
            job.status.to_string(),
            job.progress,
            job.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(ExitCode::SUCCESS)
}

async fn print_logs(
    config: &EngineConfig,
    job_id: JobId,
    tail: usize,
    level: Option<LogLevel>,
) -> Result<ExitCode, Box<dyn Error>> {
    let capture = LogCapture::new(&config.log_dir, config.recent_log_capacity);
    let lines = capture.tail(job_id, tail, level).await?;
    if lines.is_empty() {
        eprintln!("no log lines for {job_id}");
    }
    for line in lines {
        println!("{line}");
    }
    Ok(ExitCode::SUCCESS)
}

async fn run_engine(
    config: EngineConfig,
    jobs: Handle,
    command: Commands,
) -> Result<ExitCode, Box<dyn Error>> {
    let grace = config.shutdown_grace;
    let stop = CancellationToken::new();
    tokio::spawn(watch_signals(stop.clone()));

    let outcome = match command {
        Commands::Exec {
            target,
            command,
            timeout,
        } => {
            let manager = build_engine(&config, &target, None, jobs).await?;
            let id = manager
                .submit_typed(&RemoteExec {
                    target,
                    command,
                    timeout,
                    workdir: None,
                })
                .await?;
            let code = follow(&manager, id, &stop).await?;
            manager.shutdown(grace).await;
            code
        }
        Commands::Deploy {
            app,
            target,
            catalog,
        } => {
            let catalog = StaticCatalog::load(&catalog)?;
            let manager = build_engine(&config, &target, Some(catalog), jobs).await?;
            let id = manager
                .submit_typed(&DeployApp {
                    app,
                    target,
                    vars: BTreeMap::new(),
                })
                .await?;
            let code = follow(&manager, id, &stop).await?;
            manager.shutdown(grace).await;
            code
        }
        Commands::Cleanup { older_than, status } => {
            let manager = EngineBuilder::new(config.clone())
                .with_builtin_handlers()?
                .runtime(jobs)
                .build()
                .await?;
            let removed = manager.cleanup(older_than, status).await;
            println!("removed {removed} job(s)");
            manager.shutdown(grace).await;
            ExitCode::SUCCESS
        }
        Commands::Jobs { .. } | Commands::Logs { .. } => ExitCode::SUCCESS,
    };
    Ok(outcome)
}

async fn build_engine(
    config: &EngineConfig,
    target: &str,
    catalog: Option<StaticCatalog>,
    jobs: Handle,
) -> Result<JobManager, Box<dyn Error>> {
    let transport: Arc<dyn Transport> = if matches!(target, "local" | "localhost") {
        Arc::new(LocalTransport::new())
    } else {
        Arc::new(SshTransport::new(config.ssh.clone()))
    };
    let credentials: Arc<dyn CredentialStore> =
        Arc::new(StaticCredentials::new().with_default(Credentials {
            user: Some(config.ssh.user.clone()),
            port: Some(config.ssh.port),
            key_path: None,
        }));
    let stacks = ComposeDeployer {
        executor: RemoteExecutor::new(transport.clone(), credentials.clone())
            .with_output_cap(config.output_cap_bytes),
        timeout: config.default_command_timeout,
    };

    let mut builder = EngineBuilder::new(config.clone())
        .with_builtin_handlers()?
        .expect_kinds(&[JobKind::RemoteExec, JobKind::DeployApp])
        .transport(transport, credentials)
        .stacks(Arc::new(stacks))
        .runtime(jobs);
    if let Some(catalog) = catalog {
        builder = builder.catalog(Arc::new(catalog));
    }
    let manager = builder.build().await?;
    if manager.is_degraded() {
        tracing::warn!("job state could not be persisted during startup recovery");
    }
    Ok(manager)
}

/// Poll the job until it is terminal, echoing progress changes.
///
/// A signal cancels the job and keeps polling until it settles.
async fn follow(
    manager: &JobManager,
    id: JobId,
    stop: &CancellationToken,
) -> Result<ExitCode, Box<dyn Error>> {
    println!("submitted {id}");
    let mut last_progress = None;
    let mut cancel_sent = false;
    loop {
        if stop.is_cancelled() && !cancel_sent {
            cancel_sent = true;
            if manager.cancel(id).await {
                eprintln!("cancelling {id}");
            }
        }

        let view = manager.status(id).await?;
        if last_progress != Some(view.progress) {
            last_progress = Some(view.progress);
            let step = view
                .step
                .as_ref()
                .and_then(|s| s.label.as_deref())
                .unwrap_or("");
            println!("[{:>3}%] {} {step}", view.progress, view.status);
        }

        if view.status.is_terminal() {
            for entry in &view.recent_logs {
                println!("{}", entry.to_line());
            }
            if let Some(result) = &view.result {
                println!("{}", serde_json::to_string_pretty(result)?);
            }
            if let Some(error) = &view.error {
                eprintln!("error ({}): {}", error.kind, error.message);
            }
            println!("final status: {}", view.status);
            return Ok(match view.status {
                JobStatus::Completed => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            });
        }

        tokio::select! {
            _ = stop.cancelled(), if !cancel_sent => {}
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
        }
    }
}

async fn watch_signals(stop: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    tracing::info!("shutdown signal received");
    stop.cancel();
}

/// Deploys a named stack with `docker compose` under `/opt/stacks/<name>`.
struct ComposeDeployer {
    executor: RemoteExecutor,
    timeout: Duration,
}

impl ComposeDeployer {
    fn command(definition: &StackDefinition, vars: &BTreeMap<String, String>) -> String {
        let dir = format!("{STACKS_ROOT}/{}", definition.name);
        let env: String = vars
            .iter()
            .filter(|(k, _)| k.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'))
            .map(|(k, v)| format!("{k}={} ", shell_quote(v)))
            .collect();
        match &definition.compose {
            Some(compose) => format!(
                "mkdir -p {dir} && printf '%s' {} > {dir}/compose.yaml && cd {dir} && {env}docker compose up -d",
                shell_quote(compose),
                dir = shell_quote(&dir),
            ),
            None => format!("cd {} && {env}docker compose up -d", shell_quote(&dir)),
        }
    }
}

#[async_trait]
impl StackDeployer for ComposeDeployer {
    async fn deploy_stack(
        &self,
        target: &str,
        definition: &StackDefinition,
        vars: &BTreeMap<String, String>,
    ) -> Result<StackOutcome, ProviderError> {
        let command = Self::command(definition, vars);
        let output = self
            .executor
            .run(
                target,
                &command,
                self.timeout,
                None,
                None,
                &CancellationToken::new(),
            )
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;
        if output.success {
            Ok(StackOutcome::ok())
        } else {
            let stderr = output.stderr.trim();
            Ok(StackOutcome::failed(if stderr.is_empty() {
                format!("docker compose exited with {:?}", output.exit_code)
            } else {
                stderr.to_string()
            }))
        }
    }
}
