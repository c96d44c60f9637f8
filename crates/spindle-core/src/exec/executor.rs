//! RemoteExecutor - 1 コマンドをリモートで実行し、出力をストリームする
//!
//! 流れ: denylist → credentials → session → spawn → stdout/stderr を
//! 行単位で並行に読み、各行を即座に `JobLogger` へ流す。
//! timeout / cancel ではプロセスを kill して reap する。

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use super::guard::validate_command;
use crate::capture::JobLogger;
use crate::domain::{JobError, LogLevel, ValidationError};
use crate::ports::{
    CredentialStore, OutputStream, ProcessControl, RemoteProcess, RemoteSession, Transport,
    TransportError,
};

/// Default per-stream capture cap (10 KB).
pub const DEFAULT_OUTPUT_CAP: usize = 10 * 1024;

/// Result of one finished command.
///
/// `exit_code` is `None` when the process died from a signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub success: bool,
    pub truncated: bool,
}

#[derive(Clone)]
pub struct RemoteExecutor {
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialStore>,
    output_cap: usize,
}

enum Finish {
    Exited(Result<(Captured, Captured, Option<i32>), TransportError>),
    TimedOut,
    Cancelled,
}

impl RemoteExecutor {
    pub fn new(transport: Arc<dyn Transport>, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            transport,
            credentials,
            output_cap: DEFAULT_OUTPUT_CAP,
        }
    }

    pub fn with_output_cap(mut self, cap: usize) -> Self {
        self.output_cap = cap.max(1);
        self
    }

    /// Run `command` on `target`.
    ///
    /// Output lines go to `sink` as they arrive (stdout at INFO, stderr at
    /// WARN). A non-zero exit is not an error here; callers decide.
    ///
    /// # Errors
    /// - `Validation` for rejected commands and missing credentials
    /// - `Timeout` / `Cancelled` after the process has been killed
    /// - `Execution` for connection and process I/O failures
    pub async fn run(
        &self,
        target: &str,
        command: &str,
        timeout: Duration,
        workdir: Option<&str>,
        sink: Option<&JobLogger>,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, JobError> {
        validate_command(command)?;
        if cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let credentials = self
            .credentials
            .credentials(target)
            .await
            .map_err(transport_error)?;
        let mut session = self
            .transport
            .open_session(target, &credentials)
            .await
            .map_err(transport_error)?;

        tracing::info!(
            target,
            command,
            timeout_secs = timeout.as_secs_f64(),
            "running remote command"
        );
        let process = match session.spawn(command, workdir).await {
            Ok(process) => process,
            Err(e) => {
                close_session(session, target).await;
                return Err(transport_error(e));
            }
        };
        let RemoteProcess {
            stdout,
            stderr,
            mut control,
        } = process;

        let finish = {
            let collect = async {
                let (out, err) = tokio::try_join!(
                    pump(stdout, LogLevel::Info, sink, self.output_cap),
                    pump(stderr, LogLevel::Warn, sink, self.output_cap),
                )?;
                let code = control.wait().await?;
                Ok::<_, TransportError>((out, err, code))
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Finish::Cancelled,
                r = tokio::time::timeout(timeout, collect) => match r {
                    Ok(r) => Finish::Exited(r),
                    Err(_) => Finish::TimedOut,
                },
            }
        };

        let result = match finish {
            Finish::Exited(Ok((out, err, exit_code))) => {
                let success = exit_code == Some(0);
                tracing::info!(target, ?exit_code, success, "remote command finished");
                Ok(CommandOutput {
                    stdout: out.text,
                    stderr: err.text,
                    exit_code,
                    success,
                    truncated: out.truncated || err.truncated,
                })
            }
            Finish::Exited(Err(e)) => {
                kill(control.as_mut(), target).await;
                Err(JobError::execution(format!("command I/O failed: {e}")))
            }
            Finish::TimedOut => {
                tracing::warn!(target, command, "remote command timed out");
                if let Some(sink) = sink {
                    sink.error(format!("command timed out after {}s", timeout.as_secs_f64()));
                }
                kill(control.as_mut(), target).await;
                Err(JobError::Timeout { after: timeout })
            }
            Finish::Cancelled => {
                tracing::info!(target, command, "remote command cancelled");
                kill(control.as_mut(), target).await;
                Err(JobError::Cancelled)
            }
        };

        close_session(session, target).await;
        result
    }
}

async fn kill(control: &mut dyn ProcessControl, target: &str) {
    if let Err(e) = control.kill().await {
        tracing::warn!(target, error = %e, "failed to kill remote process");
    }
}

async fn close_session(session: Box<dyn RemoteSession>, target: &str) {
    if let Err(e) = session.close().await {
        tracing::debug!(target, error = %e, "session close failed");
    }
}

fn transport_error(err: TransportError) -> JobError {
    match err {
        TransportError::MissingCredentials(target) => ValidationError::MissingPrecondition(
            format!("no credentials for target '{target}'"),
        )
        .into(),
        other => JobError::execution(other.to_string()),
    }
}

#[derive(Debug, Default)]
struct Captured {
    text: String,
    truncated: bool,
}

/// Capped accumulator for one output stream.
struct OutputBuffer {
    text: String,
    cap: usize,
    truncated: bool,
}

impl OutputBuffer {
    fn new(cap: usize) -> Self {
        Self {
            text: String::new(),
            cap,
            truncated: false,
        }
    }

    fn push(&mut self, chunk: &str) {
        if self.truncated {
            return;
        }
        let room = self.cap - self.text.len();
        if chunk.len() <= room {
            self.text.push_str(chunk);
            return;
        }
        let mut end = room;
        while !chunk.is_char_boundary(end) {
            end -= 1;
        }
        self.text.push_str(&chunk[..end]);
        self.truncated = true;
    }

    /// Drop the final line terminator, then append the truncation note.
    fn finish(mut self) -> Captured {
        if self.text.ends_with('\n') {
            self.text.pop();
            if self.text.ends_with('\r') {
                self.text.pop();
            }
        }
        if self.truncated {
            self.text
                .push_str(&format!("\n[output truncated after {} bytes]", self.cap));
        }
        Captured {
            text: self.text,
            truncated: self.truncated,
        }
    }
}

/// Read `stream` line by line until EOF, forwarding each line to `sink`.
async fn pump(
    stream: OutputStream,
    level: LogLevel,
    sink: Option<&JobLogger>,
    cap: usize,
) -> std::io::Result<Captured> {
    let mut reader = BufReader::new(stream);
    let mut buffer = OutputBuffer::new(cap);
    let mut raw = Vec::new();
    loop {
        raw.clear();
        if reader.read_until(b'\n', &mut raw).await? == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&raw);
        buffer.push(&line);
        let line = line.trim_end_matches(['\n', '\r']);
        match sink {
            Some(sink) => sink.log(level, line),
            None => tracing::debug!(%level, "{line}"),
        }
    }
    Ok(buffer.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::LogCapture;
    use crate::domain::JobId;
    use crate::impls::{LocalTransport, StaticCredentials};
    use crate::ports::Credentials;
    use std::time::Instant;

    fn executor() -> RemoteExecutor {
        RemoteExecutor::new(
            Arc::new(LocalTransport::new()),
            Arc::new(StaticCredentials::new().with_default(Credentials::default())),
        )
    }

    async fn run(
        executor: &RemoteExecutor,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, JobError> {
        executor
            .run("local", command, timeout, None, None, &CancellationToken::new())
            .await
    }

    /// Poll `pgrep -f pattern` until no process matches; SIGKILL delivery is not instant.
    async fn assert_nothing_left(pattern: &str) {
        let mut found = String::new();
        for _ in 0..50 {
            let output = std::process::Command::new("pgrep")
                .args(["-f", pattern])
                .output()
                .unwrap();
            found = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if found.is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(40)).await;
        }
        panic!("processes matching {pattern} survived: {found}");
    }

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let output = run(&executor(), "echo hello", Duration::from_secs(5)).await.unwrap();
        assert_eq!(output.stdout, "hello");
        assert_eq!(output.exit_code, Some(0));
        assert!(output.success);
        assert!(!output.truncated);
    }

    #[tokio::test]
    async fn non_zero_exit_is_reported_not_raised() {
        let output = run(&executor(), "echo oops >&2; exit 3", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(output.stderr, "oops");
        assert_eq!(output.exit_code, Some(3));
        assert!(!output.success);
    }

    #[tokio::test]
    async fn timeout_kills_the_process() {
        let started = Instant::now();
        let err = run(&executor(), "sleep 137; echo x", Duration::from_millis(300))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            JobError::Timeout {
                after: Duration::from_millis(300)
            }
        );
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_nothing_left("^sleep 137").await;
    }

    #[tokio::test]
    async fn cancellation_kills_the_process() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });
        let started = Instant::now();
        let err = executor()
            .run("local", "sleep 149; echo x", Duration::from_secs(60), None, None, &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, JobError::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_nothing_left("^sleep 149").await;
    }

    #[tokio::test]
    async fn output_is_capped_per_stream() {
        let output = executor()
            .with_output_cap(16)
            .run(
                "local",
                "yes abc | head -n 50",
                Duration::from_secs(5),
                None,
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(output.truncated);
        assert_eq!(
            output.stdout,
            "abc\nabc\nabc\nabc\n[output truncated after 16 bytes]"
        );
        assert!(output.success);
    }

    #[tokio::test]
    async fn rejected_command_never_reaches_transport() {
        let executor = RemoteExecutor::new(
            Arc::new(LocalTransport::new()),
            Arc::new(StaticCredentials::new()),
        );
        let err = run(&executor, "rm -rf /", Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(
            err,
            JobError::Validation(ValidationError::CommandRejected(_))
        ));
    }

    #[tokio::test]
    async fn missing_credentials_is_a_validation_error() {
        let executor = RemoteExecutor::new(
            Arc::new(LocalTransport::new()),
            Arc::new(StaticCredentials::new()),
        );
        let err = run(&executor, "echo hi", Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(
            err,
            JobError::Validation(ValidationError::MissingPrecondition(_))
        ));
    }

    #[tokio::test]
    async fn lines_stream_into_the_job_log() {
        let dir = tempfile::tempdir().unwrap();
        let capture = LogCapture::new(dir.path(), 10);
        let id = JobId::from_ulid(ulid::Ulid::new());
        let logger = capture.activate(id);

        executor()
            .run(
                "local",
                "echo out; echo err >&2",
                Duration::from_secs(5),
                None,
                Some(&logger),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let recent = capture.recent(id, 10);
        assert!(recent.iter().any(|e| e.message == "out" && e.level == LogLevel::Info));
        assert!(recent.iter().any(|e| e.message == "err" && e.level == LogLevel::Warn));
        capture.deactivate(id).await;
    }

    #[tokio::test]
    async fn workdir_is_honoured() {
        let dir = tempfile::tempdir().unwrap();
        let workdir = dir.path().to_str().unwrap();
        let output = executor()
            .run(
                "local",
                "pwd",
                Duration::from_secs(5),
                Some(workdir),
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        let name = dir.path().file_name().unwrap().to_str().unwrap();
        assert!(output.stdout.trim_end().ends_with(name));
    }

    #[test]
    fn buffer_truncates_on_char_boundary() {
        let mut buffer = OutputBuffer::new(5);
        buffer.push("ab");
        buffer.push("cdé!");
        let captured = buffer.finish();
        assert!(captured.truncated);
        assert_eq!(captured.text, "abcd\n[output truncated after 5 bytes]");
    }
}
