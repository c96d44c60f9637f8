//! LocalTransport - `sh -c` でローカル実行する Transport
//!
//! テストと `local` ターゲット用。プロセスは独自の process group で起動し、
//! kill 時は group ごと SIGKILL するので、`sh -c` の子プロセスも残りません。

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, Command};

use crate::ports::{
    Credentials, ProcessControl, RemoteProcess, RemoteSession, Transport, TransportError,
};

#[derive(Debug, Clone, Default)]
pub struct LocalTransport;

impl LocalTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn open_session(
        &self,
        target: &str,
        _credentials: &Credentials,
    ) -> Result<Box<dyn RemoteSession>, TransportError> {
        tracing::debug!(target, "opening local session");
        Ok(Box::new(LocalSession))
    }
}

struct LocalSession;

#[async_trait]
impl RemoteSession for LocalSession {
    async fn spawn(
        &mut self,
        command: &str,
        workdir: Option<&str>,
    ) -> Result<RemoteProcess, TransportError> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        if let Some(dir) = workdir {
            cmd.current_dir(dir);
        }
        spawn_child(cmd)
    }

    async fn close(self: Box<Self>) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Spawn `cmd` and split it into streams + control. Shared with the ssh transport.
pub(crate) fn spawn_child(mut cmd: Command) -> Result<RemoteProcess, TransportError> {
    let mut child = cmd
        .spawn()
        .map_err(|e| TransportError::Spawn(e.to_string()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| TransportError::Spawn("stdout not captured".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| TransportError::Spawn("stderr not captured".to_string()))?;
    Ok(RemoteProcess {
        stdout: Box::pin(stdout),
        stderr: Box::pin(stderr),
        control: Box::new(ChildControl { child }),
    })
}

struct ChildControl {
    child: Child,
}

impl ChildControl {
    /// SIGKILL the whole process group led by the child.
    #[cfg(unix)]
    async fn kill_group(&self) {
        let Some(pid) = self.child.id() else {
            return;
        };
        let status = Command::new("kill")
            .args(["-KILL", "--", &format!("-{pid}")])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if let Err(e) = status {
            tracing::warn!(pid, error = %e, "process group kill failed");
        }
    }

    #[cfg(not(unix))]
    async fn kill_group(&self) {}
}

#[async_trait]
impl ProcessControl for ChildControl {
    async fn wait(&mut self) -> Result<Option<i32>, TransportError> {
        let status = self.child.wait().await?;
        Ok(status.code())
    }

    async fn kill(&mut self) -> Result<(), TransportError> {
        self.kill_group().await;
        match self.child.kill().await {
            Ok(()) => Ok(()),
            // already exited and reaped
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
