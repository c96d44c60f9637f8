//! Transport port - リモートホストへのセッション
//!
//! Remote Command Executor は `open_session` → `spawn` → stdout/stderr を
//! 行単位で読み、`ProcessControl` で wait / kill します。
//!
//! # 実装
//! - **LocalTransport**: `sh -c`（テスト・`local` ターゲット用）
//! - **SshTransport**: システムの `ssh` バイナリ

use std::path::PathBuf;
use std::pin::Pin;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncRead;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no credentials for target '{0}'")]
    MissingCredentials(String),

    #[error("failed to open session to '{target}': {reason}")]
    Connect { target: String, reason: String },

    #[error("failed to spawn command: {0}")]
    Spawn(String),

    #[error("process I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Previously provisioned access material for one target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub key_path: Option<PathBuf>,
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn credentials(&self, target: &str) -> Result<Credentials, TransportError>;
}

pub type OutputStream = Pin<Box<dyn AsyncRead + Send + Unpin>>;

/// A started remote process: its two output streams and a control handle.
pub struct RemoteProcess {
    pub stdout: OutputStream,
    pub stderr: OutputStream,
    pub control: Box<dyn ProcessControl>,
}

#[async_trait]
pub trait ProcessControl: Send {
    /// Wait for exit; `None` when the process was killed by a signal.
    async fn wait(&mut self) -> Result<Option<i32>, TransportError>;

    /// Forcibly terminate the process (and its children) and reap it.
    async fn kill(&mut self) -> Result<(), TransportError>;
}

#[async_trait]
pub trait RemoteSession: Send {
    async fn spawn(
        &mut self,
        command: &str,
        workdir: Option<&str>,
    ) -> Result<RemoteProcess, TransportError>;

    async fn close(self: Box<Self>) -> Result<(), TransportError>;
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn open_session(
        &self,
        target: &str,
        credentials: &Credentials,
    ) -> Result<Box<dyn RemoteSession>, TransportError>;
}
