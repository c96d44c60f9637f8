//! Append-only durable log artifact, one file per job.
//!
//! Entries are handed to a dedicated writer task over a channel and flushed
//! one by one, so a crash loses at most what is still in the channel.

use std::path::{Path, PathBuf};

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::domain::{LogEntry, LogLevel};

pub struct ArtifactWriter {
    tx: mpsc::UnboundedSender<LogEntry>,
    task: JoinHandle<()>,
}

impl ArtifactWriter {
    /// Spawn the writer task for `path` (created or appended to).
    pub fn spawn(path: PathBuf) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(write_loop(path, rx));
        Self { tx, task }
    }

    pub fn sender(&self) -> mpsc::UnboundedSender<LogEntry> {
        self.tx.clone()
    }

    /// Stop accepting entries and wait until everything queued is on disk.
    ///
    /// Every other sender clone must be dropped first or this waits for them.
    pub async fn close(self) {
        drop(self.tx);
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "log artifact writer task failed");
        }
    }
}

async fn write_loop(path: PathBuf, mut rx: mpsc::UnboundedReceiver<LogEntry>) {
    if let Some(parent) = path.parent()
        && let Err(e) = tokio::fs::create_dir_all(parent).await
    {
        tracing::error!(path = %path.display(), error = %e, "cannot create log directory");
    }
    let mut file = match OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await
    {
        Ok(file) => Some(file),
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "cannot open log artifact; lines stay in memory only");
            None
        }
    };

    while let Some(entry) = rx.recv().await {
        let Some(f) = file.as_mut() else {
            continue;
        };
        let mut line = entry.to_line();
        line.push('\n');
        let written = async {
            f.write_all(line.as_bytes()).await?;
            f.flush().await
        }
        .await;
        if let Err(e) = written {
            tracing::error!(path = %path.display(), error = %e, "log artifact write failed");
            file = None;
        }
    }

    if let Some(mut f) = file
        && let Err(e) = f.sync_all().await
    {
        tracing::warn!(path = %path.display(), error = %e, "log artifact sync failed");
    }
}

/// Read the most recent `n` entries at or above `min_level`.
///
/// Runs on the blocking pool; a missing artifact reads as empty.
pub async fn read_tail(
    path: &Path,
    n: usize,
    min_level: Option<LogLevel>,
) -> std::io::Result<Vec<LogEntry>> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let matching: Vec<LogEntry> = content
            .lines()
            .filter_map(LogEntry::parse_line)
            .filter(|entry| min_level.is_none_or(|min| entry.level >= min))
            .collect();
        let skip = matching.len().saturating_sub(n);
        Ok(matching.into_iter().skip(skip).collect())
    })
    .await
    .map_err(std::io::Error::other)?
}
