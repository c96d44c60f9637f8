//! JobLogger - the explicit per-job log sink handed to handlers.
//!
//! One call fans out to the ring buffer, the durable artifact and the
//! process-wide `tracing` output (tagged with `job_id`).

use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::mpsc;

use super::ring::RingBuffer;
use crate::domain::{JobId, LogEntry, LogLevel};

pub(crate) type SharedRing = Arc<Mutex<RingBuffer<LogEntry>>>;

pub(crate) struct SinkInner {
    pub(crate) ring: SharedRing,
    pub(crate) tx: Mutex<Option<mpsc::UnboundedSender<LogEntry>>>,
}

impl SinkInner {
    /// Detach from the durable writer; later lines stay in memory only.
    pub(crate) fn detach(&self) {
        self.tx.lock().unwrap_or_else(|e| e.into_inner()).take();
    }
}

#[derive(Clone)]
pub struct JobLogger {
    job_id: JobId,
    inner: Arc<SinkInner>,
}

impl JobLogger {
    pub(crate) fn new(job_id: JobId, inner: Arc<SinkInner>) -> Self {
        Self { job_id, inner }
    }

    /// A sink with its own ring and no artifact, for work outside the manager.
    pub fn detached(job_id: JobId, capacity: usize) -> Self {
        let inner = SinkInner {
            ring: Arc::new(Mutex::new(RingBuffer::new(capacity))),
            tx: Mutex::new(None),
        };
        Self::new(job_id, Arc::new(inner))
    }

    /// Lines still held in memory, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<LogEntry> {
        self.inner
            .ring
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .recent(limit)
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let entry = LogEntry::new(Utc::now(), level, message);
        emit_tracing(self.job_id, &entry);

        // ring push and channel send under one lock keep both in the same order
        let mut ring = self.inner.ring.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tx) = self
            .inner
            .tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
        {
            let _ = tx.send(entry.clone());
        }
        ring.push(entry);
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }
}

fn emit_tracing(job_id: JobId, entry: &LogEntry) {
    let message = entry.message.as_str();
    match entry.level {
        LogLevel::Debug => tracing::debug!(job_id = %job_id, "{message}"),
        LogLevel::Info => tracing::info!(job_id = %job_id, "{message}"),
        LogLevel::Warn => tracing::warn!(job_id = %job_id, "{message}"),
        LogLevel::Error => tracing::error!(job_id = %job_id, "{message}"),
    }
}
