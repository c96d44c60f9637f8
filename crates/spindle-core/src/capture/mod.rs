//! Progress & Log Capture.
//!
//! Per job: a bounded ring of recent entries (memory, for status queries)
//! plus an append-only artifact `<log_dir>/<job_id>.log`. Capture is
//! activated when a job starts running and deactivated when it reaches a
//! terminal state. The ring outlives deactivation until the job is removed.

mod artifact;
mod ring;
mod sink;

pub use artifact::{ArtifactWriter, read_tail};
pub use ring::RingBuffer;
pub use sink::JobLogger;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use sink::{SharedRing, SinkInner};

use crate::domain::{JobId, LogEntry, LogLevel};

struct ActiveCapture {
    sink: Arc<SinkInner>,
    writer: ArtifactWriter,
}

pub struct LogCapture {
    dir: PathBuf,
    capacity: usize,
    rings: Mutex<HashMap<JobId, SharedRing>>,
    active: Mutex<HashMap<JobId, ActiveCapture>>,
}

impl LogCapture {
    pub fn new(dir: impl Into<PathBuf>, capacity: usize) -> Self {
        Self {
            dir: dir.into(),
            capacity,
            rings: Mutex::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn artifact_path(&self, job_id: JobId) -> PathBuf {
        self.dir.join(format!("{job_id}.log"))
    }

    fn ring(&self, job_id: JobId) -> SharedRing {
        let mut rings = self.rings.lock().unwrap_or_else(|e| e.into_inner());
        rings
            .entry(job_id)
            .or_insert_with(|| Arc::new(Mutex::new(RingBuffer::new(self.capacity))))
            .clone()
    }

    /// Start capturing for `job_id` and return its sink.
    ///
    /// Activating an already active job returns the existing sink.
    /// Must be called from within a tokio runtime (spawns the writer task).
    pub fn activate(&self, job_id: JobId) -> JobLogger {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = active.get(&job_id) {
            return JobLogger::new(job_id, existing.sink.clone());
        }
        let writer = ArtifactWriter::spawn(self.artifact_path(job_id));
        let sink = Arc::new(SinkInner {
            ring: self.ring(job_id),
            tx: Mutex::new(Some(writer.sender())),
        });
        active.insert(
            job_id,
            ActiveCapture {
                sink: sink.clone(),
                writer,
            },
        );
        JobLogger::new(job_id, sink)
    }

    /// The sink of an active job, if any.
    pub fn logger(&self, job_id: JobId) -> Option<JobLogger> {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active
            .get(&job_id)
            .map(|capture| JobLogger::new(job_id, capture.sink.clone()))
    }

    pub fn is_active(&self, job_id: JobId) -> bool {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active.contains_key(&job_id)
    }

    /// Stop capturing and wait until the artifact holds every line emitted so far.
    pub async fn deactivate(&self, job_id: JobId) {
        let capture = {
            let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            active.remove(&job_id)
        };
        if let Some(capture) = capture {
            capture.sink.detach();
            capture.writer.close().await;
        }
    }

    /// Memory-only read of the most recent entries, oldest first.
    pub fn recent(&self, job_id: JobId, limit: usize) -> Vec<LogEntry> {
        let ring = {
            let rings = self.rings.lock().unwrap_or_else(|e| e.into_inner());
            rings.get(&job_id).cloned()
        };
        ring.map(|ring| ring.lock().unwrap_or_else(|e| e.into_inner()).recent(limit))
            .unwrap_or_default()
    }

    /// Most recent `n` artifact entries at or above `min_level`.
    pub async fn tail_entries(
        &self,
        job_id: JobId,
        n: usize,
        min_level: Option<LogLevel>,
    ) -> std::io::Result<Vec<LogEntry>> {
        read_tail(&self.artifact_path(job_id), n, min_level).await
    }

    /// Same as [`tail_entries`](Self::tail_entries), rendered as artifact lines.
    pub async fn tail(
        &self,
        job_id: JobId,
        n: usize,
        min_level: Option<LogLevel>,
    ) -> std::io::Result<Vec<String>> {
        let entries = self.tail_entries(job_id, n, min_level).await?;
        Ok(entries.iter().map(LogEntry::to_line).collect())
    }

    /// Drop the in-memory ring and delete the artifact of a removed job.
    pub async fn forget(&self, job_id: JobId) -> std::io::Result<()> {
        self.deactivate(job_id).await;
        {
            let mut rings = self.rings.lock().unwrap_or_else(|e| e.into_inner());
            rings.remove(&job_id);
        }
        match tokio::fs::remove_file(self.artifact_path(job_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Delete artifacts last modified more than `max_age` ago.
    ///
    /// Independent of job retention; artifacts of active jobs are kept.
    pub async fn sweep(&self, max_age: Duration) -> std::io::Result<usize> {
        let active: HashSet<String> = {
            let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            active.keys().map(|id| format!("{id}.log")).collect()
        };
        let dir = self.dir.clone();
        let removed = tokio::task::spawn_blocking(move || sweep_dir(&dir, max_age, &active))
            .await
            .map_err(std::io::Error::other)??;
        if removed > 0 {
            tracing::info!(removed, dir = %self.dir.display(), "expired log artifacts removed");
        }
        Ok(removed)
    }
}

fn sweep_dir(dir: &Path, max_age: Duration, active: &HashSet<String>) -> std::io::Result<usize> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };
    let now = SystemTime::now();
    let mut removed = 0;
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.ends_with(".log") || active.contains(&name) {
            continue;
        }
        let modified = entry.metadata()?.modified()?;
        let age = now.duration_since(modified).unwrap_or_default();
        if age > max_age {
            std::fs::remove_file(entry.path())?;
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn job_id() -> JobId {
        JobId::from_ulid(Ulid::new())
    }

    #[tokio::test]
    async fn lines_are_visible_in_memory_immediately_and_on_disk_after_deactivate() {
        let dir = tempfile::tempdir().unwrap();
        let capture = LogCapture::new(dir.path(), 100);
        let id = job_id();

        let logger = capture.activate(id);
        logger.info("one");
        logger.warn("two");
        logger.error("three");

        let recent: Vec<_> = capture
            .recent(id, 10)
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert_eq!(recent, vec!["one", "two", "three"]);

        capture.deactivate(id).await;
        let tail: Vec<_> = capture
            .tail_entries(id, 10, None)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert_eq!(tail, vec!["one", "two", "three"]);
        assert!(!capture.is_active(id));
    }

    #[tokio::test]
    async fn ring_keeps_only_capacity_entries() {
        let dir = tempfile::tempdir().unwrap();
        let capture = LogCapture::new(dir.path(), 3);
        let id = job_id();
        let logger = capture.activate(id);
        for i in 0..10 {
            logger.info(format!("line {i}"));
        }
        let recent = capture.recent(id, 100);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].message, "line 7");

        capture.deactivate(id).await;
        assert_eq!(capture.tail_entries(id, 100, None).await.unwrap().len(), 10);
    }

    #[tokio::test]
    async fn lines_after_deactivate_stay_in_memory_only() {
        let dir = tempfile::tempdir().unwrap();
        let capture = LogCapture::new(dir.path(), 10);
        let id = job_id();
        let logger = capture.activate(id);
        logger.info("kept");
        capture.deactivate(id).await;
        logger.info("late");

        assert_eq!(capture.recent(id, 10).len(), 2);
        assert_eq!(capture.tail(id, 10, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn forget_removes_ring_and_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let capture = LogCapture::new(dir.path(), 10);
        let id = job_id();
        capture.activate(id).info("x");
        capture.deactivate(id).await;
        assert!(capture.artifact_path(id).exists());

        capture.forget(id).await.unwrap();
        assert!(!capture.artifact_path(id).exists());
        assert!(capture.recent(id, 10).is_empty());
    }

    #[tokio::test]
    async fn sweep_removes_old_artifacts_but_not_active_ones() {
        let dir = tempfile::tempdir().unwrap();
        let capture = LogCapture::new(dir.path(), 10);
        let done = job_id();
        let running = job_id();

        capture.activate(done).info("done");
        capture.deactivate(done).await;
        capture.activate(running).info("running");
        // give the writer a moment to create the file
        tokio::time::sleep(Duration::from_millis(50)).await;

        std::fs::write(dir.path().join("notes.txt"), "keep").unwrap();

        let removed = capture.sweep(Duration::ZERO).await.unwrap();
        assert_eq!(removed, 1);
        assert!(!capture.artifact_path(done).exists());
        assert!(capture.artifact_path(running).exists());
        assert!(dir.path().join("notes.txt").exists());

        let removed = capture.sweep(Duration::from_secs(3600)).await.unwrap();
        assert_eq!(removed, 0);
        capture.deactivate(running).await;
    }
}
