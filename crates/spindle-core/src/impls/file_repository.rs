//! FileJobRepository - JSON ファイルによる永続化
//!
//! 書き込みは「tmp に完全な表現を書く → fsync → rename」で原子的に置き換えます。
//! ファイル I/O は blocking pool（spawn_blocking）で実行し、
//! クエリを処理する async ワーカーを占有しません。

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::JobRecord;
use crate::ports::{JobRepository, StoreError};

const FILE_NAME: &str = "jobs.json";
const FORMAT_VERSION: u32 = 1;

pub struct FileJobRepository {
    path: PathBuf,
}

#[derive(Serialize)]
struct JobsFileRef<'a> {
    version: u32,
    jobs: &'a [JobRecord],
}

#[derive(Deserialize)]
struct JobsFile {
    #[allow(dead_code)]
    version: u32,
    jobs: Vec<JobRecord>,
}

impl FileJobRepository {
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            path: state_dir.as_ref().join(FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)
}

#[async_trait]
impl JobRepository for FileJobRepository {
    async fn load_all(&self) -> Result<Vec<JobRecord>, StoreError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<JobRecord>, StoreError> {
            if !path.exists() {
                return Ok(Vec::new());
            }
            let bytes = fs::read(&path)?;
            let file: JobsFile = serde_json::from_slice(&bytes)?;
            Ok(file.jobs)
        })
        .await
        .map_err(|e| StoreError::Task(format!("load failed: {e}")))?
    }

    async fn save_all(&self, jobs: &[JobRecord]) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(&JobsFileRef {
            version: FORMAT_VERSION,
            jobs,
        })?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
            .await
            .map_err(|e| StoreError::Task(format!("save failed: {e}")))??;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobFailure, JobId, JobKind, JobParams, StepInfo};
    use chrono::Utc;
    use ulid::Ulid;

    fn job(kind: JobKind) -> JobRecord {
        let mut params = JobParams::new();
        params.insert("app".to_string(), serde_json::json!("n8n"));
        JobRecord::new(
            JobId::from_ulid(Ulid::new()),
            kind,
            params,
            Utc::now(),
            PathBuf::from("/var/log/spindle/x.log"),
        )
    }

    #[tokio::test]
    async fn missing_file_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileJobRepository::new(dir.path());
        assert!(repo.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_then_load_reproduces_every_field() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileJobRepository::new(dir.path().join("state"));

        let pending = job(JobKind::DeployApp);
        let mut completed = job(JobKind::RemoteExec);
        completed.mark_running(Utc::now()).unwrap();
        completed.advance_progress(50, Some(StepInfo::new(2, 3, Some("run".into()))));
        completed
            .mark_completed(serde_json::json!({"stdout": "hello"}), Utc::now())
            .unwrap();
        let mut failed = job(JobKind::ProvisionHost);
        failed.mark_running(Utc::now()).unwrap();
        failed
            .mark_failed(JobFailure::execution("boom"), Utc::now())
            .unwrap();

        let jobs = vec![pending, completed, failed];
        repo.save_all(&jobs).await.unwrap();
        let loaded = repo.load_all().await.unwrap();
        assert_eq!(loaded, jobs);
    }

    #[tokio::test]
    async fn save_replaces_without_leaving_tmp_file() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileJobRepository::new(dir.path());
        repo.save_all(&[job(JobKind::DeployApp)]).await.unwrap();
        repo.save_all(&[]).await.unwrap();

        assert!(repo.load_all().await.unwrap().is_empty());
        assert!(!repo.path().with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn corrupt_file_is_an_encoding_error() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileJobRepository::new(dir.path());
        fs::write(repo.path(), b"{ not json").unwrap();
        assert!(matches!(
            repo.load_all().await,
            Err(StoreError::Encoding(_))
        ));
    }
}
