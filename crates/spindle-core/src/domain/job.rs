//! Job record and status management.
//!
//! Design: single source of truth for a job's lifecycle.
//! - State transitions via methods (not direct field access)
//! - Status is forward-only and terminal once Completed/Failed/Cancelled
//! - Progress never decreases
//! - `result` and `error` are mutually exclusive by construction

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::JobFailure;
use super::ids::JobId;
use super::kind::JobKind;
use super::log::LogEntry;

/// Opaque, handler-specific parameters. Immutable after creation.
pub type JobParams = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether `self -> next` is a permitted edge.
    ///
    /// Pending -> Running | Cancelled
    /// Running -> Completed | Failed | Cancelled
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Pending, JobStatus::Cancelled)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Cancelled)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown job status '{0}'")]
pub struct ParseStatusError(pub String);

impl std::str::FromStr for JobStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" | "canceled" => Ok(JobStatus::Cancelled),
            _ => Err(ParseStatusError(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid transition {from} -> {to}")]
pub struct TransitionError {
    pub from: JobStatus,
    pub to: JobStatus,
}

/// Optional step reporting: `current` is 1-based, `current <= total`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepInfo {
    pub total: u32,
    pub current: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl StepInfo {
    pub fn new(current: u32, total: u32, label: Option<String>) -> Self {
        let total = total.max(1);
        Self {
            total,
            current: current.clamp(1, total),
            label,
        }
    }

    /// Discrete step-only progress: the share of steps already finished.
    pub fn progress(&self) -> u8 {
        let done = self.current.saturating_sub(1) as u64;
        ((done * 100) / self.total as u64).min(100) as u8
    }
}

/// The persisted unit of trackable work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub kind: JobKind,
    pub params: JobParams,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<StepInfo>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobFailure>,
    pub log_ref: PathBuf,
}

impl JobRecord {
    pub fn new(
        id: JobId,
        kind: JobKind,
        params: JobParams,
        created_at: DateTime<Utc>,
        log_ref: PathBuf,
    ) -> Self {
        Self {
            id,
            kind,
            params,
            status: JobStatus::Pending,
            progress: 0,
            step: None,
            created_at,
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            log_ref,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn transition(&mut self, to: JobStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(to) {
            return Err(TransitionError {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// Pending -> Running; sets `started_at` once.
    pub fn mark_running(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(JobStatus::Running)?;
        self.started_at.get_or_insert(now);
        Ok(())
    }

    /// Running -> Completed; progress jumps to 100.
    pub fn mark_completed(
        &mut self,
        result: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.transition(JobStatus::Completed)?;
        self.result = Some(result);
        self.error = None;
        self.progress = 100;
        self.completed_at.get_or_insert(now);
        Ok(())
    }

    /// Running -> Failed.
    pub fn mark_failed(
        &mut self,
        failure: JobFailure,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.transition(JobStatus::Failed)?;
        self.error = Some(failure);
        self.result = None;
        self.completed_at.get_or_insert(now);
        Ok(())
    }

    /// Pending | Running -> Cancelled.
    pub fn mark_cancelled(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(JobStatus::Cancelled)?;
        self.completed_at.get_or_insert(now);
        Ok(())
    }

    /// Raise progress; lower values are ignored and values above 100 clamp.
    ///
    /// Returns whether anything changed. Ignored once terminal.
    pub fn advance_progress(&mut self, percent: u8, step: Option<StepInfo>) -> bool {
        if self.is_terminal() {
            return false;
        }
        let mut changed = false;
        let percent = percent.min(100);
        if percent > self.progress {
            self.progress = percent;
            changed = true;
        }
        if let Some(step) = step
            && self.step.as_ref() != Some(&step)
        {
            self.step = Some(step);
            changed = true;
        }
        changed
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id,
            kind: self.kind,
            status: self.status,
            progress: self.progress,
            created_at: self.created_at,
            completed_at: self.completed_at,
        }
    }

    pub fn view(&self, recent_logs: Vec<LogEntry>) -> JobView {
        JobView {
            id: self.id,
            kind: self.kind,
            status: self.status,
            progress: self.progress,
            step: self.step.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            result: self.result.clone(),
            error: self.error.clone(),
            recent_logs,
        }
    }
}

/// `GET jobs` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: JobId,
    pub kind: JobKind,
    pub status: JobStatus,
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// `GET job` response: status, progress, step, result|error, recent logs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobView {
    pub id: JobId,
    pub kind: JobKind,
    pub status: JobStatus,
    pub progress: u8,
    pub step: Option<StepInfo>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobFailure>,
    pub recent_logs: Vec<LogEntry>,
}
