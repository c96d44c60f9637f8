//! Errors - エラー型と分類
//!
//! handler 由来のエラーは dispatch 境界で一度だけ捕捉され、
//! `JobFailure` として Job に記録されます。Manager プロセスを落とすことはありません。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use super::ids::JobId;
use super::kind::JobKind;

/// ErrorKind は実行エラーの分類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// unknown kind, bad params, missing precondition, rejected command
    Validation,
    /// a domain operation failed
    Execution,
    /// a bounded operation exceeded its allotment
    Timeout,
    /// dependency graph cycle
    Cycle,
    /// cooperative cancellation observed
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Execution => "execution",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cycle => "cycle",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("unknown job kind '{0}'")]
    UnknownKind(String),

    #[error("invalid params for {kind}: {reason}")]
    InvalidParams { kind: JobKind, reason: String },

    #[error("precondition not met: {0}")]
    MissingPrecondition(String),

    #[error("command rejected: {0}")]
    CommandRejected(String),

    #[error("job manager is shutting down")]
    ShuttingDown,
}

/// Dependency cycle; `cycle` starts and ends with the same name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("dependency cycle detected: {}", .cycle.join(" -> "))]
pub struct CycleError {
    pub cycle: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    Execution(String),

    #[error("operation timed out after {}s", .after.as_secs_f64())]
    Timeout { after: Duration },

    #[error(transparent)]
    Cycle(#[from] CycleError),

    #[error("job was cancelled")]
    Cancelled,

    #[error("job {0} not found")]
    NotFound(JobId),
}

impl JobError {
    pub fn execution(message: impl Into<String>) -> Self {
        JobError::Execution(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            JobError::Validation(_) | JobError::NotFound(_) => ErrorKind::Validation,
            JobError::Execution(_) => ErrorKind::Execution,
            JobError::Timeout { .. } => ErrorKind::Timeout,
            JobError::Cycle(_) => ErrorKind::Cycle,
            JobError::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, JobError::Cancelled)
    }
}

/// The error recorded on a Failed job.
///
/// `message` is never empty; constructors substitute a kind-derived text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl JobFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        let message = if message.trim().is_empty() {
            format!("{kind} error")
        } else {
            message
        };
        Self { kind, message }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Execution, message)
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<&JobError> for JobFailure {
    fn from(err: &JobError) -> Self {
        JobFailure::new(err.kind(), err.to_string())
    }
}

impl From<JobError> for JobFailure {
    fn from(err: JobError) -> Self {
        JobFailure::from(&err)
    }
}
