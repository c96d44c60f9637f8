//! Domain model (IDs, kinds, job records, outcomes, errors, log entries).

pub mod errors;
pub mod ids;
pub mod job;
pub mod kind;
pub mod log;
pub mod outcome;

pub use errors::{CycleError, ErrorKind, JobError, JobFailure, ValidationError};
pub use ids::JobId;
pub use job::{
    JobParams, JobRecord, JobStatus, JobSummary, JobView, ParseStatusError, StepInfo,
    TransitionError,
};
pub use kind::JobKind;
pub use log::{LogEntry, LogLevel, ParseLevelError};
pub use outcome::Outcome;
