//! Errors reported by a job engine.

use std::path::PathBuf;

use super::types::{JobId, JobState};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The descriptor file could not be read or parsed.
    #[error("cannot parse descriptor {path}: {reason}")]
    Parse { path: PathBuf, reason: String },
    /// The engine refused to create a job for the descriptor.
    #[error("job creation rejected: {0}")]
    Rejected(String),
    /// The engine would not add the job to its session.
    #[error("registration refused: {0}")]
    RegistrationRefused(String),
    #[error("unknown job {0}")]
    UnknownJob(JobId),
    /// Operation not allowed in the job's current state.
    #[error("job {job} is {state}; cannot {op}")]
    InvalidState {
        job: JobId,
        state: JobState,
        op: &'static str,
    },
    /// A resume blob handed to the engine could not be applied.
    #[error("bad resume data for job {job}: {reason}")]
    ResumeData { job: JobId, reason: String },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
