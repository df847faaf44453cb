//! Per-job failures inside a tick. Each is logged and isolated to its job.

use crate::engine::{ContentId, EngineError};

#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("load descriptor: {0}")]
    Descriptor(#[source] EngineError),
    /// Another registered job already serves the same content.
    #[error("content {0} is already registered")]
    Duplicate(ContentId),
    #[error("create job: {0}")]
    Create(#[source] EngineError),
    #[error("register job: {0}")]
    Register(#[source] EngineError),
}

#[derive(Debug, thiserror::Error)]
pub enum EvictionError {
    #[error("query job state: {0}")]
    State(#[source] EngineError),
    #[error("stop job: {0}")]
    Stop(#[source] EngineError),
    #[error("unregister job: {0}")]
    Unregister(#[source] EngineError),
}
