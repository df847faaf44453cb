//! Error type for resume-index I/O.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ResumeStoreError {
    #[error("read resume index {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("write resume index {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The file exists but is not a resume index we understand.
    #[error("malformed resume index {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },
    #[error("encode resume index {path}: {reason}")]
    Encode { path: PathBuf, reason: String },
}
