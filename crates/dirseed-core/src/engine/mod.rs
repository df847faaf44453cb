//! Job engine capability surface.
//!
//! The transfer protocol itself (peer discovery, piece exchange, hashing,
//! descriptor parsing) lives behind [`JobEngine`]. The reconciler only
//! drives job lifecycles through this trait and observes transitions via
//! [`StateChange`] notifications.

mod error;
pub mod memory;
mod types;

use async_trait::async_trait;
use std::path::Path;
use tokio::sync::mpsc::UnboundedSender;

use crate::bitmap::SegmentBitmap;

pub use error::EngineError;
pub use memory::MemoryEngine;
pub use types::{
    ContentId, Descriptor, JobHandle, JobId, JobSettings, JobState, ParseContentIdError,
    StateChange,
};

/// Operations the reconciler needs from a job engine.
///
/// `start_job` / `stop_job` are suspension points: the future resolves
/// once the engine has accepted the request.
#[async_trait]
pub trait JobEngine: Send + Sync {
    fn load_descriptor(&self, path: &Path) -> Result<Descriptor, EngineError>;

    /// True if a job for the same content is already registered.
    fn contains(&self, descriptor: &Descriptor) -> bool;

    fn create_job(
        &self,
        descriptor: &Descriptor,
        working_dir: &Path,
        settings: &JobSettings,
    ) -> Result<JobHandle, EngineError>;

    fn register_job(&self, job: &JobHandle) -> Result<(), EngineError>;

    /// Drop an idle job. Also discards one that was created but never
    /// registered.
    fn unregister_job(&self, job: &JobHandle) -> Result<(), EngineError>;

    async fn start_job(&self, job: &JobHandle) -> Result<(), EngineError>;

    async fn stop_job(&self, job: &JobHandle) -> Result<(), EngineError>;

    /// Deliver every later transition of `job` to `tx`.
    fn subscribe(&self, job: &JobHandle, tx: UnboundedSender<StateChange>);

    fn job_state(&self, job: &JobHandle) -> Result<JobState, EngineError>;

    /// Fraction complete in [0.0, 1.0].
    fn job_progress(&self, job: &JobHandle) -> Result<f64, EngineError>;

    fn job_error(&self, job: &JobHandle) -> Result<Option<String>, EngineError>;

    fn save_resume_blob(&self, job: &JobHandle) -> Result<Vec<u8>, EngineError>;

    fn load_resume_blob(&self, job: &JobHandle, blob: &[u8]) -> Result<(), EngineError>;

    fn segment_count(&self, job: &JobHandle) -> Result<usize, EngineError>;

    fn set_completion_bitmap(
        &self,
        job: &JobHandle,
        completed: &SegmentBitmap,
        pending_verification: &SegmentBitmap,
    ) -> Result<(), EngineError>;
}
