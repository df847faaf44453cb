//! In-process job engine.
//!
//! Keeps every job in memory and moves it through the lifecycle either on
//! request (`transition`) or on a timer when built with `auto_advance`.
//! Used by the test suite and by `dirseed run` until a network engine is
//! plugged in.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

use crate::bitmap::SegmentBitmap;

use super::{
    ContentId, Descriptor, EngineError, JobEngine, JobHandle, JobId, JobSettings, JobState,
    StateChange,
};

/// Descriptor bytes covered by one segment.
const BYTES_PER_SEGMENT: usize = 64;
const MAX_SEGMENTS: usize = 4096;

#[derive(Serialize, Deserialize)]
struct ResumeBlob {
    segment_count: u32,
    completed: Vec<u8>,
    pending: Vec<u8>,
}

struct MemJob {
    handle: JobHandle,
    state: JobState,
    segment_count: usize,
    completed: SegmentBitmap,
    pending: SegmentBitmap,
    error: Option<String>,
    subscribers: Vec<UnboundedSender<StateChange>>,
    /// Bumped by every `start_job`; timers from an earlier run do nothing.
    run: u64,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    jobs: HashMap<JobId, MemJob>,
    registered: HashSet<JobId>,
    segment_counts: HashMap<ContentId, usize>,
    descriptors: HashMap<PathBuf, Vec<u8>>,
    rejected: HashSet<PathBuf>,
    unregistrable: HashSet<ContentId>,
}

impl Inner {
    fn job(&self, id: JobId) -> Result<&MemJob, EngineError> {
        self.jobs.get(&id).ok_or(EngineError::UnknownJob(id))
    }

    fn job_mut(&mut self, id: JobId) -> Result<&mut MemJob, EngineError> {
        self.jobs.get_mut(&id).ok_or(EngineError::UnknownJob(id))
    }

    fn set_state(&mut self, id: JobId, new: JobState) -> Result<(), EngineError> {
        let job = self.job_mut(id)?;
        let old = job.state;
        if old == new {
            return Ok(());
        }
        job.state = new;
        if new != JobState::Error {
            job.error = None;
        }
        let change = StateChange {
            job: job.handle.clone(),
            old,
            new,
        };
        job.subscribers.retain(|tx| tx.send(change.clone()).is_ok());
        Ok(())
    }
}

/// In-memory [`JobEngine`]. Cloning shares the same job table.
#[derive(Clone, Default)]
pub struct MemoryEngine {
    inner: Arc<Mutex<Inner>>,
    auto_advance: Option<Duration>,
}

impl MemoryEngine {
    /// Engine whose jobs only move when `transition` is called (after `start_job`
    /// has taken them to `Verifying`).
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine that finishes verification and transfer on its own, one step per `step`.
    pub fn with_auto_advance(step: Duration) -> Self {
        Self {
            inner: Arc::default(),
            auto_advance: Some(step),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Serve `bytes` for `path` instead of reading the file system.
    pub fn insert_descriptor(&self, path: impl Into<PathBuf>, bytes: impl Into<Vec<u8>>) {
        self.lock().descriptors.insert(path.into(), bytes.into());
    }

    /// Make `create_job` fail for descriptors loaded from `path`.
    pub fn reject(&self, path: impl Into<PathBuf>) {
        self.lock().rejected.insert(path.into());
    }

    /// Stop rejecting `path`.
    pub fn accept(&self, path: &Path) {
        self.lock().rejected.remove(path);
    }

    /// Make `register_job` fail for jobs serving `content`.
    pub fn refuse_registration(&self, content: ContentId) {
        self.lock().unregistrable.insert(content);
    }

    /// Jobs created and not yet discarded, registered or not.
    pub fn job_count(&self) -> usize {
        self.lock().jobs.len()
    }

    /// Force a lifecycle transition, notifying subscribers.
    pub fn transition(&self, job: &JobHandle, new: JobState) -> Result<(), EngineError> {
        let mut inner = self.lock();
        if new == JobState::Seeding {
            let j = inner.job_mut(job.id)?;
            j.completed = SegmentBitmap::full(j.segment_count);
            j.pending = SegmentBitmap::new(j.segment_count);
        }
        inner.set_state(job.id, new)
    }

    /// Put a job into `Error` with a message.
    pub fn fail(&self, job: &JobHandle, message: impl Into<String>) -> Result<(), EngineError> {
        let mut inner = self.lock();
        inner.set_state(job.id, JobState::Error)?;
        inner.job_mut(job.id)?.error = Some(message.into());
        Ok(())
    }

    pub fn registered_count(&self) -> usize {
        self.lock().registered.len()
    }

    /// Registered jobs currently in `state`.
    pub fn count_in_state(&self, state: JobState) -> usize {
        let inner = self.lock();
        inner
            .registered
            .iter()
            .filter_map(|id| inner.jobs.get(id))
            .filter(|j| j.state == state)
            .count()
    }

    /// Completed / pending bitmaps of a job, for inspection.
    pub fn bitmaps(&self, job: &JobHandle) -> Result<(SegmentBitmap, SegmentBitmap), EngineError> {
        let inner = self.lock();
        let j = inner.job(job.id)?;
        Ok((j.completed.clone(), j.pending.clone()))
    }

    fn read_descriptor(&self, path: &Path) -> Result<Vec<u8>, EngineError> {
        if let Some(bytes) = self.lock().descriptors.get(path) {
            return Ok(bytes.clone());
        }
        std::fs::read(path).map_err(|e| EngineError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    fn finish_verification(&self, id: JobId, run: u64) -> Result<(), EngineError> {
        let mut inner = self.lock();
        let job = inner.job_mut(id)?;
        if job.run != run || job.state != JobState::Verifying {
            return Ok(());
        }
        job.pending = SegmentBitmap::new(job.segment_count);
        let next = if job.completed.all_set(job.segment_count) {
            JobState::Seeding
        } else {
            JobState::Transferring
        };
        inner.set_state(id, next)
    }

    fn finish_transfer(&self, id: JobId, run: u64) -> Result<(), EngineError> {
        let mut inner = self.lock();
        let job = inner.job_mut(id)?;
        if job.run != run || job.state != JobState::Transferring {
            return Ok(());
        }
        job.completed = SegmentBitmap::full(job.segment_count);
        inner.set_state(id, JobState::Seeding)
    }

    fn spawn_auto_advance(&self, id: JobId, run: u64, step: Duration) {
        let engine = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(step).await;
            if let Err(e) = engine.finish_verification(id, run) {
                tracing::debug!(job = %id, "auto-advance stopped: {}", e);
                return;
            }
            tokio::time::sleep(step).await;
            if let Err(e) = engine.finish_transfer(id, run) {
                tracing::debug!(job = %id, "auto-advance stopped: {}", e);
            }
        });
    }
}

#[async_trait]
impl JobEngine for MemoryEngine {
    fn load_descriptor(&self, path: &Path) -> Result<Descriptor, EngineError> {
        let bytes = self.read_descriptor(path)?;
        if bytes.is_empty() {
            return Err(EngineError::Parse {
                path: path.to_path_buf(),
                reason: "empty descriptor".to_string(),
            });
        }
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&Sha256::digest(&bytes));
        let content_id = ContentId(digest);
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| content_id.to_hex());
        let segments = bytes.len().div_ceil(BYTES_PER_SEGMENT).clamp(1, MAX_SEGMENTS);
        self.lock().segment_counts.insert(content_id, segments);
        Ok(Descriptor {
            path: path.to_path_buf(),
            content_id,
            name,
        })
    }

    fn contains(&self, descriptor: &Descriptor) -> bool {
        let inner = self.lock();
        inner
            .registered
            .iter()
            .filter_map(|id| inner.jobs.get(id))
            .any(|j| j.handle.content_id == descriptor.content_id)
    }

    fn create_job(
        &self,
        descriptor: &Descriptor,
        working_dir: &Path,
        settings: &JobSettings,
    ) -> Result<JobHandle, EngineError> {
        let mut inner = self.lock();
        if inner.rejected.contains(&descriptor.path) {
            return Err(EngineError::Rejected(format!(
                "{} is rejected",
                descriptor.path.display()
            )));
        }
        let segment_count = inner
            .segment_counts
            .get(&descriptor.content_id)
            .copied()
            .unwrap_or(1);
        inner.next_id += 1;
        let handle = JobHandle {
            id: JobId(inner.next_id),
            content_id: descriptor.content_id,
            name: descriptor.name.clone(),
        };
        tracing::trace!(
            job = %handle,
            dir = %working_dir.display(),
            port = settings.listen_port,
            "created in-memory job"
        );
        inner.jobs.insert(
            handle.id,
            MemJob {
                handle: handle.clone(),
                state: JobState::Idle,
                segment_count,
                completed: SegmentBitmap::new(segment_count),
                pending: SegmentBitmap::new(segment_count),
                error: None,
                subscribers: Vec::new(),
                run: 0,
            },
        );
        Ok(handle)
    }

    fn register_job(&self, job: &JobHandle) -> Result<(), EngineError> {
        let mut inner = self.lock();
        inner.job(job.id)?;
        if inner.unregistrable.contains(&job.content_id) {
            return Err(EngineError::RegistrationRefused(job.to_string()));
        }
        inner.registered.insert(job.id);
        Ok(())
    }

    fn unregister_job(&self, job: &JobHandle) -> Result<(), EngineError> {
        let mut inner = self.lock();
        let state = inner.job(job.id)?.state;
        if state != JobState::Idle {
            return Err(EngineError::InvalidState {
                job: job.id,
                state,
                op: "unregister",
            });
        }
        inner.registered.remove(&job.id);
        inner.jobs.remove(&job.id);
        Ok(())
    }

    async fn start_job(&self, job: &JobHandle) -> Result<(), EngineError> {
        let run = {
            let mut inner = self.lock();
            let state = inner.job(job.id)?.state;
            if state != JobState::Idle {
                return Err(EngineError::InvalidState {
                    job: job.id,
                    state,
                    op: "start",
                });
            }
            inner.set_state(job.id, JobState::Starting)?;
            inner.set_state(job.id, JobState::Verifying)?;
            let j = inner.job_mut(job.id)?;
            j.run += 1;
            j.run
        };
        if let Some(step) = self.auto_advance {
            self.spawn_auto_advance(job.id, run, step);
        }
        Ok(())
    }

    async fn stop_job(&self, job: &JobHandle) -> Result<(), EngineError> {
        self.lock().set_state(job.id, JobState::Idle)
    }

    fn subscribe(&self, job: &JobHandle, tx: UnboundedSender<StateChange>) {
        if let Some(j) = self.lock().jobs.get_mut(&job.id) {
            j.subscribers.push(tx);
        }
    }

    fn job_state(&self, job: &JobHandle) -> Result<JobState, EngineError> {
        Ok(self.lock().job(job.id)?.state)
    }

    fn job_progress(&self, job: &JobHandle) -> Result<f64, EngineError> {
        let inner = self.lock();
        let j = inner.job(job.id)?;
        if j.segment_count == 0 {
            return Ok(1.0);
        }
        Ok(j.completed.count_set(j.segment_count) as f64 / j.segment_count as f64)
    }

    fn job_error(&self, job: &JobHandle) -> Result<Option<String>, EngineError> {
        Ok(self.lock().job(job.id)?.error.clone())
    }

    fn save_resume_blob(&self, job: &JobHandle) -> Result<Vec<u8>, EngineError> {
        let inner = self.lock();
        let j = inner.job(job.id)?;
        let blob = ResumeBlob {
            segment_count: j.segment_count as u32,
            completed: j.completed.to_bytes(j.segment_count),
            pending: j.pending.to_bytes(j.segment_count),
        };
        bincode::serialize(&blob).map_err(|e| EngineError::ResumeData {
            job: job.id,
            reason: e.to_string(),
        })
    }

    fn load_resume_blob(&self, job: &JobHandle, blob: &[u8]) -> Result<(), EngineError> {
        let decoded: ResumeBlob =
            bincode::deserialize(blob).map_err(|e| EngineError::ResumeData {
                job: job.id,
                reason: e.to_string(),
            })?;
        let mut inner = self.lock();
        let j = inner.job_mut(job.id)?;
        if decoded.segment_count as usize != j.segment_count {
            return Err(EngineError::ResumeData {
                job: job.id,
                reason: format!(
                    "segment count {} does not match descriptor ({})",
                    decoded.segment_count, j.segment_count
                ),
            });
        }
        j.completed = SegmentBitmap::from_bytes(&decoded.completed, j.segment_count);
        j.pending = SegmentBitmap::from_bytes(&decoded.pending, j.segment_count);
        Ok(())
    }

    fn segment_count(&self, job: &JobHandle) -> Result<usize, EngineError> {
        Ok(self.lock().job(job.id)?.segment_count)
    }

    fn set_completion_bitmap(
        &self,
        job: &JobHandle,
        completed: &SegmentBitmap,
        pending_verification: &SegmentBitmap,
    ) -> Result<(), EngineError> {
        let mut inner = self.lock();
        let j = inner.job_mut(job.id)?;
        let n = j.segment_count;
        j.completed = SegmentBitmap::from_bytes(&completed.to_bytes(n), n);
        j.pending = SegmentBitmap::from_bytes(&pending_verification.to_bytes(n), n);
        Ok(())
    }
}
