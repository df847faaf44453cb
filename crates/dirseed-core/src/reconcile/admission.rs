//! Tick phase 1: admit newly discovered descriptors.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Instant;

use crate::bootstrap;
use crate::engine::JobHandle;
use crate::resume_store::ResumeLookup;
use crate::scanner::{sort_newest_first, DiscoveredDescriptor};

use super::{AdmissionError, Reconciler, Registered, TickReport, TickState};

impl Reconciler {
    /// Admit up to `load_limit` unregistered, non-blocked descriptors, newest first.
    pub(super) fn admit(
        &self,
        state: &mut TickState,
        discovered: &[DiscoveredDescriptor],
        snapshot: &HashSet<PathBuf>,
        now: Instant,
        report: &mut TickReport,
    ) {
        let mut candidates: Vec<DiscoveredDescriptor> = discovered
            .iter()
            .filter(|d| !snapshot.contains(&d.path))
            .filter(|d| !state.failed.is_blocked(&d.path, d.modified, now))
            .cloned()
            .collect();
        sort_newest_first(&mut candidates);

        let limit = self.inner.options.load_limit;
        report.deferred = candidates.len().saturating_sub(limit);

        for candidate in candidates.into_iter().take(limit) {
            match self.admit_one(&candidate) {
                Ok(handle) => {
                    tracing::info!(path = %candidate.path.display(), job = %handle, "admitted");
                    state.failed.clear(&candidate.path);
                    state.registered.insert(
                        candidate.path,
                        Registered {
                            handle,
                            created: candidate.created,
                            stop_requested: false,
                        },
                    );
                    state.prune_pending = true;
                    report.admitted += 1;
                }
                Err(e) => {
                    tracing::warn!(path = %candidate.path.display(), "admission failed: {}", e);
                    state
                        .failed
                        .record(&candidate.path, candidate.modified, now);
                    report.failed += 1;
                }
            }
        }
    }

    /// Load, create, observe, restore resume state (or bootstrap), register.
    fn admit_one(&self, candidate: &DiscoveredDescriptor) -> Result<JobHandle, AdmissionError> {
        let engine = self.inner.engine.as_ref();
        let options = &self.inner.options;

        let descriptor = engine
            .load_descriptor(&candidate.path)
            .map_err(AdmissionError::Descriptor)?;
        if engine.contains(&descriptor) {
            return Err(AdmissionError::Duplicate(descriptor.content_id));
        }
        let job = engine
            .create_job(&descriptor, &options.working_dir, &options.job_settings)
            .map_err(AdmissionError::Create)?;
        engine.subscribe(&job, self.inner.events.clone());

        let lookup = self.inner.store.lookup(&options.store_path, &job.content_id);
        if let ResumeLookup::Found(blob) = &lookup {
            match engine.load_resume_blob(&job, blob) {
                Ok(()) => tracing::debug!(job = %job, "resume data restored"),
                Err(e) => tracing::warn!(job = %job, "resume data rejected; will re-verify: {}", e),
            }
        }
        if bootstrap::should_bootstrap(options.skip_verification, &lookup) {
            if let Err(e) = bootstrap::apply_skip_verification(engine, &job) {
                tracing::warn!(job = %job, "skip-verification failed: {}", e);
            }
        }

        if let Err(e) = engine.register_job(&job) {
            if let Err(discard) = engine.unregister_job(&job) {
                tracing::warn!(job = %job, "could not discard unregistered job: {}", discard);
            }
            return Err(AdmissionError::Register(e));
        }
        Ok(job)
    }
}
