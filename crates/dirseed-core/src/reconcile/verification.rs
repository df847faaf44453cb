//! Tick phase 3: start verification for idle jobs within the hashing limit.

use std::cmp::Reverse;
use std::collections::HashSet;
use std::path::PathBuf;

use crate::engine::{JobHandle, JobState};

use super::{Reconciler, TickReport, TickState};

impl Reconciler {
    pub(super) async fn start_verification(
        &self,
        state: &TickState,
        discovered: &HashSet<PathBuf>,
        report: &mut TickReport,
    ) {
        let engine = self.inner.engine.as_ref();
        let mut busy = 0usize;
        let mut idle = Vec::new();
        for (path, entry) in &state.registered {
            match engine.job_state(&entry.handle) {
                Ok(s) if s.holds_hashing_slot() => busy += 1,
                Ok(JobState::Idle) if discovered.contains(path) && !entry.stop_requested => {
                    idle.push((entry.created, path, &entry.handle));
                }
                Ok(_) => {}
                Err(e) => tracing::debug!(path = %path.display(), "state unavailable: {}", e),
            }
        }
        report.hashing = busy;

        let free = self.inner.options.hashing_limit.saturating_sub(busy);
        if free == 0 || idle.is_empty() {
            return;
        }
        idle.sort_by(|a, b| Reverse(a.0).cmp(&Reverse(b.0)).then_with(|| a.1.cmp(b.1)));

        let mut started = 0usize;
        for (_, path, handle) in idle {
            if started == free {
                break;
            }
            if self.start_one(handle).await {
                tracing::debug!(path = %path.display(), job = %handle, "verification started");
                started += 1;
            }
        }
        report.started = started;
    }

    async fn start_one(&self, job: &JobHandle) -> bool {
        match self.inner.engine.start_job(job).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(job = %job, "start failed: {}", e);
                false
            }
        }
    }
}
