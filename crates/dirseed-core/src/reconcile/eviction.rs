//! Tick phase 2: evict jobs whose descriptor is gone.

use std::collections::HashSet;
use std::path::PathBuf;

use crate::engine::JobState;

use super::{EvictionError, Reconciler, Registered, TickReport, TickState};

enum Eviction {
    Unregistered,
    StopRequested,
    /// Stop already requested; the job has not reported idle yet.
    Waiting,
}

impl Reconciler {
    pub(super) async fn evict(
        &self,
        state: &mut TickState,
        discovered: &HashSet<PathBuf>,
        snapshot: &HashSet<PathBuf>,
        report: &mut TickReport,
    ) {
        let mut gone: Vec<&PathBuf> = snapshot
            .iter()
            .filter(|p| !discovered.contains(*p))
            .collect();
        gone.sort();

        for path in gone {
            let Some(entry) = state.registered.get_mut(path) else {
                continue;
            };
            match self.evict_one(entry).await {
                Ok(Eviction::Unregistered) => {
                    tracing::info!(path = %path.display(), job = %entry.handle, "evicted");
                    state.registered.remove(path);
                    state.prune_pending = true;
                    report.evicted += 1;
                }
                Ok(Eviction::StopRequested) => {
                    tracing::info!(path = %path.display(), job = %entry.handle, "descriptor removed; stopping");
                    report.stop_requested += 1;
                }
                Ok(Eviction::Waiting) => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), "eviction failed; retrying next tick: {}", e)
                }
            }
        }
    }

    /// Idle jobs are unregistered now; others are asked to stop and left
    /// registered until a later tick sees them idle.
    async fn evict_one(&self, entry: &mut Registered) -> Result<Eviction, EvictionError> {
        let engine = self.inner.engine.as_ref();
        let current = engine
            .job_state(&entry.handle)
            .map_err(EvictionError::State)?;
        if current == JobState::Idle {
            engine
                .unregister_job(&entry.handle)
                .map_err(EvictionError::Unregister)?;
            return Ok(Eviction::Unregistered);
        }
        if entry.stop_requested {
            return Ok(Eviction::Waiting);
        }
        engine
            .stop_job(&entry.handle)
            .await
            .map_err(EvictionError::Stop)?;
        entry.stop_requested = true;
        Ok(Eviction::StopRequested)
    }
}
