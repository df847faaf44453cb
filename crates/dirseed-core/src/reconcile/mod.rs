//! Reconciliation engine.
//!
//! One tick diffs the discovered descriptor set against the registered
//! jobs and applies, in order:
//! 1. admission of new descriptors (newest first, at most `load_limit`),
//! 2. eviction of jobs whose descriptor disappeared (only once idle),
//! 3. verification starts for idle jobs (newest first) while fewer than
//!    `hashing_limit` jobs hold a hashing slot.
//!
//! Only one tick runs at a time; a trigger that finds a tick in flight is
//! dropped. Per-job failures are logged and never abort the tick.

mod admission;
mod error;
mod eviction;
mod failed;
mod verification;

use anyhow::Result;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Instant, SystemTime};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;

use crate::config::DirseedConfig;
use crate::engine::{ContentId, JobEngine, JobHandle, JobSettings, JobState, StateChange};
use crate::resume_store::ResumeStore;
use crate::scanner::{DescriptorSource, DiscoveredDescriptor};

pub use error::{AdmissionError, EvictionError};
pub use failed::{FailedPathPolicy, FailedPaths};

/// Fixed settings for a reconciler.
#[derive(Debug, Clone)]
pub struct ReconcilerOptions {
    pub load_limit: usize,
    pub hashing_limit: usize,
    pub skip_verification: bool,
    pub failed_path_policy: FailedPathPolicy,
    pub store_path: PathBuf,
    pub working_dir: PathBuf,
    pub job_settings: JobSettings,
}

impl ReconcilerOptions {
    pub fn from_config(cfg: &DirseedConfig) -> Result<Self> {
        Ok(Self {
            load_limit: cfg.load_limit.max(1),
            hashing_limit: cfg.hashing_limit.max(1),
            skip_verification: cfg.skip_verification,
            failed_path_policy: cfg.failed_paths.to_policy(),
            store_path: cfg.resume_path()?,
            working_dir: cfg.working_dir()?,
            job_settings: JobSettings::from(&cfg.engine),
        })
    }
}

/// What to scan. Replaced wholesale when the configuration is reloaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchConfig {
    pub roots: Vec<PathBuf>,
    pub pattern: String,
}

impl From<&DirseedConfig> for WatchConfig {
    fn from(cfg: &DirseedConfig) -> Self {
        Self {
            roots: cfg.watch_dirs.clone(),
            pattern: cfg.descriptor_pattern.clone(),
        }
    }
}

/// Counts from one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub discovered: usize,
    pub admitted: usize,
    pub failed: usize,
    /// Admission candidates left for a later tick by `load_limit`.
    pub deferred: usize,
    pub evicted: usize,
    pub stop_requested: usize,
    pub started: usize,
    /// Jobs holding a hashing slot when verification admission ran.
    pub hashing: usize,
}

impl TickReport {
    pub fn is_noop(&self) -> bool {
        self.admitted == 0
            && self.failed == 0
            && self.evicted == 0
            && self.stop_requested == 0
            && self.started == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Completed(TickReport),
    /// Another tick was in flight; this trigger did nothing.
    Skipped,
    ShuttingDown,
}

/// Row for status reporting.
#[derive(Debug, Clone)]
pub struct JobSummary {
    pub path: PathBuf,
    pub name: String,
    pub content_id: ContentId,
    pub state: Option<JobState>,
    pub progress: f64,
    pub error: Option<String>,
}

pub(crate) struct Registered {
    pub(crate) handle: JobHandle,
    pub(crate) created: SystemTime,
    /// Eviction asked the engine to stop this job; unregister once idle.
    pub(crate) stop_requested: bool,
}

struct TickState {
    registered: HashMap<PathBuf, Registered>,
    failed: FailedPaths,
    /// Registered set changed since the resume index was last pruned.
    prune_pending: bool,
}

struct Shared {
    state: Mutex<TickState>,
    watch: RwLock<WatchConfig>,
    options: ReconcilerOptions,
    engine: Arc<dyn JobEngine>,
    store: Arc<ResumeStore>,
    source: Arc<dyn DescriptorSource>,
    events: mpsc::UnboundedSender<StateChange>,
    closed: AtomicBool,
}

/// Handle to the reconciliation engine. Clones share the same job set.
#[derive(Clone)]
pub struct Reconciler {
    inner: Arc<Shared>,
}

impl Reconciler {
    pub fn new(
        engine: Arc<dyn JobEngine>,
        source: Arc<dyn DescriptorSource>,
        store: Arc<ResumeStore>,
        options: ReconcilerOptions,
        watch: WatchConfig,
        events: mpsc::UnboundedSender<StateChange>,
    ) -> Self {
        let failed = FailedPaths::new(options.failed_path_policy);
        Self {
            inner: Arc::new(Shared {
                state: Mutex::new(TickState {
                    registered: HashMap::new(),
                    failed,
                    prune_pending: false,
                }),
                watch: RwLock::new(watch),
                options,
                engine,
                store,
                source,
                events,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn options(&self) -> &ReconcilerOptions {
        &self.inner.options
    }

    pub fn watch_config(&self) -> WatchConfig {
        self.inner
            .watch
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the watched roots and pattern; takes effect on the next tick.
    pub fn set_watch_config(&self, watch: WatchConfig) {
        tracing::info!(roots = ?watch.roots, pattern = %watch.pattern, "watch config replaced");
        *self
            .inner
            .watch
            .write()
            .unwrap_or_else(PoisonError::into_inner) = watch;
    }

    /// Run one tick unless another is in flight or shutdown has begun.
    pub async fn try_tick(&self) -> TickOutcome {
        if self.inner.closed.load(Ordering::Acquire) {
            return TickOutcome::ShuttingDown;
        }
        let Ok(mut state) = self.inner.state.try_lock() else {
            tracing::debug!("tick still in flight; trigger dropped");
            return TickOutcome::Skipped;
        };
        if self.inner.closed.load(Ordering::Acquire) {
            return TickOutcome::ShuttingDown;
        }
        TickOutcome::Completed(self.run_tick(&mut state).await)
    }

    async fn run_tick(&self, state: &mut TickState) -> TickReport {
        let mut report = TickReport::default();
        let watch = self.watch_config();
        let discovered = match self.inner.source.discover(&watch.roots, &watch.pattern) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!("scan failed; tick skipped: {}", e);
                return report;
            }
        };
        report.discovered = discovered.len();
        let now = Instant::now();
        let discovered_paths: HashSet<PathBuf> =
            discovered.iter().map(|d| d.path.clone()).collect();
        let snapshot: HashSet<PathBuf> = state.registered.keys().cloned().collect();

        // A descriptor that came back cancels a pending eviction.
        for (path, entry) in state.registered.iter_mut() {
            if entry.stop_requested && discovered_paths.contains(path) {
                tracing::info!(path = %path.display(), "descriptor reappeared; eviction cancelled");
                entry.stop_requested = false;
            }
        }

        self.admit(state, &discovered, &snapshot, now, &mut report);
        self.evict(state, &discovered_paths, &snapshot, &mut report)
            .await;
        self.start_verification(state, &discovered_paths, &mut report)
            .await;
        let roots_available = self.inner.source.roots_available(&watch.roots);
        self.prune_if_converged(state, &discovered, &discovered_paths, roots_available, now);

        if !report.is_noop() {
            tracing::info!(
                discovered = report.discovered,
                admitted = report.admitted,
                failed = report.failed,
                deferred = report.deferred,
                evicted = report.evicted,
                stopping = report.stop_requested,
                started = report.started,
                "tick applied"
            );
        }
        report
    }

    /// Once every discovered descriptor is registered (or blocked) and no
    /// eviction is pending, drop resume entries for content we no longer serve.
    ///
    /// An empty scan or a missing watch root looks the same as every
    /// descriptor being deleted, so neither prunes; the pending prune waits
    /// for a scan that sees the roots again.
    fn prune_if_converged(
        &self,
        state: &mut TickState,
        discovered: &[DiscoveredDescriptor],
        discovered_paths: &HashSet<PathBuf>,
        roots_available: bool,
        now: Instant,
    ) {
        if !state.prune_pending {
            return;
        }
        if discovered.is_empty() || !roots_available {
            tracing::debug!(
                discovered = discovered.len(),
                roots_available,
                "resume prune deferred"
            );
            return;
        }
        let all_admitted = discovered.iter().all(|d| {
            state.registered.contains_key(&d.path)
                || state.failed.is_blocked(&d.path, d.modified, now)
        });
        let none_evicting = state
            .registered
            .keys()
            .all(|path| discovered_paths.contains(path));
        if !all_admitted || !none_evicting {
            return;
        }
        let keep: HashSet<ContentId> = state
            .registered
            .values()
            .map(|r| r.handle.content_id)
            .collect();
        match self.inner.store.prune(&self.inner.options.store_path, &keep) {
            Ok(removed) => {
                if removed > 0 {
                    tracing::info!(removed, "pruned stale resume entries");
                }
                state.prune_pending = false;
            }
            Err(e) => tracing::warn!("could not prune resume index: {}", e),
        }
    }

    /// Registered jobs with their current engine state, sorted by path.
    pub async fn snapshot(&self) -> Vec<JobSummary> {
        let state = self.inner.state.lock().await;
        self.summarize(&state)
    }

    /// Like [`snapshot`](Self::snapshot), but `None` instead of waiting
    /// while a tick holds the state.
    pub fn try_snapshot(&self) -> Option<Vec<JobSummary>> {
        let state = self.inner.state.try_lock().ok()?;
        Some(self.summarize(&state))
    }

    fn summarize(&self, state: &TickState) -> Vec<JobSummary> {
        let engine = self.inner.engine.as_ref();
        let mut rows: Vec<JobSummary> = state
            .registered
            .iter()
            .map(|(path, r)| JobSummary {
                path: path.clone(),
                name: r.handle.name.clone(),
                content_id: r.handle.content_id,
                state: engine.job_state(&r.handle).ok(),
                progress: engine.job_progress(&r.handle).unwrap_or(0.0),
                error: engine.job_error(&r.handle).ok().flatten(),
            })
            .collect();
        rows.sort_by(|a, b| a.path.cmp(&b.path));
        rows
    }

    /// Paths currently registered, sorted.
    pub async fn registered_paths(&self) -> Vec<PathBuf> {
        let state = self.inner.state.lock().await;
        let mut paths: Vec<PathBuf> = state.registered.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Refuse further ticks, wait for an in-flight one, then stop every
    /// registered job concurrently, save its resume blob and unregister it.
    pub async fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::Release);
        let mut state = self.inner.state.lock().await;
        let jobs: Vec<JobHandle> = state
            .registered
            .drain()
            .map(|(_, r)| r.handle)
            .collect();
        tracing::info!(jobs = jobs.len(), "stopping all jobs");

        let mut stops = JoinSet::new();
        for job in jobs {
            let engine = Arc::clone(&self.inner.engine);
            stops.spawn(async move {
                let res = engine.stop_job(&job).await;
                (job, res)
            });
        }
        while let Some(joined) = stops.join_next().await {
            match joined {
                Ok((job, Ok(()))) => self.release(&job),
                Ok((job, Err(e))) => tracing::warn!(job = %job, "stop failed: {}", e),
                Err(e) => tracing::error!("stop task failed: {}", e),
            }
        }
    }

    fn release(&self, job: &JobHandle) {
        let engine = self.inner.engine.as_ref();
        match engine.save_resume_blob(job) {
            Ok(blob) => {
                if let Err(e) =
                    self.inner
                        .store
                        .save(&self.inner.options.store_path, &job.content_id, blob)
                {
                    tracing::warn!(job = %job, "could not save resume data: {}", e);
                }
            }
            Err(e) => tracing::debug!(job = %job, "no resume blob: {}", e),
        }
        if let Err(e) = engine.unregister_job(job) {
            tracing::warn!(job = %job, "unregister failed: {}", e);
        }
    }
}
