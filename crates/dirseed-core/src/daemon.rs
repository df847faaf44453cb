//! Periodic driver: fires reconciler ticks on a timer, logs status, and
//! tears everything down in order on shutdown.

use anyhow::Result;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;

use crate::config::DirseedConfig;
use crate::engine::JobEngine;
use crate::events::spawn_state_handler;
use crate::reconcile::{Reconciler, ReconcilerOptions, TickOutcome, WatchConfig};
use crate::resume_store::ResumeStore;
use crate::scanner::DescriptorSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Intervals {
    pub tick: Duration,
    /// None disables the periodic status log.
    pub status: Option<Duration>,
}

impl From<&DirseedConfig> for Intervals {
    fn from(cfg: &DirseedConfig) -> Self {
        Self {
            tick: Duration::from_millis(cfg.tick_interval_ms.max(10)),
            status: (cfg.status_interval_secs > 0)
                .then(|| Duration::from_secs(cfg.status_interval_secs)),
        }
    }
}

pub struct Daemon {
    reconciler: Reconciler,
    intervals: Intervals,
    stop_handler: watch::Sender<bool>,
    handler: JoinHandle<()>,
}

impl Daemon {
    /// Build the reconciler and spawn the state-change handler.
    /// Must be called from within a Tokio runtime.
    pub fn new(
        engine: Arc<dyn JobEngine>,
        source: Arc<dyn DescriptorSource>,
        store: Arc<ResumeStore>,
        options: ReconcilerOptions,
        watch_cfg: WatchConfig,
        intervals: Intervals,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        let handler = spawn_state_handler(
            Arc::clone(&engine),
            Arc::clone(&store),
            options.store_path.clone(),
            events_rx,
            stop_rx,
        );
        let reconciler = Reconciler::new(engine, source, store, options, watch_cfg, events_tx);
        Self {
            reconciler,
            intervals,
            stop_handler: stop_tx,
            handler,
        }
    }

    /// Handle for config reloads and status queries while the daemon runs.
    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Tick until `shutdown` resolves, then stop every job, save resume
    /// data, and wait for the state handler to drain.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.intervals.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let status_enabled = self.intervals.status.is_some();
        let mut status =
            tokio::time::interval(self.intervals.status.unwrap_or(Duration::from_secs(3600)));
        status.set_missed_tick_behavior(MissedTickBehavior::Skip);
        status.tick().await;

        let mut ticks: JoinSet<TickOutcome> = JoinSet::new();
        tokio::pin!(shutdown);
        tracing::info!(
            tick_ms = self.intervals.tick.as_millis() as u64,
            "daemon started"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    let reconciler = self.reconciler.clone();
                    ticks.spawn(async move { reconciler.try_tick().await });
                }
                _ = status.tick(), if status_enabled => log_status(&self.reconciler),
                Some(joined) = ticks.join_next(), if !ticks.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!("tick task failed: {}", e);
                    }
                }
            }
        }

        tracing::info!("shutting down");
        self.reconciler.shutdown().await;
        while let Some(joined) = ticks.join_next().await {
            if let Err(e) = joined {
                tracing::error!("tick task failed: {}", e);
            }
        }
        let _ = self.stop_handler.send(true);
        self.handler
            .await
            .map_err(|e| anyhow::anyhow!("state handler join: {}", e))?;
        tracing::info!("daemon stopped");
        Ok(())
    }
}

/// Skipped while a tick holds the reconciler so the loop never waits on it.
fn log_status(reconciler: &Reconciler) {
    let Some(jobs) = reconciler.try_snapshot() else {
        tracing::debug!("tick in flight; status skipped");
        return;
    };
    let mut by_state: BTreeMap<&'static str, usize> = BTreeMap::new();
    for job in &jobs {
        let key = job.state.map(|s| s.as_str()).unwrap_or("unknown");
        *by_state.entry(key).or_default() += 1;
    }
    tracing::info!(jobs = jobs.len(), states = ?by_state, "status");
    for job in jobs.iter().filter(|j| j.error.is_some()) {
        tracing::warn!(
            name = %job.name,
            path = %job.path.display(),
            "job in error: {}",
            job.error.as_deref().unwrap_or_default()
        );
    }
}
