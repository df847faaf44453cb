//! `dirseed run` – run the watch-folder daemon.

use anyhow::{Context, Result};
use dirseed_core::config::{self, DirseedConfig};
use dirseed_core::daemon::{Daemon, Intervals};
use dirseed_core::engine::{JobEngine, MemoryEngine};
use dirseed_core::reconcile::{Reconciler, ReconcilerOptions, WatchConfig};
use dirseed_core::resume_store::ResumeStore;
use dirseed_core::scanner::FsScanner;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};

/// Step of the in-process engine's simulated verification and transfer.
const ENGINE_STEP: Duration = Duration::from_secs(1);

pub async fn run_daemon(cfg: DirseedConfig, config_path: PathBuf) -> Result<()> {
    if cfg.watch_dirs.is_empty() {
        tracing::warn!(
            "no watch_dirs in {}; nothing will be admitted",
            config_path.display()
        );
    }
    let options = ReconcilerOptions::from_config(&cfg)?;
    tracing::info!(
        store = %options.store_path.display(),
        working_dir = %options.working_dir.display(),
        load_limit = options.load_limit,
        hashing_limit = options.hashing_limit,
        "starting daemon"
    );

    let engine: Arc<dyn JobEngine> = Arc::new(MemoryEngine::with_auto_advance(ENGINE_STEP));
    let daemon = Daemon::new(
        engine,
        Arc::new(FsScanner::new()),
        Arc::new(ResumeStore::new()),
        options,
        WatchConfig::from(&cfg),
        Intervals::from(&cfg),
    );

    let mut hangup = signal(SignalKind::hangup()).context("install SIGHUP handler")?;
    let reconciler = daemon.reconciler().clone();
    let reload = tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            reload_watch_config(&reconciler, &config_path);
        }
    });

    let mut terminate = signal(SignalKind::terminate()).context("install SIGTERM handler")?;
    let shutdown = async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::info!("interrupt received"),
            _ = terminate.recv() => tracing::info!("terminate received"),
        }
    };

    let result = daemon.run_until(shutdown).await;
    reload.abort();
    result
}

/// Only the watched folders and pattern change at runtime; other settings
/// need a restart. A bad file keeps the current configuration.
fn reload_watch_config(reconciler: &Reconciler, path: &Path) {
    match config::load_from_path(path) {
        Ok(cfg) => {
            let watch = WatchConfig::from(&cfg);
            if watch == reconciler.watch_config() {
                tracing::info!("config reloaded; watch settings unchanged");
            } else {
                reconciler.set_watch_config(watch);
            }
        }
        Err(e) => tracing::warn!("config reload failed, keeping current: {:#}", e),
    }
}
