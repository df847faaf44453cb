//! Shared fixtures for daemon integration tests.

#![allow(dead_code)]

use dirseed_core::daemon::{Daemon, Intervals};
use dirseed_core::engine::{JobSettings, MemoryEngine};
use dirseed_core::reconcile::{FailedPathPolicy, ReconcilerOptions, WatchConfig};
use dirseed_core::resume_store::ResumeStore;
use dirseed_core::scanner::FsScanner;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub const TICK: Duration = Duration::from_millis(50);

/// A watched folder plus a state dir for the resume index.
pub struct Site {
    _root: TempDir,
    pub watch: PathBuf,
    pub store_path: PathBuf,
    pub data: PathBuf,
}

impl Site {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let watch = root.path().join("watch");
        std::fs::create_dir_all(&watch).unwrap();
        Self {
            store_path: root.path().join("state").join("resume.dat"),
            data: root.path().join("data"),
            watch,
            _root: root,
        }
    }

    /// Write a descriptor whose content is `name` repeated.
    pub fn drop_descriptor(&self, name: &str) -> PathBuf {
        let path = self.watch.join(format!("{name}.torrent"));
        std::fs::write(&path, name.repeat(40)).unwrap();
        path
    }

    pub fn remove_descriptor(&self, name: &str) {
        std::fs::remove_file(self.watch.join(format!("{name}.torrent"))).unwrap();
    }

    pub fn options(&self, skip_verification: bool) -> ReconcilerOptions {
        ReconcilerOptions {
            load_limit: 10,
            hashing_limit: 2,
            skip_verification,
            failed_path_policy: FailedPathPolicy::Permanent,
            store_path: self.store_path.clone(),
            working_dir: self.data.clone(),
            job_settings: JobSettings::default(),
        }
    }

    pub fn daemon(&self, engine: &MemoryEngine, skip_verification: bool) -> Daemon {
        Daemon::new(
            Arc::new(engine.clone()),
            Arc::new(FsScanner::new()),
            Arc::new(ResumeStore::new()),
            self.options(skip_verification),
            WatchConfig {
                roots: vec![self.watch.clone()],
                pattern: "*.torrent".to_string(),
            },
            Intervals {
                tick: TICK,
                status: None,
            },
        )
    }

    /// Entries in the on-disk index, read through a fresh store.
    pub fn stored_ids(&self) -> Vec<String> {
        stored_ids(&self.store_path)
    }
}

pub fn stored_ids(path: &Path) -> Vec<String> {
    ResumeStore::new()
        .entries(path)
        .unwrap()
        .into_iter()
        .map(|(id, _)| id)
        .collect()
}

pub struct Running {
    stop: oneshot::Sender<()>,
    task: JoinHandle<anyhow::Result<()>>,
}

impl Running {
    pub async fn stop(self) {
        let _ = self.stop.send(());
        self.task.await.unwrap().unwrap();
    }
}

pub fn spawn(daemon: Daemon) -> Running {
    let (stop, rx) = oneshot::channel::<()>();
    let task = tokio::spawn(daemon.run_until(async move {
        let _ = rx.await;
    }));
    Running { stop, task }
}
