//! State-change handler.
//!
//! Consumes engine notifications, logs them and persists resume blobs. It
//! never touches the reconciler's registered-job map; only ticks do.

use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::engine::{JobEngine, JobState, StateChange};
use crate::resume_store::ResumeStore;

/// Transitions after which the job's resume blob is worth saving.
pub fn should_persist(old: JobState, new: JobState) -> bool {
    old == JobState::Verifying || matches!(new, JobState::Idle | JobState::Seeding)
}

/// Log one transition and save the job's resume blob when `should_persist` says so.
pub fn handle_state_change(
    engine: &dyn JobEngine,
    store: &ResumeStore,
    store_path: &std::path::Path,
    change: &StateChange,
) {
    let job = &change.job;
    match change.new {
        JobState::Error => {
            let detail = engine.job_error(job).ok().flatten().unwrap_or_default();
            tracing::warn!(job = %job, from = %change.old, "job failed: {}", detail);
        }
        new => tracing::info!(job = %job, from = %change.old, to = %new, "job state changed"),
    }

    if !should_persist(change.old, change.new) {
        return;
    }
    let blob = match engine.save_resume_blob(job) {
        Ok(b) => b,
        Err(e) => {
            tracing::debug!(job = %job, "no resume blob: {}", e);
            return;
        }
    };
    match store.save(store_path, &job.content_id, blob) {
        Ok(()) => tracing::debug!(job = %job, "resume data saved"),
        Err(e) => tracing::warn!(job = %job, "could not save resume data: {}", e),
    }
}

/// Spawn the handler task. It runs until `stop` flips to true, then drains
/// whatever is already queued and exits.
pub fn spawn_state_handler(
    engine: Arc<dyn JobEngine>,
    store: Arc<ResumeStore>,
    store_path: PathBuf,
    mut rx: mpsc::UnboundedReceiver<StateChange>,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                change = rx.recv() => match change {
                    Some(change) => handle_state_change(engine.as_ref(), &store, &store_path, &change),
                    None => break,
                },
                res = stop.changed() => {
                    if res.is_err() || *stop.borrow() {
                        while let Ok(change) = rx.try_recv() {
                            handle_state_change(engine.as_ref(), &store, &store_path, &change);
                        }
                        break;
                    }
                }
            }
        }
        tracing::debug!("state handler stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{JobHandle, JobSettings, MemoryEngine};
    use std::path::Path;

    fn job(engine: &MemoryEngine) -> JobHandle {
        engine.insert_descriptor("/w/a.torrent", b"abc".to_vec());
        let d = engine.load_descriptor(Path::new("/w/a.torrent")).unwrap();
        let job = engine
            .create_job(&d, Path::new("/data"), &JobSettings::default())
            .unwrap();
        engine.register_job(&job).unwrap();
        job
    }

    #[test]
    fn persist_rules() {
        assert!(should_persist(JobState::Verifying, JobState::Transferring));
        assert!(should_persist(JobState::Verifying, JobState::Error));
        assert!(should_persist(JobState::Transferring, JobState::Seeding));
        assert!(should_persist(JobState::Seeding, JobState::Idle));
        assert!(!should_persist(JobState::Idle, JobState::Starting));
        assert!(!should_persist(JobState::Starting, JobState::Verifying));
    }

    #[tokio::test]
    async fn handler_saves_blob_after_verification() {
        let dir = tempfile::tempdir().unwrap();
        let store_path = dir.path().join("resume.dat");
        let engine = Arc::new(MemoryEngine::new());
        let store = Arc::new(ResumeStore::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = spawn_state_handler(
            engine.clone(),
            Arc::clone(&store),
            store_path.clone(),
            rx,
            stop_rx,
        );

        let job = job(&engine);
        engine.subscribe(&job, tx);
        engine.start_job(&job).await.unwrap();
        engine.transition(&job, JobState::Seeding).unwrap();

        stop_tx.send(true).unwrap();
        handle.await.unwrap();

        let saved = store.load(&store_path, &job.content_id).unwrap();
        assert_eq!(saved, Some(engine.save_resume_blob(&job).unwrap()));
    }

    #[tokio::test]
    async fn handler_exits_when_senders_drop() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = mpsc::unbounded_channel::<StateChange>();
        let (_stop_tx, stop_rx) = watch::channel(false);
        let handle = spawn_state_handler(
            Arc::new(MemoryEngine::new()),
            Arc::new(ResumeStore::new()),
            dir.path().join("resume.dat"),
            rx,
            stop_rx,
        );
        drop(tx);
        handle.await.unwrap();
    }
}
