//! Crash-safe cache of per-job resume blobs.
//!
//! One index file per store path maps hex content ids to opaque engine
//! blobs. The first access to a store path loads its file; afterwards every
//! read and write goes through the cached index. Each mutation rewrites
//! the whole file via temp file + rename.

mod error;
pub mod index;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::engine::ContentId;

pub use error::ResumeStoreError;
pub use index::ResumeIndex;

/// Result of looking up a job's resume state, with failures folded in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeLookup {
    Found(Vec<u8>),
    /// Index is readable and has no entry for the job.
    Absent,
    /// The index could not be read; treat as "no resume data" but do not
    /// assume the job is new.
    Unavailable,
}

/// `None` until the first access loads the file.
type Slot = Arc<Mutex<Option<ResumeIndex>>>;

/// Registry of resume indices keyed by store path. Entries are created
/// lazily and live for the whole process.
#[derive(Default)]
pub struct ResumeStore {
    indices: Mutex<HashMap<PathBuf, Slot>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ResumeStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, store: &Path) -> Slot {
        Arc::clone(lock(&self.indices).entry(store.to_path_buf()).or_default())
    }

    /// Run `f` on the loaded index for `store` while holding its lock.
    fn with_index<R>(
        &self,
        store: &Path,
        f: impl FnOnce(&mut ResumeIndex) -> Result<R, ResumeStoreError>,
    ) -> Result<R, ResumeStoreError> {
        let slot = self.slot(store);
        let mut guard = lock(&slot);
        if guard.is_none() {
            match ResumeIndex::open(store) {
                Ok(index) => {
                    tracing::debug!(
                        store = %store.display(),
                        entries = index.entries().len(),
                        "loaded resume index"
                    );
                    *guard = Some(index);
                }
                Err(e @ ResumeStoreError::Malformed { .. }) => {
                    quarantine(store);
                    *guard = Some(ResumeIndex::recovered(store));
                    return Err(e);
                }
                Err(e) => return Err(e),
            }
        }
        f(guard.get_or_insert_with(|| ResumeIndex::empty(store)))
    }

    pub fn load(&self, store: &Path, id: &ContentId) -> Result<Option<Vec<u8>>, ResumeStoreError> {
        let key = id.to_hex();
        self.with_index(store, |index| Ok(index.get(&key).cloned()))
    }

    /// Like `load`, but logs failures and reports them as `Unavailable`.
    ///
    /// After a malformed index was replaced, ids it does not hold stay
    /// `Unavailable` for the rest of the process: their entries may have
    /// been in the lost file.
    pub fn lookup(&self, store: &Path, id: &ContentId) -> ResumeLookup {
        let key = id.to_hex();
        let found = self.with_index(store, |index| {
            Ok((index.get(&key).cloned(), index.is_recovered()))
        });
        match found {
            Ok((Some(blob), _)) => ResumeLookup::Found(blob),
            Ok((None, false)) => ResumeLookup::Absent,
            Ok((None, true)) => {
                tracing::debug!(id = %id, "no entry in recovered resume index");
                ResumeLookup::Unavailable
            }
            Err(e) => {
                tracing::warn!(id = %id, "resume data unavailable: {}", e);
                ResumeLookup::Unavailable
            }
        }
    }

    pub fn save(&self, store: &Path, id: &ContentId, blob: Vec<u8>) -> Result<(), ResumeStoreError> {
        let key = id.to_hex();
        self.with_index(store, |index| {
            index.mutate(|entries| {
                if entries.get(&key) == Some(&blob) {
                    return false;
                }
                entries.insert(key, blob);
                true
            })
        })?;
        Ok(())
    }

    /// Returns true if an entry was removed.
    pub fn remove(&self, store: &Path, id: &ContentId) -> Result<bool, ResumeStoreError> {
        let key = id.to_hex();
        self.with_index(store, |index| index.mutate(|entries| entries.remove(&key).is_some()))
    }

    /// Drop every entry whose id is not in `keep`. Returns the number removed.
    pub fn prune(&self, store: &Path, keep: &HashSet<ContentId>) -> Result<usize, ResumeStoreError> {
        let keep: HashSet<String> = keep.iter().map(ContentId::to_hex).collect();
        self.with_index(store, |index| {
            let mut removed = 0;
            index.mutate(|entries| {
                let before = entries.len();
                entries.retain(|k, _| keep.contains(k));
                removed = before - entries.len();
                removed > 0
            })?;
            Ok(removed)
        })
    }

    /// `(hex id, blob length)` for every entry, in key order.
    pub fn entries(&self, store: &Path) -> Result<Vec<(String, usize)>, ResumeStoreError> {
        self.with_index(store, |index| {
            Ok(index
                .entries()
                .iter()
                .map(|(k, v)| (k.clone(), v.len()))
                .collect())
        })
    }
}

fn quarantine(store: &Path) {
    let aside = index::quarantine_path(store);
    match std::fs::rename(store, &aside) {
        Ok(()) => tracing::error!(
            store = %store.display(),
            moved_to = %aside.display(),
            "malformed resume index moved aside; starting empty"
        ),
        Err(e) => tracing::error!(
            store = %store.display(),
            "malformed resume index could not be moved aside: {}",
            e
        ),
    }
}
