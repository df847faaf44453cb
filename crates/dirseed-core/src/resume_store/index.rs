//! On-disk resume index: encoding and atomic replace-on-write.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use super::error::ResumeStoreError;

const MAGIC: [u8; 4] = *b"DSRI";
const VERSION: u32 = 1;

/// Hex content id -> opaque engine blob. BTreeMap keeps the encoding deterministic.
pub type Entries = BTreeMap<String, Vec<u8>>;

#[derive(Serialize)]
struct IndexFileRef<'a> {
    magic: [u8; 4],
    version: u32,
    entries: &'a Entries,
}

#[derive(Deserialize)]
struct IndexFile {
    magic: [u8; 4],
    version: u32,
    entries: Entries,
}

/// In-memory copy of one resume index file. Once loaded it is the only
/// view of that file the process uses.
#[derive(Debug)]
pub struct ResumeIndex {
    path: PathBuf,
    entries: Entries,
    /// Started empty because the file on disk was malformed; a missing
    /// entry may be one that was lost.
    recovered: bool,
}

impl ResumeIndex {
    /// Read `path`, or start empty if it does not exist.
    pub fn open(path: &Path) -> Result<Self, ResumeStoreError> {
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::empty(path));
            }
            Err(source) => {
                return Err(ResumeStoreError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let entries = decode(path, &bytes)?;
        Ok(Self {
            path: path.to_path_buf(),
            entries,
            recovered: false,
        })
    }

    pub fn empty(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            entries: Entries::new(),
            recovered: false,
        }
    }

    /// Empty index standing in for a malformed file.
    pub fn recovered(path: &Path) -> Self {
        Self {
            recovered: true,
            ..Self::empty(path)
        }
    }

    pub fn is_recovered(&self) -> bool {
        self.recovered
    }

    pub fn get(&self, key: &str) -> Option<&Vec<u8>> {
        self.entries.get(key)
    }

    pub fn entries(&self) -> &Entries {
        &self.entries
    }

    /// Apply `f` to a copy of the entries and persist it; the in-memory index
    /// only changes if the write succeeded. `f` returns false for "nothing
    /// changed", in which case no write happens.
    pub fn mutate<F>(&mut self, f: F) -> Result<bool, ResumeStoreError>
    where
        F: FnOnce(&mut Entries) -> bool,
    {
        let mut next = self.entries.clone();
        if !f(&mut next) {
            return Ok(false);
        }
        persist(&self.path, &next)?;
        self.entries = next;
        Ok(true)
    }
}

pub fn encode(path: &Path, entries: &Entries) -> Result<Vec<u8>, ResumeStoreError> {
    bincode::serialize(&IndexFileRef {
        magic: MAGIC,
        version: VERSION,
        entries,
    })
    .map_err(|e| ResumeStoreError::Encode {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

pub fn decode(path: &Path, bytes: &[u8]) -> Result<Entries, ResumeStoreError> {
    let malformed = |reason: String| ResumeStoreError::Malformed {
        path: path.to_path_buf(),
        reason,
    };
    let file: IndexFile = bincode::deserialize(bytes).map_err(|e| malformed(e.to_string()))?;
    if file.magic != MAGIC {
        return Err(malformed("bad magic".to_string()));
    }
    if file.version != VERSION {
        return Err(malformed(format!("unsupported version {}", file.version)));
    }
    Ok(file.entries)
}

/// First half of a replace-on-write: the new contents, flushed to a temp
/// file in the destination directory.
pub(crate) fn write_temp(path: &Path, bytes: &[u8]) -> Result<NamedTempFile, ResumeStoreError> {
    let write_err = |source| ResumeStoreError::Write {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(write_err)?;
    let mut tmp = NamedTempFile::new_in(dir).map_err(write_err)?;
    tmp.write_all(bytes).map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;
    Ok(tmp)
}

/// Second half: atomically rename the temp file over `path`.
pub(crate) fn commit(tmp: NamedTempFile, path: &Path) -> Result<(), ResumeStoreError> {
    tmp.persist(path).map_err(|e| ResumeStoreError::Write {
        path: path.to_path_buf(),
        source: e.error,
    })?;
    Ok(())
}

/// Serialize `entries` and replace `path` with it atomically.
pub fn persist(path: &Path, entries: &Entries) -> Result<(), ResumeStoreError> {
    let bytes = encode(path, entries)?;
    let tmp = write_temp(path, &bytes)?;
    commit(tmp, path)
}

/// Path a corrupt index is moved to (`resume.dat` -> `resume.dat.corrupt`).
pub fn quarantine_path(path: &Path) -> PathBuf {
    let mut o = path.as_os_str().to_owned();
    o.push(".corrupt");
    PathBuf::from(o)
}
