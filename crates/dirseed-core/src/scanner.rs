//! Descriptor discovery under the watched roots.
//!
//! Read-only recursive traversal. Missing roots are skipped silently and an
//! unreadable entry only loses that entry, never the rest of the scan.

use globset::{Glob, GlobMatcher};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

/// A descriptor file found on disk. Nothing is parsed at this stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDescriptor {
    pub path: PathBuf,
    /// Birth time, or `modified` where the filesystem does not record one.
    pub created: SystemTime,
    pub modified: SystemTime,
}

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("invalid descriptor pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        source: globset::Error,
    },
}

/// Source of descriptor paths for the reconciler.
pub trait DescriptorSource: Send + Sync {
    /// Every descriptor under `roots` whose file name matches `pattern`,
    /// deduplicated and sorted by path.
    fn discover(
        &self,
        roots: &[PathBuf],
        pattern: &str,
    ) -> Result<Vec<DiscoveredDescriptor>, ScanError>;

    /// False when some root cannot be seen at all (unmounted, deleted), so
    /// an absent descriptor may still exist.
    fn roots_available(&self, _roots: &[PathBuf]) -> bool {
        true
    }
}

/// File system scanner backed by `walkdir`.
#[derive(Debug, Clone, Default)]
pub struct FsScanner {
    pub follow_links: bool,
}

impl FsScanner {
    pub fn new() -> Self {
        Self::default()
    }

    fn scan_root(
        &self,
        root: &Path,
        matcher: &GlobMatcher,
        out: &mut BTreeMap<PathBuf, DiscoveredDescriptor>,
    ) {
        if !root.exists() {
            tracing::trace!(root = %root.display(), "watch root missing; skipped");
            return;
        }
        for entry in WalkDir::new(root).follow_links(self.follow_links) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!(root = %root.display(), "scan error: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() || !matcher.is_match(entry.file_name()) {
                continue;
            }
            match entry.metadata() {
                Ok(meta) => {
                    let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                    let created = meta.created().unwrap_or(modified);
                    let path = entry.into_path();
                    out.insert(
                        path.clone(),
                        DiscoveredDescriptor {
                            path,
                            created,
                            modified,
                        },
                    );
                }
                Err(e) => {
                    tracing::warn!(path = %entry.path().display(), "cannot stat descriptor: {}", e)
                }
            }
        }
    }
}

pub fn compile_pattern(pattern: &str) -> Result<GlobMatcher, ScanError> {
    Glob::new(pattern)
        .map(|g| g.compile_matcher())
        .map_err(|source| ScanError::Pattern {
            pattern: pattern.to_string(),
            source,
        })
}

impl DescriptorSource for FsScanner {
    fn discover(
        &self,
        roots: &[PathBuf],
        pattern: &str,
    ) -> Result<Vec<DiscoveredDescriptor>, ScanError> {
        let matcher = compile_pattern(pattern)?;
        let mut found = BTreeMap::new();
        for root in roots {
            self.scan_root(root, &matcher, &mut found);
        }
        Ok(found.into_values().collect())
    }

    fn roots_available(&self, roots: &[PathBuf]) -> bool {
        roots.iter().all(|root| root.is_dir())
    }
}

/// Newest first; ties broken by path so the order is total.
pub fn sort_newest_first(descriptors: &mut [DiscoveredDescriptor]) {
    descriptors.sort_by(|a, b| b.created.cmp(&a.created).then_with(|| a.path.cmp(&b.path)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, b"d").unwrap();
    }

    #[test]
    fn finds_matching_files_recursively() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.torrent"));
        touch(&dir.path().join("nested/deeper/b.torrent"));
        touch(&dir.path().join("nested/readme.txt"));

        let found = FsScanner::new()
            .discover(&[dir.path().to_path_buf()], "*.torrent")
            .unwrap();
        let paths: Vec<_> = found.iter().map(|d| d.path.clone()).collect();
        assert_eq!(
            paths,
            vec![
                dir.path().join("a.torrent"),
                dir.path().join("nested/deeper/b.torrent"),
            ]
        );
    }

    #[test]
    fn missing_root_does_not_hide_other_roots() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("x.torrent"));
        let roots = vec![dir.path().join("does-not-exist"), dir.path().to_path_buf()];
        let found = FsScanner::new().discover(&roots, "*.torrent").unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn overlapping_roots_are_deduplicated() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("sub/x.torrent"));
        let roots = vec![dir.path().to_path_buf(), dir.path().join("sub")];
        let found = FsScanner::new().discover(&roots, "*.torrent").unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn roots_available_requires_every_root() {
        let dir = tempfile::tempdir().unwrap();
        let scanner = FsScanner::new();
        assert!(scanner.roots_available(&[dir.path().to_path_buf()]));
        assert!(!scanner.roots_available(&[
            dir.path().to_path_buf(),
            dir.path().join("unmounted"),
        ]));
    }

    #[test]
    fn bad_pattern_is_an_error() {
        assert!(matches!(
            FsScanner::new().discover(&[], "["),
            Err(ScanError::Pattern { .. })
        ));
    }

    #[test]
    fn newest_first_ordering() {
        let t0 = SystemTime::UNIX_EPOCH + Duration::from_secs(1000);
        let d = |name: &str, secs: u64| DiscoveredDescriptor {
            path: PathBuf::from(name),
            created: t0 + Duration::from_secs(secs),
            modified: t0,
        };
        let mut v = vec![d("/a", 1), d("/c", 5), d("/b", 5)];
        sort_newest_first(&mut v);
        let names: Vec<_> = v.iter().map(|d| d.path.to_string_lossy().into_owned()).collect();
        assert_eq!(names, vec!["/b", "/c", "/a"]);
    }
}
