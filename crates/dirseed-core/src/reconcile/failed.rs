//! Descriptors whose admission failed, and when they may be tried again.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

/// When a failed descriptor becomes eligible for admission again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailedPathPolicy {
    /// Never within this process.
    #[default]
    Permanent,
    /// Once the given time has passed since the failure.
    RetryAfter(Duration),
    /// Once the descriptor's modification time differs from the one that failed.
    OnModified,
}

#[derive(Debug, Clone, Copy)]
struct Failure {
    at: Instant,
    modified: SystemTime,
}

#[derive(Debug, Default)]
pub struct FailedPaths {
    policy: FailedPathPolicy,
    entries: HashMap<PathBuf, Failure>,
}

impl FailedPaths {
    pub fn new(policy: FailedPathPolicy) -> Self {
        Self {
            policy,
            entries: HashMap::new(),
        }
    }

    pub fn record(&mut self, path: &Path, modified: SystemTime, now: Instant) {
        self.entries
            .insert(path.to_path_buf(), Failure { at: now, modified });
    }

    pub fn clear(&mut self, path: &Path) {
        self.entries.remove(path);
    }

    /// True if `path` must not be admitted right now.
    pub fn is_blocked(&self, path: &Path, modified: SystemTime, now: Instant) -> bool {
        let Some(failure) = self.entries.get(path) else {
            return false;
        };
        match self.policy {
            FailedPathPolicy::Permanent => true,
            FailedPathPolicy::RetryAfter(wait) => now.saturating_duration_since(failure.at) < wait,
            FailedPathPolicy::OnModified => failure.modified == modified,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
