//! Value types shared between the reconciler and a job engine.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::config::EngineConfig;

/// Fixed-length content hash identifying a descriptor's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentId(pub [u8; 32]);

impl ContentId {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid content id {input:?}: expected 64 hex characters")]
pub struct ParseContentIdError {
    pub input: String,
}

impl FromStr for ContentId {
    type Err = ParseContentIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut out = [0u8; 32];
        hex::decode_to_slice(s, &mut out).map_err(|_| ParseContentIdError {
            input: s.to_string(),
        })?;
        Ok(ContentId(out))
    }
}

/// Parsed descriptor content, owned by the engine once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub path: PathBuf,
    pub content_id: ContentId,
    pub name: String,
}

/// Engine-assigned job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Cheap handle the reconciler keeps per registered descriptor path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub id: JobId,
    pub content_id: ContentId,
    pub name: String,
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.id, self.name)
    }
}

/// Job lifecycle. Transitions are driven by the engine only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Idle,
    Starting,
    Verifying,
    Transferring,
    Seeding,
    Error,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Idle => "idle",
            JobState::Starting => "starting",
            JobState::Verifying => "verifying",
            JobState::Transferring => "transferring",
            JobState::Seeding => "seeding",
            JobState::Error => "error",
        }
    }

    /// States that hold a hashing slot. A started job counts before it
    /// reports `Verifying` so back-to-back ticks cannot overshoot the cap.
    pub fn holds_hashing_slot(self) -> bool {
        matches!(self, JobState::Starting | JobState::Verifying)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-job settings handed to `create_job`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct JobSettings {
    pub listen_port: u16,
    pub user_agent: String,
    pub max_peers: u32,
}

impl From<&EngineConfig> for JobSettings {
    fn from(cfg: &EngineConfig) -> Self {
        Self {
            listen_port: cfg.listen_port,
            user_agent: cfg.user_agent.clone(),
            max_peers: cfg.max_peers,
        }
    }
}

/// Notification emitted by the engine on every lifecycle transition.
#[derive(Debug, Clone)]
pub struct StateChange {
    pub job: JobHandle,
    pub old: JobState,
    pub new: JobState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_id_hex_roundtrip() {
        let id = ContentId([0xAB; 32]);
        let s = id.to_string();
        assert_eq!(s.len(), 64);
        assert!(s.starts_with("abab"));
        assert_eq!(s.parse::<ContentId>().unwrap(), id);
    }

    #[test]
    fn content_id_rejects_bad_hex() {
        assert!("abc".parse::<ContentId>().is_err());
        assert!("zz".repeat(32).parse::<ContentId>().is_err());
    }

    #[test]
    fn hashing_slot_states() {
        assert!(JobState::Starting.holds_hashing_slot());
        assert!(JobState::Verifying.holds_hashing_slot());
        assert!(!JobState::Idle.holds_hashing_slot());
        assert!(!JobState::Seeding.holds_hashing_slot());
    }
}
