use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::reconcile::FailedPathPolicy;

/// How admission failures are remembered (optional `[failed_paths]` section in config.toml).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailedPathMode {
    /// Never retry a failed descriptor until the process restarts.
    #[default]
    Permanent,
    /// Retry once `retry_after_secs` have elapsed since the failure.
    RetryAfter,
    /// Retry when the descriptor's modification time changes.
    OnModified,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedPathsConfig {
    #[serde(default)]
    pub policy: FailedPathMode,
    /// Only used by `retry_after`.
    #[serde(default = "default_retry_after_secs")]
    pub retry_after_secs: u64,
}

fn default_retry_after_secs() -> u64 {
    300
}

impl Default for FailedPathsConfig {
    fn default() -> Self {
        Self {
            policy: FailedPathMode::Permanent,
            retry_after_secs: default_retry_after_secs(),
        }
    }
}

impl FailedPathsConfig {
    pub fn to_policy(&self) -> FailedPathPolicy {
        match self.policy {
            FailedPathMode::Permanent => FailedPathPolicy::Permanent,
            FailedPathMode::RetryAfter => FailedPathPolicy::RetryAfter(
                std::time::Duration::from_secs(self.retry_after_secs),
            ),
            FailedPathMode::OnModified => FailedPathPolicy::OnModified,
        }
    }
}

/// Network and identity settings handed to the job engine for every created job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub listen_port: u16,
    pub user_agent: String,
    pub max_peers: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            listen_port: 6881,
            user_agent: format!("dirseed/{}", env!("CARGO_PKG_VERSION")),
            max_peers: 50,
        }
    }
}

/// Global configuration loaded from `~/.config/dirseed/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirseedConfig {
    /// Directories scanned recursively for descriptor files.
    #[serde(default)]
    pub watch_dirs: Vec<PathBuf>,
    /// Glob matched against descriptor file names.
    #[serde(default = "default_pattern")]
    pub descriptor_pattern: String,
    /// Resume index file. None = `~/.local/state/dirseed/resume.dat`.
    #[serde(default)]
    pub resume_file: Option<PathBuf>,
    /// Where job payloads live. None = current directory.
    #[serde(default)]
    pub download_dir: Option<PathBuf>,
    /// Trust data already on disk for jobs without resume state.
    #[serde(default)]
    pub skip_verification: bool,
    /// Maximum new admissions per tick.
    pub load_limit: usize,
    /// Maximum jobs hashing (starting or verifying) at once.
    pub hashing_limit: usize,
    /// Period of the reconciliation tick in milliseconds.
    pub tick_interval_ms: u64,
    /// Period of the status log in seconds (0 disables it).
    #[serde(default = "default_status_interval_secs")]
    pub status_interval_secs: u64,
    #[serde(default)]
    pub failed_paths: FailedPathsConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

fn default_pattern() -> String {
    "*.torrent".to_string()
}

fn default_status_interval_secs() -> u64 {
    60
}

impl Default for DirseedConfig {
    fn default() -> Self {
        Self {
            watch_dirs: Vec::new(),
            descriptor_pattern: default_pattern(),
            resume_file: None,
            download_dir: None,
            skip_verification: false,
            load_limit: 10,
            hashing_limit: 2,
            tick_interval_ms: 2000,
            status_interval_secs: default_status_interval_secs(),
            failed_paths: FailedPathsConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

impl DirseedConfig {
    /// Reject values the reconciler cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.load_limit == 0 {
            anyhow::bail!("load_limit must be at least 1");
        }
        if self.hashing_limit == 0 {
            anyhow::bail!("hashing_limit must be at least 1");
        }
        if self.tick_interval_ms < 10 {
            anyhow::bail!("tick_interval_ms must be at least 10 (got {})", self.tick_interval_ms);
        }
        if self.engine.listen_port == 0 {
            anyhow::bail!("engine.listen_port must be non-zero");
        }
        globset::Glob::new(&self.descriptor_pattern)
            .with_context(|| format!("invalid descriptor_pattern: {}", self.descriptor_pattern))?;
        Ok(())
    }

    /// Make relative watch dirs, resume file and download dir absolute against `base`
    /// (normally the directory holding the config file).
    pub fn resolve_paths(&mut self, base: &Path) {
        let absolutize = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        self.watch_dirs.iter_mut().for_each(absolutize);
        if let Some(p) = self.resume_file.as_mut() {
            absolutize(p);
        }
        if let Some(p) = self.download_dir.as_mut() {
            absolutize(p);
        }
    }

    /// Resume index path, falling back to the XDG state directory.
    pub fn resume_path(&self) -> Result<PathBuf> {
        match &self.resume_file {
            Some(p) => Ok(p.clone()),
            None => {
                let xdg_dirs = xdg::BaseDirectories::with_prefix("dirseed")?;
                Ok(xdg_dirs.get_state_home().join("resume.dat"))
            }
        }
    }

    /// Working directory for job payloads, falling back to the current directory.
    pub fn working_dir(&self) -> Result<PathBuf> {
        match &self.download_dir {
            Some(p) => Ok(p.clone()),
            None => Ok(std::env::current_dir()?),
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("dirseed")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from an explicit path. The file must exist.
pub fn load_from_path(path: &Path) -> Result<DirseedConfig> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("read config: {}", path.display()))?;
    let mut cfg: DirseedConfig =
        toml::from_str(&data).with_context(|| format!("parse config: {}", path.display()))?;
    if let Some(parent) = path.parent() {
        cfg.resolve_paths(parent);
    }
    cfg.validate()?;
    Ok(cfg)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<(DirseedConfig, PathBuf)> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = DirseedConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok((default_cfg, path));
    }

    let cfg = load_from_path(&path)?;
    Ok((cfg, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        load_limit = 10
        hashing_limit = 2
        tick_interval_ms = 2000
    "#;

    #[test]
    fn default_config_values() {
        let cfg = DirseedConfig::default();
        assert_eq!(cfg.load_limit, 10);
        assert_eq!(cfg.hashing_limit, 2);
        assert_eq!(cfg.tick_interval_ms, 2000);
        assert_eq!(cfg.descriptor_pattern, "*.torrent");
        assert!(!cfg.skip_verification);
        assert_eq!(cfg.failed_paths.policy, FailedPathMode::Permanent);
        cfg.validate().unwrap();
    }

    #[test]
    fn config_toml_roundtrip() {
        let mut cfg = DirseedConfig::default();
        cfg.watch_dirs = vec![PathBuf::from("/srv/torrents")];
        let toml = toml::to_string_pretty(&cfg).unwrap();
        let parsed: DirseedConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.watch_dirs, cfg.watch_dirs);
        assert_eq!(parsed.load_limit, cfg.load_limit);
        assert_eq!(parsed.hashing_limit, cfg.hashing_limit);
        assert_eq!(parsed.engine, cfg.engine);
    }

    #[test]
    fn config_toml_minimal_uses_section_defaults() {
        let cfg: DirseedConfig = toml::from_str(MINIMAL).unwrap();
        assert!(cfg.watch_dirs.is_empty());
        assert_eq!(cfg.descriptor_pattern, "*.torrent");
        assert!(cfg.resume_file.is_none());
        assert_eq!(cfg.engine.listen_port, 6881);
        assert_eq!(cfg.failed_paths.retry_after_secs, 300);
    }

    #[test]
    fn config_toml_failed_paths_and_engine() {
        let toml = r#"
            watch_dirs = ["incoming", "/abs/dir"]
            load_limit = 4
            hashing_limit = 1
            tick_interval_ms = 500
            skip_verification = true

            [failed_paths]
            policy = "retry_after"
            retry_after_secs = 30

            [engine]
            listen_port = 51413
            user_agent = "test"
            max_peers = 8
        "#;
        let cfg: DirseedConfig = toml::from_str(toml).unwrap();
        assert!(cfg.skip_verification);
        assert_eq!(cfg.failed_paths.policy, FailedPathMode::RetryAfter);
        assert_eq!(
            cfg.failed_paths.to_policy(),
            FailedPathPolicy::RetryAfter(std::time::Duration::from_secs(30))
        );
        assert_eq!(cfg.engine.listen_port, 51413);
        assert_eq!(cfg.engine.max_peers, 8);
    }

    #[test]
    fn validate_rejects_zero_limits() {
        let mut cfg = DirseedConfig::default();
        cfg.load_limit = 0;
        assert!(cfg.validate().is_err());
        let mut cfg = DirseedConfig::default();
        cfg.hashing_limit = 0;
        assert!(cfg.validate().is_err());
        let mut cfg = DirseedConfig::default();
        cfg.descriptor_pattern = "[".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn load_from_path_resolves_relative_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
                watch_dirs = ["incoming", "/abs/dir"]
                resume_file = "state/resume.dat"
                load_limit = 10
                hashing_limit = 2
                tick_interval_ms = 2000
            "#,
        )
        .unwrap();
        let cfg = load_from_path(&path).unwrap();
        assert_eq!(cfg.watch_dirs[0], dir.path().join("incoming"));
        assert_eq!(cfg.watch_dirs[1], PathBuf::from("/abs/dir"));
        assert_eq!(cfg.resume_path().unwrap(), dir.path().join("state/resume.dat"));
    }

    #[test]
    fn load_from_missing_path_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_from_path(&dir.path().join("nope.toml")).is_err());
    }
}
