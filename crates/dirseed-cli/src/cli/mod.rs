//! CLI for the dirseed watch-folder daemon.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use dirseed_core::config::{self, DirseedConfig};
use dirseed_core::engine::ContentId;
use std::path::PathBuf;

use commands::{run_daemon, run_resume_list, run_resume_remove, run_scan};

/// Top-level CLI for dirseed.
#[derive(Debug, Parser)]
#[command(name = "dirseed")]
#[command(about = "dirseed: keep transfer jobs in sync with a watched folder", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Run the daemon until interrupted. SIGHUP reloads the watched folders.
    Run {
        /// Config file (default: ~/.config/dirseed/config.toml, created if missing).
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// List the descriptors the daemon would see, newest first.
    Scan {
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Inspect or edit the resume index.
    #[command(subcommand)]
    Resume(ResumeCommand),
}

#[derive(Debug, Subcommand)]
pub enum ResumeCommand {
    /// List stored entries.
    List {
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Drop the entry for one content id. Run while the daemon is stopped.
    Remove {
        /// Content id (64 hex characters).
        id: ContentId,
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,
    },
}

/// Explicit path must exist; otherwise use (and maybe create) the default file.
fn load_config(explicit: Option<PathBuf>) -> Result<(DirseedConfig, PathBuf)> {
    match explicit {
        Some(path) => Ok((config::load_from_path(&path)?, path)),
        None => config::load_or_init(),
    }
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();

        match cli.command {
            CliCommand::Run { config } => {
                let (cfg, path) = load_config(config)?;
                tracing::debug!("loaded config from {}: {:?}", path.display(), cfg);
                run_daemon(cfg, path).await?;
            }
            CliCommand::Scan { config } => {
                let (cfg, _) = load_config(config)?;
                run_scan(&cfg)?;
            }
            CliCommand::Resume(ResumeCommand::List { config }) => {
                let (cfg, _) = load_config(config)?;
                run_resume_list(&cfg)?;
            }
            CliCommand::Resume(ResumeCommand::Remove { id, config }) => {
                let (cfg, _) = load_config(config)?;
                run_resume_remove(&cfg, &id)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
