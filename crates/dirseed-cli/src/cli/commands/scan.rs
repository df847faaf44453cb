//! `dirseed scan` – list discovered descriptors, newest first.

use anyhow::Result;
use dirseed_core::config::DirseedConfig;
use dirseed_core::scanner::{sort_newest_first, DescriptorSource, FsScanner};
use std::time::UNIX_EPOCH;

pub fn run_scan(cfg: &DirseedConfig) -> Result<()> {
    let mut found = FsScanner::new().discover(&cfg.watch_dirs, &cfg.descriptor_pattern)?;
    sort_newest_first(&mut found);
    if found.is_empty() {
        println!("No descriptors found.");
        return Ok(());
    }
    println!("{:<12} {}", "CREATED", "PATH");
    for d in found {
        let created = d
            .created
            .duration_since(UNIX_EPOCH)
            .map(|t| t.as_secs().to_string())
            .unwrap_or_else(|_| "-".to_string());
        println!("{:<12} {}", created, d.path.display());
    }
    Ok(())
}
