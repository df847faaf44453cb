//! `dirseed resume` – inspect and edit the resume index.

use anyhow::Result;
use dirseed_core::config::DirseedConfig;
use dirseed_core::engine::ContentId;
use dirseed_core::resume_store::ResumeStore;

pub fn run_resume_list(cfg: &DirseedConfig) -> Result<()> {
    let path = cfg.resume_path()?;
    let entries = ResumeStore::new().entries(&path)?;
    if entries.is_empty() {
        println!("No resume entries in {}.", path.display());
    } else {
        println!("{:<64} {}", "ID", "BYTES");
        for (id, len) in entries {
            println!("{:<64} {}", id, len);
        }
    }
    Ok(())
}

pub fn run_resume_remove(cfg: &DirseedConfig, id: &ContentId) -> Result<()> {
    let path = cfg.resume_path()?;
    if !ResumeStore::new().remove(&path, id)? {
        anyhow::bail!("no resume entry for {}", id);
    }
    println!("Removed resume entry {}.", id);
    Ok(())
}
