//! CLI command handlers, one file per command.

mod resume;
mod run;
mod scan;

pub use resume::{run_resume_list, run_resume_remove};
pub use run::run_daemon;
pub use scan::run_scan;
