pub mod daemon;
pub mod diff;
pub mod init;
pub mod log;
pub mod project;
pub mod reset;
pub mod status;
pub mod sync;

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use tandem_core::ProjectId;
use tandem_daemon::Workspace;

pub fn home() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

/// Registered projects wired to the directory adapters.
pub fn open_workspace(home: &std::path::Path) -> Result<Workspace> {
    Workspace::open_at(home).context("failed to load ~/.tandem")
}

/// `project` if registered, with a hint otherwise.
pub fn require_project(workspace: &Workspace, project: &str) -> Result<ProjectId> {
    let id = ProjectId::from(project);
    workspace
        .require(&id)
        .with_context(|| format!("run `tandem init {project} --local <dir> --remote <dir>` first"))?;
    Ok(id)
}

/// Single-threaded runtime for the async sync engine.
pub fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")
}

/// "just now", "5m ago", "3h ago", "2d ago".
pub fn format_age(at: DateTime<Utc>) -> String {
    let secs = (Utc::now() - at).num_seconds().max(0);
    match secs {
        0..=59 => "just now".to_string(),
        60..=3_599 => format!("{}m ago", secs / 60),
        3_600..=86_399 => format!("{}h ago", secs / 3_600),
        _ => format!("{}d ago", secs / 86_400),
    }
}
