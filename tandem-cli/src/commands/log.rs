//! `tandem log <project>`: sandbox commits since the last sync.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

/// Arguments for `tandem log`.
#[derive(Args, Debug)]
pub struct LogArgs {
    /// Project to inspect.
    pub project: String,
}

impl LogArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let workspace = super::open_workspace(&home)?;
        let project = super::require_project(&workspace, &self.project)?;

        let log = super::runtime()?
            .block_on(workspace.service().remote_log(&project))
            .with_context(|| format!("failed to read sandbox history for '{project}'"))?;

        if log.is_empty() {
            println!("No sandbox commits since the last sync of '{project}'.");
            return Ok(());
        }
        for commit in log {
            println!("{} {}", commit.id.short().yellow(), commit.message);
        }
        Ok(())
    }
}
