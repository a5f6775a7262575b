//! `tandem diff <project>`: local changes the next pass would send.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

/// Arguments for `tandem diff`.
#[derive(Args, Debug)]
pub struct DiffArgs {
    /// Project to inspect.
    pub project: String,
}

impl DiffArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let workspace = super::open_workspace(&home)?;
        let project = super::require_project(&workspace, &self.project)?;

        let changes = super::runtime()?
            .block_on(workspace.service().local_changes(&project))
            .with_context(|| format!("diff failed for '{project}'"))?;

        if changes.is_empty() {
            println!("No pending local changes for '{project}'.");
            return Ok(());
        }
        for path in &changes.added_or_changed {
            println!("{} {path}", "+".green().bold());
        }
        for path in &changes.deleted {
            println!("{} {path}", "-".red().bold());
        }
        Ok(())
    }
}
