//! `tandem reset <project>`

use anyhow::{Context, Result};
use clap::Args;

/// Arguments for `tandem reset`.
#[derive(Args, Debug)]
pub struct ResetArgs {
    /// Project whose baseline is dropped.
    pub project: String,
}

impl ResetArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let workspace = super::open_workspace(&home)?;
        let project = super::require_project(&workspace, &self.project)?;

        let dropped = workspace
            .service()
            .reset_baseline(&project)
            .with_context(|| format!("failed to reset '{project}'"))?;
        if dropped {
            println!("✓ Baseline dropped for '{project}'; the next sync is a first sync.");
        } else {
            println!("'{project}' has no baseline yet.");
        }
        Ok(())
    }
}
