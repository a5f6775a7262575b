//! `tandem init <project> --local <dir> --remote <dir> [--direction ...]`

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;

use tandem_core::{registry, ProjectId, SyncDirection};

/// Register a project in `~/.tandem/projects/`.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Project id; becomes the registry file name and baseline key.
    pub project: String,

    /// Local replica root (must exist).
    #[arg(long)]
    pub local: PathBuf,

    /// Sandbox code directory (created on first sync if missing).
    #[arg(long)]
    pub remote: PathBuf,

    /// Default direction for `tandem sync`: up, down or both.
    #[arg(long, short = 'd')]
    pub direction: Option<SyncDirection>,
}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let local = self
            .local
            .canonicalize()
            .with_context(|| format!("cannot resolve path '{}'", self.local.display()))?;
        let remote = absolute(&self.remote)?;

        let record = registry::init_at(
            &home,
            ProjectId::from(self.project.as_str()),
            local,
            remote,
            self.direction,
        )
        .with_context(|| format!("failed to init '{}'", self.project))?;

        println!("✓ Registered '{}'", record.id);
        println!("  local:   {}", record.local_root.display());
        println!("  sandbox: {}", record.remote_root.display());
        println!("  Saved to: ~/.tandem/projects/{}.yaml", record.id);
        Ok(())
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if let Ok(canonical) = path.canonicalize() {
        return Ok(canonical);
    }
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("cannot read current directory")?;
    Ok(cwd.join(path))
}
