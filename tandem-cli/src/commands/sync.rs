//! `tandem sync`: one pass per project, through the daemon when it runs.

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Deserialize;
use serde_json::Value;

use tandem_core::{ProjectId, SyncDirection};
use tandem_daemon::{request_sync, DaemonError, Workspace};

/// Arguments for `tandem sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Project to sync (omit when using `--all`).
    pub project: Option<String>,

    /// Sync every registered project.
    #[arg(long, conflicts_with = "project")]
    pub all: bool,

    /// up, down or both; defaults to the project's registered direction.
    #[arg(long, short = 'd')]
    pub direction: Option<SyncDirection>,
}

/// The parts of a sync report the CLI prints.
#[derive(Debug, Deserialize)]
struct ReportView {
    project: String,
    success: bool,
    summary: String,
    #[serde(default)]
    uploaded: Vec<String>,
    #[serde(default)]
    downloaded: Vec<String>,
    #[serde(default)]
    removed: Vec<String>,
    #[serde(default)]
    conflicts: Vec<ConflictView>,
}

#[derive(Debug, Deserialize)]
struct ConflictView {
    path: String,
}

impl SyncArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let workspace = super::open_workspace(&home)?;

        let projects: Vec<ProjectId> = if self.all {
            workspace.projects().into_iter().map(|r| r.id).collect()
        } else {
            let name = self
                .project
                .clone()
                .context("provide a project id or use --all")?;
            vec![super::require_project(&workspace, &name)?]
        };
        if projects.is_empty() {
            println!("No projects registered. Run `tandem init` first.");
            return Ok(());
        }

        let mut failed = 0usize;
        for project in &projects {
            let report = run_one(&home, &workspace, project, self.direction)?;
            print_report(&report);
            if !report.success {
                failed += 1;
            }
        }
        if failed > 0 {
            bail!("{failed} of {} sync pass(es) failed", projects.len());
        }
        Ok(())
    }
}

fn run_one(
    home: &std::path::Path,
    workspace: &Workspace,
    project: &ProjectId,
    direction: Option<SyncDirection>,
) -> Result<ReportView> {
    let value = match request_sync(home, &project.0, direction) {
        Ok(value) => value,
        Err(DaemonError::DaemonNotRunning { .. }) => {
            let direction = direction
                .or_else(|| workspace.project(project).map(|r| r.default_direction))
                .unwrap_or_default();
            let report = super::runtime()?.block_on(workspace.service().sync(project, direction));
            serde_json::to_value(&report).context("failed to encode sync report")?
        }
        Err(err) => return Err(err).with_context(|| format!("daemon sync of '{project}' failed")),
    };
    parse_report(value)
}

fn parse_report(value: Value) -> Result<ReportView> {
    serde_json::from_value(value).context("unexpected sync report shape")
}

fn print_report(report: &ReportView) {
    if !report.success {
        println!("{} '{}' {}", "✗".red().bold(), report.project, report.summary);
        return;
    }
    println!("{} '{}' {}", "✓".green().bold(), report.project, report.summary);
    for path in &report.uploaded {
        println!("  ↑  {path}");
    }
    for path in &report.downloaded {
        println!("  ↓  {path}");
    }
    for path in &report.removed {
        println!("  ✗  {path}");
    }
    for conflict in &report.conflicts {
        println!("  {}  {} (kept local)", "!".yellow().bold(), conflict.path);
    }
}
