//! `tandem project list` and `tandem project remove <project>`

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use tabled::{settings::Style, Table, Tabled};

use tandem_core::{registry, ProjectId};

/// Manage registered projects.
#[derive(Subcommand, Debug)]
pub enum ProjectCommand {
    /// List registered projects.
    List,

    /// Unregister a project and drop its baseline. Files are left alone.
    Remove(RemoveArgs),
}

#[derive(Args, Debug)]
pub struct RemoveArgs {
    /// Project id.
    pub project: String,
}

#[derive(Tabled)]
struct ProjectRow {
    #[tabled(rename = "project")]
    id: String,
    #[tabled(rename = "local")]
    local: String,
    #[tabled(rename = "sandbox")]
    sandbox: String,
    #[tabled(rename = "direction")]
    direction: String,
}

pub fn run(cmd: ProjectCommand) -> Result<()> {
    match cmd {
        ProjectCommand::List => list(),
        ProjectCommand::Remove(args) => remove(args),
    }
}

fn list() -> Result<()> {
    let home = super::home()?;
    let projects = registry::list_projects_at(&home).context("failed to load registry")?;

    if projects.is_empty() {
        println!("No projects registered.");
        println!("Run: tandem init <project> --local <dir> --remote <dir>");
        return Ok(());
    }

    let rows: Vec<ProjectRow> = projects
        .into_iter()
        .map(|p| ProjectRow {
            id: p.id.to_string(),
            local: p.local_root.display().to_string(),
            sandbox: p.remote_root.display().to_string(),
            direction: p.default_direction.to_string(),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    Ok(())
}

fn remove(args: RemoveArgs) -> Result<()> {
    let home = super::home()?;
    let workspace = super::open_workspace(&home)?;
    let project = ProjectId::from(args.project.as_str());

    if workspace.project(&project).is_some() {
        workspace
            .service()
            .reset_baseline(&project)
            .with_context(|| format!("failed to drop baseline for '{project}'"))?;
    }
    let removed = registry::remove_project_at(&home, &project)
        .with_context(|| format!("failed to remove '{project}'"))?;
    if removed {
        println!("✓ Removed '{project}'");
    } else {
        println!("'{project}' is not registered.");
    }
    Ok(())
}
