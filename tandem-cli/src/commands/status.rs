//! `tandem status`: last sync and pending local changes per project.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use tandem_daemon::{send_request, DaemonRequest, Workspace};

/// Arguments for `tandem status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum SyncState {
    NeverSynced,
    Current,
    Pending,
    Unavailable,
}

#[derive(Debug, Serialize)]
struct ProjectStatus {
    id: String,
    status: SyncState,
    local_root: String,
    remote_root: String,
    direction: String,
    last_sync_at: Option<String>,
    last_sync_age: String,
    remote_commit: Option<String>,
    pending_changes: Option<usize>,
    detail: String,
}

#[derive(Serialize)]
struct StatusSummary {
    projects: usize,
    pending: usize,
    daemon_running: bool,
}

#[derive(Serialize)]
struct StatusReport {
    summary: StatusSummary,
    projects: Vec<ProjectStatus>,
}

#[derive(Tabled)]
struct StatusTableRow {
    #[tabled(rename = "project")]
    project: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "detail")]
    detail: String,
    #[tabled(rename = "last sync")]
    last_sync: String,
    #[tabled(rename = "commit")]
    commit: String,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let workspace = super::open_workspace(&home)?;
        let daemon_running = send_request(&home, &DaemonRequest::new("status"))
            .map(|r| r.ok)
            .unwrap_or(false);

        let projects = build_rows(&workspace)?;
        let report = StatusReport {
            summary: StatusSummary {
                projects: projects.len(),
                pending: projects
                    .iter()
                    .filter(|p| p.status != SyncState::Current)
                    .count(),
                daemon_running,
            },
            projects,
        };

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to serialize status JSON")?
            );
            return Ok(());
        }
        print_table(report);
        Ok(())
    }
}

fn build_rows(workspace: &Workspace) -> Result<Vec<ProjectStatus>> {
    let runtime = super::runtime()?;
    let service = workspace.service();
    let mut rows = Vec::new();

    for record in workspace.projects() {
        let baseline = service
            .baseline(&record.id)
            .with_context(|| format!("failed to read baseline for '{}'", record.id))?;
        let pending = runtime.block_on(service.local_changes(&record.id));

        let (status, pending_changes, detail) = match (&baseline, pending) {
            (_, Err(err)) => (SyncState::Unavailable, None, err.to_string()),
            (None, Ok(changes)) => (
                SyncState::NeverSynced,
                Some(changes.len()),
                format!("{} local file(s) to send", changes.len()),
            ),
            (Some(_), Ok(changes)) if changes.is_empty() => {
                (SyncState::Current, Some(0), "up to date".to_string())
            }
            (Some(_), Ok(changes)) => (
                SyncState::Pending,
                Some(changes.len()),
                format!("{} local change(s)", changes.len()),
            ),
        };

        rows.push(ProjectStatus {
            id: record.id.to_string(),
            status,
            local_root: record.local_root.display().to_string(),
            remote_root: record.remote_root.display().to_string(),
            direction: record.default_direction.to_string(),
            last_sync_at: baseline.as_ref().map(|b| b.synced_at.to_rfc3339()),
            last_sync_age: baseline
                .as_ref()
                .map(|b| super::format_age(b.synced_at))
                .unwrap_or_else(|| "never".to_string()),
            remote_commit: baseline
                .as_ref()
                .and_then(|b| b.remote_commit.as_ref())
                .map(|c| c.short().to_string()),
            pending_changes,
            detail,
        });
    }
    Ok(rows)
}

fn print_table(report: StatusReport) {
    println!(
        "tandem v{} | {} projects | {} need sync | daemon {}",
        env!("CARGO_PKG_VERSION"),
        report.summary.projects,
        report.summary.pending,
        if report.summary.daemon_running {
            "running".green().to_string()
        } else {
            "stopped".bright_black().to_string()
        },
    );

    if report.projects.is_empty() {
        println!("No projects registered.");
        return;
    }

    let rows: Vec<StatusTableRow> = report
        .projects
        .into_iter()
        .map(|p| StatusTableRow {
            project: p.id,
            status: state_label(p.status),
            detail: p.detail,
            last_sync: p.last_sync_age,
            commit: p.remote_commit.unwrap_or_else(|| "-".to_string()),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    if report.summary.pending > 0 {
        println!("Run 'tandem sync --all' to bring projects up to date.");
    }
}

fn state_label(state: SyncState) -> String {
    match state {
        SyncState::NeverSynced => "NEVER SYNCED".bright_black().bold().to_string(),
        SyncState::Current => "CURRENT".green().bold().to_string(),
        SyncState::Pending => "PENDING".yellow().bold().to_string(),
        SyncState::Unavailable => "UNAVAILABLE".red().bold().to_string(),
    }
}
