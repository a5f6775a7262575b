//! tandem: keep a local replica and a disposable sandbox in sync.
//!
//! # Usage
//!
//! ```text
//! tandem init <project> --local <dir> --remote <dir> [--direction up|down|both]
//! tandem project list|remove <project>
//! tandem sync <project> [--direction ...]
//! tandem sync --all
//! tandem status [--json]
//! tandem diff <project>
//! tandem log <project>
//! tandem reset <project>
//! tandem daemon start|stop|status
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    daemon::DaemonCommand, diff::DiffArgs, init::InitArgs, log::LogArgs, project::ProjectCommand,
    reset::ResetArgs, status::StatusArgs, sync::SyncArgs,
};

#[derive(Parser, Debug)]
#[command(
    name = "tandem",
    version,
    about = "Bidirectional file sync between a local replica and a sandbox",
    long_about = None,
)]
struct Cli {
    /// Log sync activity to stderr (`RUST_LOG` also enables it).
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register a project with its local and sandbox roots.
    Init(InitArgs),

    /// Manage registered projects.
    Project {
        #[command(subcommand)]
        command: ProjectCommand,
    },

    /// Run one sync pass.
    Sync(SyncArgs),

    /// Show last sync and pending local changes per project.
    Status(StatusArgs),

    /// List local changes not yet synced.
    Diff(DiffArgs),

    /// Show sandbox commits since the last sync.
    Log(LogArgs),

    /// Drop a project's baseline so the next pass is a first sync.
    Reset(ResetArgs),

    /// Manage the background watcher.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.verbose || std::env::var_os("RUST_LOG").is_some() {
        tandem_daemon::init_tracing();
    }
    match cli.command {
        Commands::Init(args) => args.run(),
        Commands::Project { command } => commands::project::run(command),
        Commands::Sync(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Diff(args) => args.run(),
        Commands::Log(args) => args.run(),
        Commands::Reset(args) => args.run(),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}
