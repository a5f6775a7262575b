use std::path::{Path, PathBuf};
use std::time::Duration;

use tandem_core::registry::tandem_root;

/// Registry edits closer together than this trigger one reload.
pub const REGISTRY_DEBOUNCE: Duration = Duration::from_millis(500);

pub const DAEMON_SOCKET: &str = "daemon.sock";

pub fn projects_root(home: &Path) -> PathBuf {
    tandem_root(home).join("projects")
}

pub fn run_dir(home: &Path) -> PathBuf {
    tandem_root(home).join("run")
}

pub fn socket_path(home: &Path) -> PathBuf {
    tandem_root(home).join(DAEMON_SOCKET)
}
