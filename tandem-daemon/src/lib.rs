//! tandem daemon: file watcher, debounced auto-sync and a Unix-socket control
//! protocol.

pub mod autosync;
mod error;
pub mod paths;
pub mod protocol;
mod runtime;
pub mod workspace;

pub use autosync::{AutoSync, PendingSync};
pub use error::DaemonError;
pub use protocol::{
    request_status, request_stop, request_sync, send_request, DaemonRequest, DaemonResponse,
};
pub use runtime::{init_tracing, run, start_blocking, SyncTimestamps};
pub use workspace::Workspace;
