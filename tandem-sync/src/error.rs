//! Error types for tandem-sync.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use tandem_core::CoreError;

use crate::policy::FailureClass;

/// Errors reported by a [`RemoteEnvironment`](crate::remote::RemoteEnvironment).
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The sandbox refused or failed the call.
    #[error("{operation} rejected by sandbox: {message}")]
    Rejected {
        operation: &'static str,
        message: String,
    },

    /// No sandbox is known for the project.
    #[error("no sandbox registered for project '{0}'")]
    UnknownProject(String),

    /// Sandbox-side I/O failure.
    #[error("sandbox I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors reported by a [`LocalStore`](crate::remote::LocalStore).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("local store I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Contents are exchanged as UTF-8 text.
    #[error("file is not valid UTF-8: {path}")]
    NotUtf8 { path: PathBuf },

    /// The path does not belong to the store's namespace.
    #[error("path '{path}' is outside namespace '{namespace}'")]
    OutsideNamespace { path: String, namespace: String },

    #[error("no local replica registered for project '{0}'")]
    UnknownProject(String),
}

/// All errors that can abort a sync pass.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The sandbox never reported ready within the configured wait.
    #[error("sandbox for '{project}' not ready after {}s; retry later", waited.as_secs())]
    ReadinessTimeout { project: String, waited: Duration },

    /// Provisioning or readiness polling itself failed.
    #[error("sandbox for '{project}' could not be made ready: {message}")]
    Provision { project: String, message: String },

    /// An upload, download, removal or command call was rejected.
    #[error("{operation} failed for '{project}': {source}")]
    Transport {
        project: String,
        operation: &'static str,
        #[source]
        source: RemoteError,
    },

    /// A tracker command returned an unexpected result.
    #[error("tracker {operation} failed for '{project}': {message}")]
    Tracker {
        project: String,
        operation: &'static str,
        message: String,
    },

    /// Reading or mutating the local replica failed.
    #[error("local store {operation} failed for '{project}': {source}")]
    LocalStore {
        project: String,
        operation: &'static str,
        #[source]
        source: StoreError,
    },

    /// Baseline persistence I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error (baseline store).
    #[error("baseline JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("core error: {0}")]
    Core(#[from] CoreError),
}

impl SyncError {
    /// Which row of the failure policy table applies.
    pub fn class(&self) -> FailureClass {
        match self {
            SyncError::ReadinessTimeout { .. } | SyncError::Provision { .. } => {
                FailureClass::Readiness
            }
            SyncError::Transport { .. }
            | SyncError::Tracker { .. }
            | SyncError::LocalStore { .. } => FailureClass::Transport,
            SyncError::Io { .. } | SyncError::Json(_) | SyncError::Core(_) => {
                FailureClass::Persistence
            }
        }
    }
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
