//! tandem sync engine.
//!
//! Keeps a local replica and a disposable sandbox consistent by diffing
//! content manifests locally and a git history inside the sandbox.
//!
//! ## Public API
//!
//! - [`SyncService`]: one pass per call, see [`orchestrator`]
//! - [`LocalStore`] / [`RemoteEnvironment`]: the two replicas
//! - [`ChangeTracker`] / [`GitTracker`]: remote change detection
//! - [`BaselineStore`]: last confirmed `{manifest, remote_commit}`
//! - [`adapters`]: directory, in-memory and local-sandbox implementations

pub mod adapters;
pub mod baseline_store;
pub mod error;
pub mod manifest;
pub mod orchestrator;
pub mod policy;
pub mod readiness;
pub mod reconcile;
pub mod remote;
pub mod tracker;

pub use baseline_store::{BaselineStore, JsonFileBaselineStore, MemoryBaselineStore};
pub use error::{RemoteError, StoreError, SyncError};
pub use manifest::{build_manifest, diff_manifests, hash_content, ManifestBuilder};
pub use orchestrator::{SyncPhase, SyncReport, SyncService};
pub use policy::{policy_for, FailureClass, FailurePolicy};
pub use reconcile::{Conflict, LocalSide};
pub use remote::{DownloadPage, FileRecord, LocalStore, RemoteEnvironment, ShellOutput};
pub use tracker::{ChangeTracker, CommitInfo, GitTracker, RemoteDiff};
