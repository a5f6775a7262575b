//! tandem core library: domain types, namespace/ignore rules, configuration,
//! project registry, errors.
//!
//! - [`types`]: manifests, baselines, directions, newtypes
//! - [`paths`]: [`PathTranslator`] and [`IgnoreFilter`]
//! - [`config`]: `~/.tandem/config.yaml`
//! - [`registry`]: `~/.tandem/projects/<id>.yaml`
//! - [`error`]: [`CoreError`]

pub mod config;
pub mod error;
pub mod paths;
pub mod registry;
pub mod types;

pub use config::SyncConfig;
pub use error::CoreError;
pub use paths::{IgnoreFilter, PathTranslator};
pub use types::{
    Baseline, ChangeSet, Manifest, ManifestEntry, ProjectId, ProjectRecord, RemoteChange,
    RemoteCommit, RemoteStatus, SyncDirection,
};
