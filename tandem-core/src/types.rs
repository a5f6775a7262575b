//! Domain types shared by every tandem crate.
//!
//! Manifest paths are project-relative, slash-separated strings; filesystem
//! locations use `PathBuf`. All types round-trip through serde.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed project identifier; one local replica and one sandbox
/// belong to each project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(pub String);

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ProjectId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ProjectId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Opaque checkpoint identifier produced by the remote change tracker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteCommit(pub String);

impl RemoteCommit {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First seven characters, for summaries and log lines.
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(7)
            .map(|(idx, _)| idx)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl fmt::Display for RemoteCommit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for RemoteCommit {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RemoteCommit {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Which way a sync pass moves content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SyncDirection {
    LocalToRemote,
    RemoteToLocal,
    #[default]
    Both,
}

impl SyncDirection {
    pub fn uploads(self) -> bool {
        matches!(self, SyncDirection::LocalToRemote | SyncDirection::Both)
    }

    pub fn downloads(self) -> bool {
        matches!(self, SyncDirection::RemoteToLocal | SyncDirection::Both)
    }
}

impl fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncDirection::LocalToRemote => write!(f, "local-to-remote"),
            SyncDirection::RemoteToLocal => write!(f, "remote-to-local"),
            SyncDirection::Both => write!(f, "both"),
        }
    }
}

impl FromStr for SyncDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local-to-remote" | "up" | "push" => Ok(Self::LocalToRemote),
            "remote-to-local" | "down" | "pull" => Ok(Self::RemoteToLocal),
            "both" | "bidirectional" => Ok(Self::Both),
            other => Err(format!(
                "unknown direction '{other}'; expected: up, down, both"
            )),
        }
    }
}

/// Per-path status reported by the remote change tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteStatus {
    Added,
    Modified,
    Deleted,
}

impl fmt::Display for RemoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteStatus::Added => write!(f, "added"),
            RemoteStatus::Modified => write!(f, "modified"),
            RemoteStatus::Deleted => write!(f, "deleted"),
        }
    }
}

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

/// Content-addressed description of one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub path: String,
    pub hash: String,
    pub size: u64,
}

/// Snapshot of one replica: project-relative path to entry.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest(BTreeMap<String, ManifestEntry>);

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry keyed by its own path, replacing any previous one.
    pub fn insert(&mut self, entry: ManifestEntry) -> Option<ManifestEntry> {
        self.0.insert(entry.path.clone(), entry)
    }

    pub fn remove(&mut self, path: &str) -> Option<ManifestEntry> {
        self.0.remove(path)
    }

    pub fn get(&self, path: &str) -> Option<&ManifestEntry> {
        self.0.get(path)
    }

    pub fn hash_of(&self, path: &str) -> Option<&str> {
        self.0.get(path).map(|entry| entry.hash.as_str())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.0.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn entries(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.0.values()
    }

    /// Sum of all entry sizes in bytes.
    pub fn total_size(&self) -> u64 {
        self.0.values().map(|entry| entry.size).sum()
    }
}

impl FromIterator<ManifestEntry> for Manifest {
    fn from_iter<I: IntoIterator<Item = ManifestEntry>>(iter: I) -> Self {
        let mut manifest = Manifest::new();
        for entry in iter {
            manifest.insert(entry);
        }
        manifest
    }
}

/// Paths that differ between two manifests (or two remote commits).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChangeSet {
    pub added_or_changed: Vec<String>,
    pub deleted: Vec<String>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added_or_changed.is_empty() && self.deleted.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added_or_changed.len() + self.deleted.len()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.added_or_changed.iter().any(|p| p == path) || self.deleted.iter().any(|p| p == path)
    }
}

/// One path reported by the remote change tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteChange {
    pub path: String,
    pub status: RemoteStatus,
}

impl RemoteChange {
    pub fn added(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            status: RemoteStatus::Added,
        }
    }

    pub fn modified(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            status: RemoteStatus::Modified,
        }
    }

    pub fn deleted(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            status: RemoteStatus::Deleted,
        }
    }
}

// ---------------------------------------------------------------------------
// Baseline
// ---------------------------------------------------------------------------

/// Last state confirmed synchronized on both sides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Baseline {
    pub manifest: Manifest,
    pub remote_commit: Option<RemoteCommit>,
    pub synced_at: DateTime<Utc>,
}

impl Baseline {
    pub fn new(manifest: Manifest, remote_commit: Option<RemoteCommit>) -> Self {
        Self {
            manifest,
            remote_commit,
            synced_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Registry record
// ---------------------------------------------------------------------------

/// A registered project: where its local replica and sandbox live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub id: ProjectId,
    pub local_root: std::path::PathBuf,
    pub remote_root: std::path::PathBuf,
    #[serde(default)]
    pub default_direction: SyncDirection,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
