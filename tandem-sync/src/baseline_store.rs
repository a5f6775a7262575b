//! Baseline persistence: the last manifest and remote commit confirmed in
//! sync, one record per project.
//!
//! The file-backed store keeps a JSON document at
//! `<home>/.tandem/baselines/<prefix>-<project_id>.json`, written with the
//! same `.tmp` + rename pattern as the registry.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use tandem_core::config::DEFAULT_BASELINE_KEY_PREFIX;
use tandem_core::registry::tandem_root;
use tandem_core::{Baseline, Manifest, ProjectId, RemoteCommit};

use crate::error::{io_err, SyncError};

/// Where baselines are kept. Implementations replace a record as a whole.
pub trait BaselineStore: Send + Sync {
    /// `None` means the project has never completed a sync.
    fn load(&self, project: &ProjectId) -> Result<Option<Baseline>, SyncError>;

    fn save(&self, project: &ProjectId, baseline: &Baseline) -> Result<(), SyncError>;

    /// Returns `false` when there was nothing to clear.
    fn clear(&self, project: &ProjectId) -> Result<bool, SyncError>;
}

/// Storage key of a project's baseline: `<prefix>-<project_id>`.
pub fn baseline_key(prefix: &str, project: &ProjectId) -> String {
    format!("{prefix}-{}", project.0)
}

/// `<home>/.tandem/baselines`
pub fn baselines_dir_at(home: &Path) -> PathBuf {
    tandem_root(home).join("baselines")
}

/// Records written before `syncedAt` existed still load.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BaselineCompat {
    manifest: Manifest,
    #[serde(default)]
    remote_commit: Option<RemoteCommit>,
    #[serde(default)]
    synced_at: Option<DateTime<Utc>>,
}

impl From<BaselineCompat> for Baseline {
    fn from(compat: BaselineCompat) -> Self {
        Baseline {
            manifest: compat.manifest,
            remote_commit: compat.remote_commit,
            synced_at: compat.synced_at.unwrap_or_else(Utc::now),
        }
    }
}

// ---------------------------------------------------------------------------
// JSON files
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct JsonFileBaselineStore {
    dir: PathBuf,
    prefix: String,
}

impl JsonFileBaselineStore {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }

    /// Store rooted at `<home>/.tandem/baselines`.
    pub fn at_home(home: &Path, prefix: &str) -> Self {
        Self::new(baselines_dir_at(home), prefix)
    }

    pub fn path_for(&self, project: &ProjectId) -> PathBuf {
        self.dir
            .join(format!("{}.json", baseline_key(&self.prefix, project)))
    }
}

impl BaselineStore for JsonFileBaselineStore {
    fn load(&self, project: &ProjectId) -> Result<Option<Baseline>, SyncError> {
        let path = self.path_for(project);
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        let compat: BaselineCompat = serde_json::from_str(&contents)?;
        Ok(Some(compat.into()))
    }

    /// Writes to `<path>.tmp` then renames to `<path>`.
    fn save(&self, project: &ProjectId, baseline: &Baseline) -> Result<(), SyncError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| io_err(&self.dir, e))?;

        let path = self.path_for(project);
        let json = serde_json::to_string_pretty(baseline)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
        if let Err(e) = std::fs::rename(&tmp, &path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(io_err(&path, e));
        }
        Ok(())
    }

    fn clear(&self, project: &ProjectId) -> Result<bool, SyncError> {
        let path = self.path_for(project);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_err(&path, e)),
        }
    }
}

// ---------------------------------------------------------------------------
// In memory
// ---------------------------------------------------------------------------

/// Keeps serialized records so loads behave like the file store.
#[derive(Debug)]
pub struct MemoryBaselineStore {
    prefix: String,
    records: Mutex<HashMap<String, String>>,
}

impl MemoryBaselineStore {
    pub fn new() -> Self {
        Self::with_prefix(DEFAULT_BASELINE_KEY_PREFIX)
    }

    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .records
            .lock()
            .map(|records| records.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    fn poisoned() -> SyncError {
        io_err("<memory>", std::io::Error::other("baseline store lock poisoned"))
    }
}

impl Default for MemoryBaselineStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BaselineStore for MemoryBaselineStore {
    fn load(&self, project: &ProjectId) -> Result<Option<Baseline>, SyncError> {
        let key = baseline_key(&self.prefix, project);
        let records = self.records.lock().map_err(|_| Self::poisoned())?;
        match records.get(&key) {
            Some(json) => {
                let compat: BaselineCompat = serde_json::from_str(json)?;
                Ok(Some(compat.into()))
            }
            None => Ok(None),
        }
    }

    fn save(&self, project: &ProjectId, baseline: &Baseline) -> Result<(), SyncError> {
        let json = serde_json::to_string(baseline)?;
        let mut records = self.records.lock().map_err(|_| Self::poisoned())?;
        records.insert(baseline_key(&self.prefix, project), json);
        Ok(())
    }

    fn clear(&self, project: &ProjectId) -> Result<bool, SyncError> {
        let mut records = self.records.lock().map_err(|_| Self::poisoned())?;
        Ok(records
            .remove(&baseline_key(&self.prefix, project))
            .is_some())
    }
}
