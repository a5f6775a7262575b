//! Global configuration at `~/.tandem/config.yaml`.
//!
//! Every field is optional in the file; missing fields take the defaults
//! below, and a missing file means "all defaults".

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{io_err, CoreError};
use crate::paths::{IgnoreFilter, PathTranslator, DEFAULT_LOCAL_PREFIX, DEFAULT_REMOTE_PREFIX};

pub const CONFIG_FILE: &str = "config.yaml";
pub const DEFAULT_BASELINE_KEY_PREFIX: &str = "sync-baseline";

/// Readiness polling for the sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessConfig {
    pub timeout_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 120,
            poll_interval_ms: 2_000,
        }
    }
}

impl ReadinessConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Debounced local-to-remote sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoSyncConfig {
    pub quiet_period_ms: u64,
    pub redeploy_on_failure: bool,
}

impl Default for AutoSyncConfig {
    fn default() -> Self {
        Self {
            quiet_period_ms: 1_500,
            redeploy_on_failure: true,
        }
    }
}

impl AutoSyncConfig {
    pub fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.quiet_period_ms)
    }
}

/// Namespace prefixes of the two replicas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamespaceConfig {
    pub local: String,
    pub remote: String,
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            local: DEFAULT_LOCAL_PREFIX.to_string(),
            remote: DEFAULT_REMOTE_PREFIX.to_string(),
        }
    }
}

/// Transfer batching knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Files per page requested from the sandbox when downloading.
    pub download_page_size: usize,
    /// Above this many changed paths, one full download replaces per-path fetches.
    pub bulk_download_threshold: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            download_page_size: 200,
            bulk_download_threshold: 16,
        }
    }
}

/// Synthetic identity used for sandbox-side commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub committer_name: String,
    pub committer_email: String,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            committer_name: "tandem-sync".to_string(),
            committer_email: "sync@tandem.invalid".to_string(),
        }
    }
}

/// Whole configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub readiness: ReadinessConfig,
    pub autosync: AutoSyncConfig,
    pub namespaces: NamespaceConfig,
    pub transfer: TransferConfig,
    pub tracker: TrackerConfig,
    pub ignore: Vec<String>,
    pub baseline_key_prefix: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            readiness: ReadinessConfig::default(),
            autosync: AutoSyncConfig::default(),
            namespaces: NamespaceConfig::default(),
            transfer: TransferConfig::default(),
            tracker: TrackerConfig::default(),
            ignore: Vec::new(),
            baseline_key_prefix: DEFAULT_BASELINE_KEY_PREFIX.to_string(),
        }
    }
}

impl SyncConfig {
    pub fn translator(&self) -> PathTranslator {
        PathTranslator::new(&self.namespaces.local, &self.namespaces.remote)
    }

    pub fn ignore_filter(&self) -> Result<IgnoreFilter, CoreError> {
        IgnoreFilter::with_patterns(&self.ignore)
    }
}

/// `<home>/.tandem/config.yaml`: pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    home.join(".tandem").join(CONFIG_FILE)
}

/// Load configuration, falling back to defaults when the file is absent.
pub fn load_at(home: &Path) -> Result<SyncConfig, CoreError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Ok(SyncConfig::default());
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    if contents.trim().is_empty() {
        return Ok(SyncConfig::default());
    }
    let config: SyncConfig =
        serde_yaml::from_str(&contents).map_err(|source| CoreError::Parse { path, source })?;
    // Bad globs fail the load.
    config.ignore_filter()?;
    Ok(config)
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<SyncConfig, CoreError> {
    load_at(&crate::registry::home()?)
}

/// Write configuration atomically (`.tmp` + rename).
pub fn save_at(home: &Path, config: &SyncConfig) -> Result<(), CoreError> {
    let path = config_path_at(home);
    let yaml = serde_yaml::to_string(config)?;
    crate::registry::atomic_write(&path, &yaml)
}
