//! Registered projects wired to the shipped adapters: a [`DirStore`] over each
//! local root, a [`LocalSandbox`] over each sandbox root, git history inside
//! the sandbox and JSON baselines under `~/.tandem/baselines`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tandem_core::{config, registry, ProjectId, ProjectRecord, SyncConfig};
use tandem_sync::adapters::{DirStore, LocalSandbox};
use tandem_sync::{GitTracker, JsonFileBaselineStore, SyncService};

use crate::error::DaemonError;

pub struct Workspace {
    home: PathBuf,
    config: SyncConfig,
    local: Arc<DirStore>,
    sandbox: Arc<LocalSandbox>,
    service: Arc<SyncService>,
    projects: RwLock<BTreeMap<ProjectId, ProjectRecord>>,
}

impl Workspace {
    /// Load `~/.tandem/config.yaml` and every registered project.
    pub fn open_at(home: &Path) -> Result<Self, DaemonError> {
        let config = config::load_at(home)?;
        let workspace = Self::with_config(home, config)?;
        workspace.refresh()?;
        Ok(workspace)
    }

    /// An empty workspace; projects are added with [`Workspace::register`].
    pub fn with_config(home: &Path, config: SyncConfig) -> Result<Self, DaemonError> {
        let local = Arc::new(DirStore::new(config.translator()));
        let sandbox = Arc::new(LocalSandbox::new(config.translator()));
        let tracker = Arc::new(
            GitTracker::new(sandbox.clone(), config.tracker.clone()).with_exclusions(&config.ignore),
        );
        let baselines = Arc::new(JsonFileBaselineStore::at_home(
            home,
            &config.baseline_key_prefix,
        ));
        let service = SyncService::new(local.clone(), sandbox.clone(), tracker, baselines, &config)?;
        Ok(Self {
            home: home.to_path_buf(),
            config,
            local,
            sandbox,
            service: Arc::new(service),
            projects: RwLock::new(BTreeMap::new()),
        })
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn service(&self) -> &Arc<SyncService> {
        &self.service
    }

    pub fn register(&self, record: ProjectRecord) {
        self.local
            .register(record.id.clone(), record.local_root.clone());
        self.sandbox
            .register(record.id.clone(), record.remote_root.clone());
        let mut projects = self.projects.write().unwrap_or_else(|p| p.into_inner());
        projects.insert(record.id.clone(), record);
    }

    /// Re-read the registry. Returns projects that are new or whose roots
    /// changed.
    pub fn refresh(&self) -> Result<Vec<ProjectRecord>, DaemonError> {
        let records = registry::list_projects_at(&self.home)?;
        let mut changed = Vec::new();
        for record in records {
            let known = self.project(&record.id);
            let same = known.is_some_and(|k| {
                k.local_root == record.local_root && k.remote_root == record.remote_root
            });
            if !same {
                tracing::info!(
                    project = %record.id,
                    local = %record.local_root.display(),
                    "project registered"
                );
                self.register(record.clone());
                changed.push(record);
            }
        }
        Ok(changed)
    }

    pub fn project(&self, id: &ProjectId) -> Option<ProjectRecord> {
        let projects = self.projects.read().unwrap_or_else(|p| p.into_inner());
        projects.get(id).cloned()
    }

    pub fn require(&self, id: &ProjectId) -> Result<ProjectRecord, DaemonError> {
        self.project(id)
            .ok_or_else(|| DaemonError::UnknownProject(id.to_string()))
    }

    pub fn projects(&self) -> Vec<ProjectRecord> {
        let projects = self.projects.read().unwrap_or_else(|p| p.into_inner());
        projects.values().cloned().collect()
    }

    /// The project whose local root contains `path`, with `path` expressed in
    /// the local namespace (`/dapp/...`).
    pub fn locate_local(&self, path: &Path) -> Option<(ProjectId, String)> {
        let projects = self.projects.read().unwrap_or_else(|p| p.into_inner());
        projects.values().find_map(|record| {
            let relative = strip_root(path, &record.local_root)?;
            Some((
                record.id.clone(),
                self.config.translator().local_from_relative(&relative),
            ))
        })
    }
}

/// `path` below `root` as a slash-separated string. Also tries the
/// canonical form of `root`, since watchers report resolved paths.
fn strip_root(path: &Path, root: &Path) -> Option<String> {
    let rest: PathBuf = match path.strip_prefix(root) {
        Ok(rest) => rest.to_path_buf(),
        Err(_) => {
            let canonical = std::fs::canonicalize(root).ok()?;
            path.strip_prefix(&canonical).ok()?.to_path_buf()
        }
    };
    let parts: Vec<&str> = rest.iter().filter_map(|s| s.to_str()).collect();
    (!parts.is_empty()).then(|| parts.join("/"))
}
