//! In-memory versioned sandbox used by the orchestrator tests.
//!
//! `FakeSandbox` implements both `RemoteEnvironment` and `ChangeTracker`, so a
//! pass can be driven end to end without git or a filesystem.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use tandem_core::{ProjectId, RemoteChange, RemoteCommit, SyncConfig};
use tandem_sync::adapters::MemoryStore;
use tandem_sync::{
    ChangeTracker, CommitInfo, DownloadPage, FileRecord, MemoryBaselineStore, RemoteDiff,
    RemoteEnvironment, RemoteError, ShellOutput, SyncError, SyncService,
};

const PREFIX: &str = "/app/";

struct Commit {
    id: RemoteCommit,
    message: String,
    tree: BTreeMap<String, String>,
}

#[derive(Default)]
struct State {
    files: BTreeMap<String, String>,
    commits: Vec<Commit>,
    next_id: u64,
    ready: bool,
    provisionable: bool,
    provision_calls: usize,
    upload_batches: Vec<Vec<String>>,
    remove_batches: Vec<Vec<String>>,
    fail_uploads: bool,
}

pub struct FakeSandbox {
    state: Mutex<State>,
}

impl FakeSandbox {
    /// A sandbox that is already up.
    pub fn ready() -> Self {
        Self {
            state: Mutex::new(State {
                ready: true,
                provisionable: true,
                ..State::default()
            }),
        }
    }

    /// Down until provisioned.
    pub fn cold() -> Self {
        Self {
            state: Mutex::new(State {
                provisionable: true,
                ..State::default()
            }),
        }
    }

    /// Never becomes ready.
    pub fn broken() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn edit(&self, path: &str, content: &str) {
        self.lock().files.insert(path.to_string(), content.to_string());
    }

    pub fn delete(&self, path: &str) {
        self.lock().files.remove(path);
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.lock().files.get(path).cloned()
    }

    pub fn paths(&self) -> Vec<String> {
        self.lock().files.keys().cloned().collect()
    }

    /// Simulates a recreated sandbox: same files, no history.
    pub fn wipe_history(&self) {
        self.lock().commits.clear();
    }

    /// Simulates a torn-down sandbox: no files, no history, down until
    /// provisioned again.
    pub fn recreate_empty(&self) {
        let mut state = self.lock();
        state.files.clear();
        state.commits.clear();
        state.ready = false;
    }

    pub fn head(&self) -> Option<RemoteCommit> {
        self.lock().commits.last().map(|c| c.id.clone())
    }

    pub fn commit_count(&self) -> usize {
        self.lock().commits.len()
    }

    pub fn provision_calls(&self) -> usize {
        self.lock().provision_calls
    }

    pub fn upload_batches(&self) -> Vec<Vec<String>> {
        self.lock().upload_batches.clone()
    }

    pub fn remove_batches(&self) -> Vec<Vec<String>> {
        self.lock().remove_batches.clone()
    }

    /// The sandbox disappears and cannot be brought back.
    pub fn go_down(&self) {
        let mut state = self.lock();
        state.ready = false;
        state.provisionable = false;
    }

    pub fn fail_uploads(&self, fail: bool) {
        self.lock().fail_uploads = fail;
    }
}

fn relative(path: &str) -> Option<&str> {
    path.strip_prefix(PREFIX)
}

fn diff_trees(old: &BTreeMap<String, String>, new: &BTreeMap<String, String>) -> Vec<RemoteChange> {
    let mut changes = Vec::new();
    for (path, content) in new {
        match old.get(path) {
            None => changes.push(RemoteChange::added(path.clone())),
            Some(previous) if previous != content => {
                changes.push(RemoteChange::modified(path.clone()))
            }
            Some(_) => {}
        }
    }
    for path in old.keys() {
        if !new.contains_key(path) {
            changes.push(RemoteChange::deleted(path.clone()));
        }
    }
    changes
}

#[async_trait]
impl RemoteEnvironment for FakeSandbox {
    async fn is_ready(&self, _: &ProjectId) -> Result<bool, RemoteError> {
        Ok(self.lock().ready)
    }

    async fn provision(&self, _: &ProjectId) -> Result<(), RemoteError> {
        let mut state = self.lock();
        state.provision_calls += 1;
        if state.provisionable {
            state.ready = true;
        }
        Ok(())
    }

    async fn upload_batch(
        &self,
        _: &ProjectId,
        files: BTreeMap<String, String>,
    ) -> Result<(), RemoteError> {
        let mut state = self.lock();
        if state.fail_uploads {
            return Err(RemoteError::Rejected {
                operation: "upload_batch",
                message: "sandbox unreachable".into(),
            });
        }
        let mut batch = Vec::new();
        for (path, content) in files {
            let Some(rel) = relative(&path) else {
                return Err(RemoteError::Rejected {
                    operation: "upload_batch",
                    message: format!("{path} outside {PREFIX}"),
                });
            };
            batch.push(rel.to_string());
            state.files.insert(rel.to_string(), content);
        }
        state.upload_batches.push(batch);
        Ok(())
    }

    async fn download_page(
        &self,
        _: &ProjectId,
        prefix: Option<&str>,
        page_token: Option<&str>,
        page_size: usize,
    ) -> Result<DownloadPage, RemoteError> {
        let state = self.lock();
        let wanted = prefix.and_then(relative);
        let matching: Vec<FileRecord> = state
            .files
            .iter()
            .filter(|(path, _)| match wanted {
                None => true,
                Some(w) => path.as_str() == w || path.starts_with(&format!("{w}/")),
            })
            .map(|(path, content)| FileRecord::new(format!("{PREFIX}{path}"), content.clone()))
            .collect();
        let start: usize = page_token.and_then(|t| t.parse().ok()).unwrap_or(0);
        let end = (start + page_size.max(1)).min(matching.len());
        Ok(DownloadPage {
            files: matching.get(start..end).unwrap_or_default().to_vec(),
            next_page: (end < matching.len()).then(|| end.to_string()),
        })
    }

    async fn run_shell_command(&self, _: &ProjectId, command: &str) -> Result<ShellOutput, RemoteError> {
        Err(RemoteError::Rejected {
            operation: "run_shell_command",
            message: format!("fake sandbox has no shell: {command}"),
        })
    }

    async fn remove_batch(&self, _: &ProjectId, paths: &[String]) -> Result<(), RemoteError> {
        let mut state = self.lock();
        for path in paths {
            state.files.remove(path);
        }
        state.remove_batches.push(paths.to_vec());
        Ok(())
    }
}

#[async_trait]
impl ChangeTracker for FakeSandbox {
    async fn ensure_tracked(&self, _: &ProjectId) -> Result<(), SyncError> {
        Ok(())
    }

    async fn snapshot(
        &self,
        _: &ProjectId,
        message: &str,
    ) -> Result<Option<RemoteCommit>, SyncError> {
        let mut state = self.lock();
        let changed = match state.commits.last() {
            Some(head) => head.tree != state.files,
            None => !state.files.is_empty(),
        };
        if changed {
            state.next_id += 1;
            let commit = Commit {
                id: RemoteCommit::from(format!("{:040x}", state.next_id)),
                message: message.to_string(),
                tree: state.files.clone(),
            };
            state.commits.push(commit);
        }
        Ok(state.commits.last().map(|c| c.id.clone()))
    }

    async fn changed_since(
        &self,
        _: &ProjectId,
        since: Option<&RemoteCommit>,
    ) -> Result<RemoteDiff, SyncError> {
        let state = self.lock();
        let head_tree = state
            .commits
            .last()
            .map(|c| c.tree.clone())
            .unwrap_or_default();
        let base = since.and_then(|id| state.commits.iter().find(|c| &c.id == id));
        Ok(match base {
            Some(base) => RemoteDiff {
                changes: diff_trees(&base.tree, &head_tree),
                history_lost: false,
            },
            None => RemoteDiff {
                changes: head_tree.keys().map(RemoteChange::added).collect(),
                history_lost: true,
            },
        })
    }

    async fn commit_log(
        &self,
        _: &ProjectId,
        since: Option<&RemoteCommit>,
    ) -> Result<Vec<CommitInfo>, SyncError> {
        let state = self.lock();
        let start = since
            .and_then(|id| state.commits.iter().position(|c| &c.id == id))
            .map(|idx| idx + 1)
            .unwrap_or(0);
        Ok(state.commits[start..]
            .iter()
            .rev()
            .map(|c| CommitInfo {
                id: c.id.clone(),
                message: c.message.clone(),
            })
            .collect())
    }
}

/// Everything a test needs to drive passes.
pub struct Harness {
    pub project: ProjectId,
    pub local: Arc<MemoryStore>,
    pub sandbox: Arc<FakeSandbox>,
    pub baselines: Arc<MemoryBaselineStore>,
    pub service: SyncService,
}

impl Harness {
    pub fn new(sandbox: FakeSandbox) -> Self {
        Self::with_config(sandbox, SyncConfig::default())
    }

    pub fn with_config(sandbox: FakeSandbox, config: SyncConfig) -> Self {
        let local = Arc::new(MemoryStore::new());
        let sandbox = Arc::new(sandbox);
        let baselines = Arc::new(MemoryBaselineStore::new());
        let service = SyncService::new(
            local.clone(),
            sandbox.clone(),
            sandbox.clone(),
            baselines.clone(),
            &config,
        )
        .expect("service");
        Self {
            project: ProjectId::from("demo"),
            local,
            sandbox,
            baselines,
            service,
        }
    }

    /// Write `/dapp/<path>` in the local replica.
    pub fn write_local(&self, path: &str, content: &str) {
        self.local
            .insert(&self.project, &format!("/dapp/{path}"), content);
    }

    pub fn delete_local(&self, path: &str) {
        self.local.remove(&self.project, &format!("/dapp/{path}"));
    }

    pub fn read_local(&self, path: &str) -> Option<String> {
        self.local.get(&self.project, &format!("/dapp/{path}"))
    }
}
