//! The sync orchestrator: one pass per call, baseline persisted last.
//!
//! ## Pass order
//!
//! 1. Wait for the sandbox (shared per project, see [`crate::readiness`]).
//! 2. Build the local manifest and diff it against the baseline.
//! 3. When downloading: snapshot the sandbox, list what changed since the
//!    baseline commit and fetch those contents.
//! 4. Plan transfers and conflicts ([`crate::reconcile`]).
//! 5. When uploading: send one upload batch and one removal batch, then
//!    snapshot so the pass's own uploads are part of the recorded commit.
//! 6. Apply downloads to the local replica.
//! 7. Persist `{manifest, remote_commit}`. Any earlier error skips this.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::Serialize;

use tandem_core::config::TransferConfig;
use tandem_core::paths::normalize_relative;
use tandem_core::{
    Baseline, ChangeSet, IgnoreFilter, Manifest, PathTranslator, ProjectId, RemoteChange,
    RemoteCommit, RemoteStatus, SyncConfig, SyncDirection,
};

use crate::baseline_store::BaselineStore;
use crate::error::{RemoteError, SyncError};
use crate::manifest::{diff_manifests, LocalSnapshot, ManifestBuilder};
use crate::policy::{policy_for, FailureClass};
use crate::readiness::{ReadinessGate, ReadyState};
use crate::reconcile::{confirmed_manifest, next_baseline, reconcile, Conflict, Plan, ReconcileInput};
use crate::remote::{LocalStore, RemoteEnvironment};
use crate::tracker::{ChangeTracker, CommitInfo};

/// Observable state of a project's sync pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    #[default]
    Idle,
    CheckingReadiness,
    FirstSync,
    IncrementalSync,
    Reconciling,
    Persisting,
    /// The last pass failed; the next pass leaves this state.
    Failed,
}

/// Outcome of one pass (or of a redeploy).
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub project: ProjectId,
    pub direction: SyncDirection,
    pub success: bool,
    pub summary: String,
    pub uploaded: Vec<String>,
    pub downloaded: Vec<String>,
    /// Paths removed on either side.
    pub removed: Vec<String>,
    pub conflicts: Vec<Conflict>,
    pub remote_commit: Option<RemoteCommit>,
    pub first_sync: bool,
    pub history_lost: bool,
    pub remote_log: Vec<CommitInfo>,
    pub failure: Option<FailureClass>,
    pub duration_ms: u64,
}

impl SyncReport {
    fn failed(
        project: &ProjectId,
        direction: SyncDirection,
        err: &SyncError,
        started: Instant,
    ) -> Self {
        let class = err.class();
        let policy = policy_for(class);
        let mut summary = format!("sync failed ({class}): {err}");
        if policy.keeps_baseline {
            summary.push_str("; baseline unchanged");
        }
        if policy.retryable {
            summary.push_str(", safe to retry");
        }
        Self {
            project: project.clone(),
            direction,
            success: false,
            summary,
            uploaded: Vec::new(),
            downloaded: Vec::new(),
            removed: Vec::new(),
            conflicts: Vec::new(),
            remote_commit: None,
            first_sync: false,
            history_lost: false,
            remote_log: Vec::new(),
            failure: Some(class),
            duration_ms: elapsed_ms(started),
        }
    }

    pub fn transferred(&self) -> usize {
        self.uploaded.len() + self.downloaded.len() + self.removed.len()
    }
}

/// Remote changes gathered for a pass, already filtered and fetched.
#[derive(Default)]
struct RemoteState {
    changes: Vec<RemoteChange>,
    contents: BTreeMap<String, String>,
    history_lost: bool,
    log: Vec<CommitInfo>,
}

pub struct SyncService {
    local: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteEnvironment>,
    tracker: Arc<dyn ChangeTracker>,
    baselines: Arc<dyn BaselineStore>,
    builder: ManifestBuilder,
    readiness: ReadinessGate,
    transfer: TransferConfig,
    phases: Mutex<HashMap<ProjectId, SyncPhase>>,
}

impl SyncService {
    pub fn new(
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteEnvironment>,
        tracker: Arc<dyn ChangeTracker>,
        baselines: Arc<dyn BaselineStore>,
        config: &SyncConfig,
    ) -> Result<Self, SyncError> {
        let builder = ManifestBuilder::new(config.translator(), config.ignore_filter()?);
        Ok(Self {
            readiness: ReadinessGate::new(Arc::clone(&remote), &config.readiness),
            local,
            remote,
            tracker,
            baselines,
            builder,
            transfer: config.transfer.clone(),
            phases: Mutex::new(HashMap::new()),
        })
    }

    pub fn translator(&self) -> &PathTranslator {
        self.builder.translator()
    }

    pub fn ignore_filter(&self) -> &IgnoreFilter {
        self.builder.filter()
    }

    pub fn phase(&self, project: &ProjectId) -> SyncPhase {
        self.phases
            .lock()
            .map(|phases| phases.get(project).copied().unwrap_or_default())
            .unwrap_or_default()
    }

    fn set_phase(&self, project: &ProjectId, phase: SyncPhase) {
        tracing::trace!(project = %project, ?phase, "phase");
        if let Ok(mut phases) = self.phases.lock() {
            phases.insert(project.clone(), phase);
        }
    }

    pub fn baseline(&self, project: &ProjectId) -> Result<Option<Baseline>, SyncError> {
        self.baselines.load(project)
    }

    /// Drop the baseline so the next pass is a first sync.
    pub fn reset_baseline(&self, project: &ProjectId) -> Result<bool, SyncError> {
        let cleared = self.baselines.clear(project)?;
        if cleared {
            tracing::info!(project = %project, "baseline reset");
        }
        Ok(cleared)
    }

    /// Pending local changes against the baseline. Never touches the sandbox.
    pub async fn local_changes(&self, project: &ProjectId) -> Result<ChangeSet, SyncError> {
        let previous = self
            .baselines
            .load(project)?
            .map(|b| b.manifest)
            .unwrap_or_default();
        let current = self.builder.build(self.local.as_ref(), project).await?;
        Ok(diff_manifests(&current, &previous))
    }

    /// Sandbox commits after the baseline commit (recent history when there
    /// is none).
    pub async fn remote_log(&self, project: &ProjectId) -> Result<Vec<CommitInfo>, SyncError> {
        let since = self.baselines.load(project)?.and_then(|b| b.remote_commit);
        self.readiness.wait_ready(project).await?;
        self.tracker.ensure_tracked(project).await?;
        self.tracker.commit_log(project, since.as_ref()).await
    }

    /// Run one pass; failures are folded into the report.
    pub async fn sync(&self, project: &ProjectId, direction: SyncDirection) -> SyncReport {
        let started = Instant::now();
        match self.try_sync(project, direction).await {
            Ok(report) => report,
            Err(err) => SyncReport::failed(project, direction, &err, started),
        }
    }

    pub async fn try_sync(
        &self,
        project: &ProjectId,
        direction: SyncDirection,
    ) -> Result<SyncReport, SyncError> {
        let started = Instant::now();
        match self.run_pass(project, direction, started).await {
            Ok(report) => {
                self.set_phase(project, SyncPhase::Idle);
                tracing::info!(
                    project = %project,
                    %direction,
                    uploaded = report.uploaded.len(),
                    downloaded = report.downloaded.len(),
                    removed = report.removed.len(),
                    conflicts = report.conflicts.len(),
                    duration_ms = report.duration_ms,
                    "sync complete"
                );
                Ok(report)
            }
            Err(err) => {
                self.set_phase(project, SyncPhase::Failed);
                let class = err.class();
                tracing::warn!(
                    project = %project,
                    %direction,
                    %class,
                    retryable = policy_for(class).retryable,
                    error = %err,
                    "sync failed"
                );
                Err(err)
            }
        }
    }

    /// Push every local file in one batch without diffing. The baseline is
    /// left as it is.
    pub async fn redeploy(&self, project: &ProjectId) -> SyncReport {
        let started = Instant::now();
        match self.try_redeploy(project, started).await {
            Ok(report) => report,
            Err(err) => {
                tracing::warn!(project = %project, error = %err, "redeploy failed");
                SyncReport::failed(project, SyncDirection::LocalToRemote, &err, started)
            }
        }
    }

    async fn try_redeploy(
        &self,
        project: &ProjectId,
        started: Instant,
    ) -> Result<SyncReport, SyncError> {
        self.readiness.wait_ready(project).await?;
        let local = self.builder.snapshot(self.local.as_ref(), project).await?;
        let uploaded: Vec<String> = local.manifest.paths().map(str::to_string).collect();
        self.upload(project, &local, &uploaded).await?;
        tracing::info!(project = %project, files = uploaded.len(), "redeployed");
        Ok(SyncReport {
            project: project.clone(),
            direction: SyncDirection::LocalToRemote,
            success: true,
            summary: format!("redeployed {} file(s)", uploaded.len()),
            uploaded,
            downloaded: Vec::new(),
            removed: Vec::new(),
            conflicts: Vec::new(),
            remote_commit: None,
            first_sync: false,
            history_lost: false,
            remote_log: Vec::new(),
            failure: None,
            duration_ms: elapsed_ms(started),
        })
    }

    // -----------------------------------------------------------------------
    // The pass
    // -----------------------------------------------------------------------

    async fn run_pass(
        &self,
        project: &ProjectId,
        direction: SyncDirection,
        started: Instant,
    ) -> Result<SyncReport, SyncError> {
        self.set_phase(project, SyncPhase::CheckingReadiness);
        let provisioned = self.readiness.wait_ready(project).await? == ReadyState::Provisioned;
        if provisioned {
            self.tracker.invalidate(project);
        }
        self.tracker.ensure_tracked(project).await?;

        let baseline = self.baselines.load(project)?;
        let first_sync = baseline.is_none();
        self.set_phase(
            project,
            if first_sync {
                SyncPhase::FirstSync
            } else {
                SyncPhase::IncrementalSync
            },
        );
        let since = baseline.as_ref().and_then(|b| b.remote_commit.clone());

        let mut remote_commit = since.clone();
        let remote_state = if direction.downloads() {
            let commit = self
                .tracker
                .snapshot(project, "tandem: capture sandbox edits")
                .await?;
            remote_commit = commit;
            if first_sync {
                self.remote_listing(project).await?
            } else {
                self.remote_changes(project, since.as_ref()).await?
            }
        } else if since.is_some() && !provisioned {
            let diff = self.tracker.changed_since(project, since.as_ref()).await?;
            RemoteState {
                history_lost: diff.history_lost,
                ..RemoteState::default()
            }
        } else {
            RemoteState::default()
        };

        let history_lost = since.is_some() && (provisioned || remote_state.history_lost);
        // A recreated sandbox holds nothing the baseline describes, so every
        // local file counts as new on the upload side.
        let repopulate = !first_sync && direction.uploads() && (provisioned || history_lost);
        if repopulate {
            tracing::warn!(
                project = %project,
                provisioned,
                history_lost,
                "sandbox was recreated; re-uploading the local replica"
            );
        }
        let previous = match &baseline {
            Some(b) if !repopulate => b.manifest.clone(),
            _ => Manifest::default(),
        };

        let local = self.builder.snapshot(self.local.as_ref(), project).await?;
        let local_changes = diff_manifests(&local.manifest, &previous);

        self.set_phase(project, SyncPhase::Reconciling);
        let plan = reconcile(&ReconcileInput {
            direction,
            local: &local.manifest,
            local_changes: &local_changes,
            remote_changes: &remote_state.changes,
            remote_contents: &remote_state.contents,
        });
        for conflict in &plan.conflicts {
            tracing::warn!(
                project = %project,
                path = %conflict.path,
                remote = %conflict.remote,
                "conflict: keeping local version"
            );
        }

        if direction.uploads() {
            self.upload(project, &local, &plan.upload).await?;
            self.remove_remote(project, &plan.remote_remove).await?;
            let message = format!(
                "tandem: sync {} file(s) from local",
                plan.upload.len() + plan.remote_remove.len()
            );
            let after_upload = self.tracker.snapshot(project, &message).await?;

            // A lost commit is never kept; without one the next download
            // compares every sandbox file by content.
            let kept = if history_lost { None } else { since.clone() };
            remote_commit = if direction.downloads() {
                after_upload
            } else if self.has_foreign_changes(project, kept.as_ref(), &plan).await? {
                tracing::info!(
                    project = %project,
                    "sandbox has edits not yet downloaded; keeping baseline commit"
                );
                kept
            } else {
                after_upload
            };
        }

        self.apply_downloads(project, &plan, &remote_state.contents)
            .await?;

        self.set_phase(project, SyncPhase::Persisting);
        let post = self.builder.build(self.local.as_ref(), project).await?;
        let confirmed = confirmed_manifest(&local.manifest, &plan, &remote_state.contents);
        let manifest = next_baseline(&previous, &confirmed, &post, &plan.deferred);
        self.baselines
            .save(project, &Baseline::new(manifest, remote_commit.clone()))?;

        let mut removed = plan.remote_remove.clone();
        removed.extend(plan.local_remove.iter().cloned());
        let report = SyncReport {
            project: project.clone(),
            direction,
            success: true,
            summary: String::new(),
            uploaded: plan.upload.clone(),
            downloaded: plan.local_write.clone(),
            removed,
            conflicts: plan.conflicts.clone(),
            remote_commit,
            first_sync,
            history_lost,
            remote_log: remote_state.log,
            failure: None,
            duration_ms: elapsed_ms(started),
        };
        Ok(SyncReport {
            summary: summarize(&report),
            ..report
        })
    }

    // -----------------------------------------------------------------------
    // Remote side
    // -----------------------------------------------------------------------

    /// First sync: every sandbox file counts as added.
    async fn remote_listing(&self, project: &ProjectId) -> Result<RemoteState, SyncError> {
        let records = self
            .remote
            .download_all(project, None, self.transfer.download_page_size)
            .await
            .map_err(transport(project, "download"))?;

        let mut state = RemoteState::default();
        for record in records {
            let Some(relative) = self.translator().relative_from_remote(&record.path) else {
                continue;
            };
            if self.ignore_filter().is_ignored(&relative) {
                continue;
            }
            state.changes.push(RemoteChange::added(relative.clone()));
            state.contents.insert(relative, record.content);
        }
        Ok(state)
    }

    async fn remote_changes(
        &self,
        project: &ProjectId,
        since: Option<&RemoteCommit>,
    ) -> Result<RemoteState, SyncError> {
        let diff = self.tracker.changed_since(project, since).await?;
        if diff.history_lost && since.is_some() {
            let policy = policy_for(FailureClass::HistoryInconsistency);
            tracing::warn!(
                project = %project,
                aborts = policy.aborts_pass,
                "sandbox history lost; comparing every sandbox file by content"
            );
        }

        let changes: Vec<RemoteChange> = diff
            .changes
            .into_iter()
            .filter_map(|change| {
                let path = normalize_relative(&change.path)?;
                (!self.ignore_filter().is_ignored(&path)).then_some(RemoteChange {
                    path,
                    status: change.status,
                })
            })
            .collect();

        let wanted: Vec<String> = changes
            .iter()
            .filter(|c| c.status != RemoteStatus::Deleted)
            .map(|c| c.path.clone())
            .collect();
        let contents = self.fetch(project, &wanted).await?;

        let log = if changes.is_empty() {
            Vec::new()
        } else {
            match self.tracker.commit_log(project, since).await {
                Ok(log) => log,
                Err(e) => {
                    tracing::debug!(project = %project, error = %e, "commit log unavailable");
                    Vec::new()
                }
            }
        };

        Ok(RemoteState {
            changes,
            contents,
            history_lost: diff.history_lost,
            log,
        })
    }

    /// Contents of `paths`; above the bulk threshold one full download
    /// replaces per-path fetches.
    async fn fetch(
        &self,
        project: &ProjectId,
        paths: &[String],
    ) -> Result<BTreeMap<String, String>, SyncError> {
        if paths.is_empty() {
            return Ok(BTreeMap::new());
        }
        let wanted: BTreeSet<&str> = paths.iter().map(String::as_str).collect();
        let page_size = self.transfer.download_page_size;

        let records = if paths.len() > self.transfer.bulk_download_threshold {
            self.remote
                .download_all(project, None, page_size)
                .await
                .map_err(transport(project, "download"))?
        } else {
            let mut records = Vec::new();
            for path in paths {
                let remote_path = self.translator().remote_from_relative(path);
                records.extend(
                    self.remote
                        .download_all(project, Some(&remote_path), page_size)
                        .await
                        .map_err(transport(project, "download"))?,
                );
            }
            records
        };

        Ok(records
            .into_iter()
            .filter_map(|record| {
                let relative = self.translator().relative_from_remote(&record.path)?;
                wanted
                    .contains(relative.as_str())
                    .then_some((relative, record.content))
            })
            .collect())
    }

    /// Whether the sandbox changed anything this pass did not write itself.
    async fn has_foreign_changes(
        &self,
        project: &ProjectId,
        since: Option<&RemoteCommit>,
        plan: &Plan,
    ) -> Result<bool, SyncError> {
        let diff = self.tracker.changed_since(project, since).await?;
        // Without a commit every sandbox file is listed; any the pass did not
        // write itself was never downloaded.
        if diff.history_lost && since.is_some() {
            return Ok(true);
        }
        let own: BTreeSet<&str> = plan
            .upload
            .iter()
            .chain(plan.remote_remove.iter())
            .map(String::as_str)
            .collect();
        Ok(diff.changes.iter().any(|change| {
            normalize_relative(&change.path).is_some_and(|path| {
                !own.contains(path.as_str()) && !self.ignore_filter().is_ignored(&path)
            })
        }))
    }

    async fn upload(
        &self,
        project: &ProjectId,
        local: &LocalSnapshot,
        paths: &[String],
    ) -> Result<(), SyncError> {
        if paths.is_empty() {
            return Ok(());
        }
        let batch: BTreeMap<String, String> = paths
            .iter()
            .filter_map(|path| {
                let content = local.content(path)?;
                Some((
                    self.translator().remote_from_relative(path),
                    content.to_string(),
                ))
            })
            .collect();
        tracing::debug!(project = %project, files = batch.len(), "uploading");
        self.remote
            .upload_batch(project, batch)
            .await
            .map_err(transport(project, "upload"))
    }

    async fn remove_remote(&self, project: &ProjectId, paths: &[String]) -> Result<(), SyncError> {
        if paths.is_empty() {
            return Ok(());
        }
        tracing::debug!(project = %project, files = paths.len(), "removing from sandbox");
        self.remote
            .remove_batch(project, paths)
            .await
            .map_err(transport(project, "remove"))
    }

    // -----------------------------------------------------------------------
    // Local side
    // -----------------------------------------------------------------------

    async fn apply_downloads(
        &self,
        project: &ProjectId,
        plan: &Plan,
        contents: &BTreeMap<String, String>,
    ) -> Result<(), SyncError> {
        for path in &plan.local_write {
            let Some(content) = contents.get(path) else {
                continue;
            };
            let local_path = self.translator().local_from_relative(path);
            self.local
                .upsert_file(project, &local_path, content)
                .await
                .map_err(|source| SyncError::LocalStore {
                    project: project.to_string(),
                    operation: "upsert_file",
                    source,
                })?;
        }
        for path in &plan.local_remove {
            let local_path = self.translator().local_from_relative(path);
            self.local
                .delete_file(project, &local_path)
                .await
                .map_err(|source| SyncError::LocalStore {
                    project: project.to_string(),
                    operation: "delete_file",
                    source,
                })?;
        }
        Ok(())
    }
}

fn transport(project: &ProjectId, operation: &'static str) -> impl FnOnce(RemoteError) -> SyncError {
    let project = project.to_string();
    move |source| SyncError::Transport {
        project,
        operation,
        source,
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn summarize(report: &SyncReport) -> String {
    let mut summary = format!(
        "{} ({}): {} uploaded, {} downloaded, {} removed",
        if report.first_sync {
            "first sync"
        } else {
            "synced"
        },
        report.direction,
        report.uploaded.len(),
        report.downloaded.len(),
        report.removed.len(),
    );
    if !report.conflicts.is_empty() {
        summary.push_str(&format!(
            ", {} conflict(s) kept local",
            report.conflicts.len()
        ));
    }
    if report.history_lost {
        summary.push_str(", sandbox history was reset");
    }
    if let Some(commit) = &report.remote_commit {
        summary.push_str(&format!(" @ {}", commit.short()));
    }
    if !report.remote_log.is_empty() {
        let messages: Vec<&str> = report
            .remote_log
            .iter()
            .take(3)
            .map(|c| c.message.as_str())
            .collect();
        summary.push_str(&format!(" [{}]", messages.join("; ")));
    }
    summary
}
