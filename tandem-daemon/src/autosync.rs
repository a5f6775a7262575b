//! Debounced local-to-remote sync.
//!
//! Every qualifying edit restarts a per-project quiet-period timer. When a
//! timer elapses with no newer edit, one `LocalToRemote` pass runs and its
//! report goes to every caller that recorded an edit before it fired. Passes
//! for one project never overlap, whether they come from a timer, a flush or
//! [`AutoSync::sync_now`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::oneshot;

use tandem_core::config::AutoSyncConfig;
use tandem_core::{ProjectId, SyncDirection};
use tandem_sync::{policy_for, SyncReport, SyncService};

use crate::error::DaemonError;

/// Handle returned for a qualifying edit; resolves to the report of the pass
/// that picked the edit up.
#[derive(Debug)]
pub struct PendingSync {
    project: ProjectId,
    rx: oneshot::Receiver<SyncReport>,
}

impl PendingSync {
    pub fn project(&self) -> &ProjectId {
        &self.project
    }

    pub async fn report(self) -> Result<SyncReport, DaemonError> {
        self.rx
            .await
            .map_err(|_| DaemonError::ChannelClosed("auto-sync report"))
    }
}

struct Pending {
    generation: u64,
    waiters: Vec<oneshot::Sender<SyncReport>>,
}

struct Inner {
    service: Arc<SyncService>,
    quiet_period: Duration,
    redeploy_on_failure: bool,
    generation: AtomicU64,
    pending: Mutex<HashMap<ProjectId, Pending>>,
    active: Mutex<Option<ProjectId>>,
    passes: Mutex<HashMap<ProjectId, Arc<tokio::sync::Mutex<()>>>>,
}

#[derive(Clone)]
pub struct AutoSync {
    inner: Arc<Inner>,
}

impl AutoSync {
    pub fn new(service: Arc<SyncService>, config: &AutoSyncConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                service,
                quiet_period: config.quiet_period(),
                redeploy_on_failure: config.redeploy_on_failure,
                generation: AtomicU64::new(0),
                pending: Mutex::new(HashMap::new()),
                active: Mutex::new(None),
                passes: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn service(&self) -> &Arc<SyncService> {
        &self.inner.service
    }

    /// Record an edit to `local_path` (a local-namespace path such as
    /// `/dapp/src/app.ts`). Paths outside the namespace or ignored by the
    /// filter return `None` and do not touch the timer.
    pub fn record_edit(&self, project: &ProjectId, local_path: &str) -> Option<PendingSync> {
        let service = &self.inner.service;
        let relative = service.translator().relative_from_local(local_path)?;
        if service.ignore_filter().is_ignored(&relative) {
            return None;
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = lock(&self.inner.pending);
            let entry = pending.entry(project.clone()).or_insert_with(|| Pending {
                generation,
                waiters: Vec::new(),
            });
            entry.generation = generation;
            entry.waiters.push(tx);
        }
        tracing::debug!(project = %project, path = %relative, "edit recorded");

        let inner = Arc::clone(&self.inner);
        let timer_project = project.clone();
        tokio::spawn(async move {
            tokio::time::sleep(inner.quiet_period).await;
            if let Some(waiters) = inner.take_if_current(&timer_project, generation) {
                inner.deliver(&timer_project, waiters).await;
            }
        });

        Some(PendingSync {
            project: project.clone(),
            rx,
        })
    }

    /// Run the pending pass for `project` now. `None` when nothing is pending.
    pub async fn flush(&self, project: &ProjectId) -> Option<SyncReport> {
        let waiters = self.inner.take(project)?;
        Some(self.inner.deliver(project, waiters).await)
    }

    /// Switching projects flushes every other project's pending edits in
    /// the background instead of dropping them.
    pub fn on_active_project_changed(&self, project: Option<ProjectId>) {
        *lock(&self.inner.active) = project.clone();
        let others: Vec<ProjectId> = lock(&self.inner.pending)
            .keys()
            .filter(|p| Some(*p) != project.as_ref())
            .cloned()
            .collect();
        for other in others {
            tracing::debug!(project = %other, "active project changed; flushing");
            let this = self.clone();
            tokio::spawn(async move {
                this.flush(&other).await;
            });
        }
    }

    pub fn active_project(&self) -> Option<ProjectId> {
        lock(&self.inner.active).clone()
    }

    /// Projects with edits waiting for their quiet period.
    pub fn pending_projects(&self) -> Vec<ProjectId> {
        let mut projects: Vec<ProjectId> = lock(&self.inner.pending).keys().cloned().collect();
        projects.sort();
        projects
    }

    /// One pass in `direction`, serialized with debounced passes.
    pub async fn sync_now(&self, project: &ProjectId, direction: SyncDirection) -> SyncReport {
        let gate = self.inner.pass_gate(project);
        let _guard = gate.lock().await;
        self.inner.service.sync(project, direction).await
    }
}

impl Inner {
    fn take_if_current(
        &self,
        project: &ProjectId,
        generation: u64,
    ) -> Option<Vec<oneshot::Sender<SyncReport>>> {
        let mut pending = lock(&self.pending);
        if pending.get(project)?.generation != generation {
            return None;
        }
        pending.remove(project).map(|p| p.waiters)
    }

    fn take(&self, project: &ProjectId) -> Option<Vec<oneshot::Sender<SyncReport>>> {
        lock(&self.pending).remove(project).map(|p| p.waiters)
    }

    fn pass_gate(&self, project: &ProjectId) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(lock(&self.passes).entry(project.clone()).or_default())
    }

    async fn deliver(
        &self,
        project: &ProjectId,
        waiters: Vec<oneshot::Sender<SyncReport>>,
    ) -> SyncReport {
        let report = self.run(project).await;
        tracing::info!(
            project = %project,
            waiters = waiters.len(),
            success = report.success,
            summary = %report.summary,
            "auto-sync pass finished"
        );
        for waiter in waiters {
            let _ = waiter.send(report.clone());
        }
        report
    }

    async fn run(&self, project: &ProjectId) -> SyncReport {
        let gate = self.pass_gate(project);
        let _guard = gate.lock().await;

        let report = self
            .service
            .sync(project, SyncDirection::LocalToRemote)
            .await;
        let escalate = report
            .failure
            .is_some_and(|class| policy_for(class).escalate_to_redeploy);
        if !escalate || !self.redeploy_on_failure {
            return report;
        }

        tracing::warn!(
            project = %project,
            summary = %report.summary,
            "auto-sync failed; falling back to redeploy"
        );
        let fallback = self.service.redeploy(project).await;
        SyncReport {
            summary: format!(
                "{} (redeploy fallback after: {})",
                fallback.summary, report.summary
            ),
            ..fallback
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
