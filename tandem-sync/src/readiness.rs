//! Waiting for a sandbox to become ready.
//!
//! Concurrent waits for the same project share one outstanding poll loop, so
//! a burst of passes provisions the sandbox at most once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::time::Instant;

use tandem_core::config::ReadinessConfig;
use tandem_core::ProjectId;

use crate::error::SyncError;
use crate::remote::RemoteEnvironment;

/// How the sandbox became ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    AlreadyReady,
    /// Provisioning was requested during this wait; the sandbox is fresh.
    Provisioned,
}

#[derive(Debug, Clone)]
enum ReadinessFailure {
    TimedOut(Duration),
    Provision(String),
}

impl ReadinessFailure {
    fn into_error(self, project: &ProjectId) -> SyncError {
        match self {
            ReadinessFailure::TimedOut(waited) => SyncError::ReadinessTimeout {
                project: project.to_string(),
                waited,
            },
            ReadinessFailure::Provision(message) => SyncError::Provision {
                project: project.to_string(),
                message,
            },
        }
    }
}

type ReadyFuture = Shared<BoxFuture<'static, Result<ReadyState, ReadinessFailure>>>;

pub struct ReadinessGate {
    remote: Arc<dyn RemoteEnvironment>,
    timeout: Duration,
    poll_interval: Duration,
    inflight: Mutex<HashMap<ProjectId, (u64, ReadyFuture)>>,
    generation: AtomicU64,
}

impl ReadinessGate {
    pub fn new(remote: Arc<dyn RemoteEnvironment>, config: &ReadinessConfig) -> Self {
        Self {
            remote,
            timeout: config.timeout(),
            poll_interval: config.poll_interval(),
            inflight: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Number of projects with a wait in progress.
    pub fn pending(&self) -> usize {
        self.inflight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub async fn wait_ready(&self, project: &ProjectId) -> Result<ReadyState, SyncError> {
        let (generation, wait) = {
            let mut inflight = self
                .inflight
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            match inflight.get(project) {
                Some((generation, wait)) => {
                    tracing::debug!(project = %project, "joining in-flight readiness wait");
                    (*generation, wait.clone())
                }
                None => {
                    let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                    let wait = poll_until_ready(
                        Arc::clone(&self.remote),
                        project.clone(),
                        self.timeout,
                        self.poll_interval,
                    )
                    .boxed()
                    .shared();
                    inflight.insert(project.clone(), (generation, wait.clone()));
                    (generation, wait)
                }
            }
        };

        let outcome = wait.await;

        {
            let mut inflight = self
                .inflight
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if inflight
                .get(project)
                .is_some_and(|(current, _)| *current == generation)
            {
                inflight.remove(project);
            }
        }

        outcome.map_err(|failure| failure.into_error(project))
    }
}

async fn poll_until_ready(
    remote: Arc<dyn RemoteEnvironment>,
    project: ProjectId,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<ReadyState, ReadinessFailure> {
    if probe(remote.as_ref(), &project).await {
        return Ok(ReadyState::AlreadyReady);
    }

    tracing::info!(project = %project, "sandbox not ready; provisioning");
    remote
        .provision(&project)
        .await
        .map_err(|e| ReadinessFailure::Provision(e.to_string()))?;

    let deadline = Instant::now() + timeout;
    loop {
        if probe(remote.as_ref(), &project).await {
            tracing::info!(project = %project, "sandbox ready");
            return Ok(ReadyState::Provisioned);
        }
        let now = Instant::now();
        if now >= deadline {
            tracing::warn!(project = %project, waited_secs = timeout.as_secs(), "sandbox readiness timed out");
            return Err(ReadinessFailure::TimedOut(timeout));
        }
        tokio::time::sleep(poll_interval.min(deadline - now)).await;
    }
}

/// A failing readiness probe counts as "not ready yet".
async fn probe(remote: &dyn RemoteEnvironment, project: &ProjectId) -> bool {
    match remote.is_ready(project).await {
        Ok(ready) => ready,
        Err(e) => {
            tracing::debug!(project = %project, error = %e, "readiness probe failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;

    use crate::error::RemoteError;
    use crate::remote::{DownloadPage, ShellOutput};

    /// Becomes ready a fixed number of probes after `provision`.
    struct SlowSandbox {
        probes_after_provision: usize,
        provisioned: AtomicUsize,
        probes: AtomicUsize,
    }

    impl SlowSandbox {
        fn new(probes_after_provision: usize) -> Self {
            Self {
                probes_after_provision,
                provisioned: AtomicUsize::new(0),
                probes: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl RemoteEnvironment for SlowSandbox {
        async fn is_ready(&self, _: &ProjectId) -> Result<bool, RemoteError> {
            if self.provisioned.load(Ordering::SeqCst) == 0 {
                return Ok(false);
            }
            let seen = self.probes.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(seen > self.probes_after_provision)
        }
        async fn provision(&self, _: &ProjectId) -> Result<(), RemoteError> {
            self.provisioned.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn upload_batch(
            &self,
            _: &ProjectId,
            _: BTreeMap<String, String>,
        ) -> Result<(), RemoteError> {
            Ok(())
        }
        async fn download_page(
            &self,
            _: &ProjectId,
            _: Option<&str>,
            _: Option<&str>,
            _: usize,
        ) -> Result<DownloadPage, RemoteError> {
            Ok(DownloadPage::default())
        }
        async fn run_shell_command(
            &self,
            _: &ProjectId,
            _: &str,
        ) -> Result<ShellOutput, RemoteError> {
            Ok(ShellOutput::default())
        }
    }

    fn config(timeout_secs: u64) -> ReadinessConfig {
        ReadinessConfig {
            timeout_secs,
            poll_interval_ms: 1_000,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_waits_provision_once() {
        let sandbox = Arc::new(SlowSandbox::new(3));
        let gate = Arc::new(ReadinessGate::new(sandbox.clone(), &config(60)));
        let project = ProjectId::from("demo");

        let waits: Vec<_> = (0..4)
            .map(|_| {
                let gate = Arc::clone(&gate);
                let project = project.clone();
                tokio::spawn(async move { gate.wait_ready(&project).await })
            })
            .collect();
        for wait in waits {
            let state = wait.await.unwrap().unwrap();
            assert_eq!(state, ReadyState::Provisioned);
        }

        assert_eq!(sandbox.provisioned.load(Ordering::SeqCst), 1);
        assert_eq!(gate.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_when_never_ready() {
        let sandbox = Arc::new(SlowSandbox::new(usize::MAX));
        let gate = ReadinessGate::new(sandbox, &config(5));
        let err = gate.wait_ready(&ProjectId::from("demo")).await.unwrap_err();
        assert!(matches!(err, SyncError::ReadinessTimeout { .. }), "got {err}");
        assert_eq!(gate.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn ready_sandbox_skips_provisioning() {
        let sandbox = Arc::new(SlowSandbox::new(0));
        sandbox.provisioned.store(1, Ordering::SeqCst);
        let gate = ReadinessGate::new(sandbox.clone(), &config(5));
        let state = gate.wait_ready(&ProjectId::from("demo")).await.unwrap();
        assert_eq!(state, ReadyState::AlreadyReady);
        assert_eq!(sandbox.provisioned.load(Ordering::SeqCst), 1);
    }
}
