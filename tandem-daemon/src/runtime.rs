use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::time::Instant;

use tandem_core::{ProjectId, ProjectRecord, SyncDirection};
use tandem_sync::SyncReport;

use crate::autosync::AutoSync;
use crate::error::{io_err, DaemonError};
use crate::paths::{projects_root, run_dir, socket_path, REGISTRY_DEBOUNCE};
use crate::protocol::{DaemonRequest, DaemonResponse};
use crate::workspace::Workspace;

/// Per-project last-successful-sync timestamps (Unix seconds).
pub type SyncTimestamps = HashMap<ProjectId, u64>;

struct SyncJob {
    project: ProjectId,
    direction: SyncDirection,
    respond_to: oneshot::Sender<SyncReport>,
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Run the daemon: file watcher feeding auto-sync, socket server, and a
/// processor for explicit sync requests.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;

    let workspace = Arc::new(Workspace::open_at(&home)?);
    let autosync = AutoSync::new(
        Arc::clone(workspace.service()),
        &workspace.config().autosync,
    );
    let timestamps: Arc<RwLock<SyncTimestamps>> = Arc::new(RwLock::new(HashMap::new()));
    let started_at_unix = unix_seconds_now();
    tracing::info!(
        projects = workspace.projects().len(),
        socket = %socket_path(&home).display(),
        "tandem daemon starting"
    );

    let (sync_tx, sync_rx) = mpsc::channel::<SyncJob>(64);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let watcher_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        let workspace = Arc::clone(&workspace);
        let autosync = autosync.clone();
        let timestamps = Arc::clone(&timestamps);
        tokio::spawn(async move {
            let result =
                watcher_task(home, workspace, autosync, timestamps, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let processor_handle = {
        let shutdown = shutdown_tx.clone();
        let autosync = autosync.clone();
        let timestamps = Arc::clone(&timestamps);
        tokio::spawn(async move {
            let result =
                sync_processor_task(autosync, timestamps, sync_rx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let state = ServerState {
            home: home.clone(),
            workspace: Arc::clone(&workspace),
            autosync: autosync.clone(),
            timestamps: Arc::clone(&timestamps),
            sync_tx: sync_tx.clone(),
            shutdown_tx: shutdown.clone(),
            started_at_unix,
        };
        tokio::spawn(async move {
            let result = socket_server_task(state, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (watcher_result, processor_result, socket_result, signal_result) =
        tokio::join!(watcher_handle, processor_handle, socket_handle, signal_handle);

    handle_join("watcher", watcher_result)?;
    handle_join("sync_processor", processor_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    tracing::info!("tandem daemon stopped");
    Ok(())
}

async fn watcher_task(
    home: PathBuf,
    workspace: Arc<Workspace>,
    autosync: AutoSync,
    timestamps: Arc<RwLock<SyncTimestamps>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let projects = projects_root(&home);
    if !projects.exists() {
        fs::create_dir_all(&projects).map_err(|e| io_err(&projects, e))?;
    }
    // Watchers report resolved paths (e.g. /private/var/... on macOS).
    let projects = fs::canonicalize(&projects).unwrap_or(projects);

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut watcher: RecommendedWatcher = recommended_watcher(move |event| {
        let _ = event_tx.send(event);
    })?;
    watcher.watch(&projects, RecursiveMode::NonRecursive)?;

    let mut watched_roots = HashSet::new();
    for record in workspace.projects() {
        watch_local_root(&mut watcher, &mut watched_roots, &record);
    }

    let mut debounce = HashMap::<PathBuf, Instant>::new();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                let event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!(error = %err, "watcher event error");
                        continue;
                    }
                };
                if !is_relevant_event_kind(&event.kind) {
                    continue;
                }

                for path in event.paths {
                    if is_registry_yaml(&path, &projects) {
                        if !should_process_event(&mut debounce, &path, Instant::now()) {
                            continue;
                        }
                        for record in refresh_workspace(Arc::clone(&workspace)).await? {
                            watch_local_root(&mut watcher, &mut watched_roots, &record);
                        }
                        continue;
                    }

                    let Some((project, local_path)) = workspace.locate_local(&path) else {
                        continue;
                    };
                    if autosync.active_project().as_ref() != Some(&project) {
                        autosync.on_active_project_changed(Some(project.clone()));
                    }
                    if let Some(pending) = autosync.record_edit(&project, &local_path) {
                        let timestamps = Arc::clone(&timestamps);
                        tokio::spawn(async move {
                            if let Ok(report) = pending.report().await {
                                if report.success {
                                    record_sync(&timestamps, &report.project).await;
                                }
                            }
                        });
                    }
                }
            }
        }
    }

    Ok(())
}

async fn sync_processor_task(
    autosync: AutoSync,
    timestamps: Arc<RwLock<SyncTimestamps>>,
    mut sync_rx: mpsc::Receiver<SyncJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            maybe_job = sync_rx.recv() => {
                let Some(job) = maybe_job else { break };
                let report = autosync.sync_now(&job.project, job.direction).await;
                if report.success {
                    record_sync(&timestamps, &job.project).await;
                }
                let _ = job.respond_to.send(report);
            }
        }
    }

    Ok(())
}

/// Everything a socket client handler needs.
#[derive(Clone)]
struct ServerState {
    home: PathBuf,
    workspace: Arc<Workspace>,
    autosync: AutoSync,
    timestamps: Arc<RwLock<SyncTimestamps>>,
    sync_tx: mpsc::Sender<SyncJob>,
    shutdown_tx: broadcast::Sender<()>,
    started_at_unix: u64,
}

async fn socket_server_task(
    state: ServerState,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let run = run_dir(&state.home);
    if !run.exists() {
        fs::create_dir_all(&run).map_err(|e| io_err(&run, e))?;
    }

    let socket = socket_path(&state.home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let state = state.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, state).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(stream: UnixStream, state: ServerState) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: DaemonRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let response = match request.cmd.as_str() {
            "status" => DaemonResponse::ok(build_status_payload(&state).await),
            "sync" => match sync_request(&state, &request).await {
                Ok(report) => DaemonResponse::ok(json!(report)),
                Err(err) => DaemonResponse::error(err.to_string()),
            },
            "stop" => {
                let _ = state.shutdown_tx.send(());
                DaemonResponse::ok(json!({ "stopping": true }))
            }
            other => DaemonResponse::error(format!("unknown command '{other}'")),
        };

        write_response(&mut writer, &response).await?;
        if request.cmd == "stop" {
            break;
        }
    }

    Ok(())
}

async fn sync_request(
    state: &ServerState,
    request: &DaemonRequest,
) -> Result<SyncReport, DaemonError> {
    let project = request
        .project
        .as_deref()
        .map(ProjectId::from)
        .ok_or_else(|| DaemonError::Protocol("sync requires a project".to_string()))?;
    let record = state.workspace.require(&project)?;
    let direction = request.direction.unwrap_or(record.default_direction);
    enqueue_sync(&state.sync_tx, project, direction).await
}

async fn enqueue_sync(
    sync_tx: &mpsc::Sender<SyncJob>,
    project: ProjectId,
    direction: SyncDirection,
) -> Result<SyncReport, DaemonError> {
    let (tx, rx) = oneshot::channel();
    sync_tx
        .send(SyncJob {
            project,
            direction,
            respond_to: tx,
        })
        .await
        .map_err(|_| DaemonError::ChannelClosed("sync queue"))?;

    rx.await
        .map_err(|_| DaemonError::ChannelClosed("sync response"))
}

async fn build_status_payload(state: &ServerState) -> Value {
    let ts_snapshot: SyncTimestamps = state.timestamps.read().await.clone();
    let pending: HashSet<ProjectId> = state.autosync.pending_projects().into_iter().collect();
    let service = state.workspace.service();

    let projects: Vec<Value> = state
        .workspace
        .projects()
        .iter()
        .map(|record| {
            json!({
                "id": record.id,
                "local_root": record.local_root.display().to_string(),
                "remote_root": record.remote_root.display().to_string(),
                "default_direction": record.default_direction,
                "phase": service.phase(&record.id),
                "pending_edits": pending.contains(&record.id),
                "last_sync_at_unix": ts_snapshot.get(&record.id).copied().unwrap_or(0),
            })
        })
        .collect();

    let last_sync_at_unix = ts_snapshot.values().copied().max().unwrap_or(0);

    json!({
        "running": true,
        "started_at_unix": state.started_at_unix,
        "last_sync_at_unix": last_sync_at_unix,
        "active_project": state.autosync.active_project(),
        "projects": projects,
        "socket": socket_path(&state.home).display().to_string(),
    })
}

async fn record_sync(timestamps: &RwLock<SyncTimestamps>, project: &ProjectId) {
    timestamps
        .write()
        .await
        .insert(project.clone(), unix_seconds_now());
}

async fn refresh_workspace(workspace: Arc<Workspace>) -> Result<Vec<ProjectRecord>, DaemonError> {
    let refreshed = tokio::task::spawn_blocking(move || workspace.refresh())
        .await
        .map_err(|err| DaemonError::Protocol(format!("registry refresh join error: {err}")))?;
    match refreshed {
        Ok(records) => Ok(records),
        Err(err) => {
            tracing::warn!(error = %err, "registry refresh failed");
            Ok(Vec::new())
        }
    }
}

fn watch_local_root(
    watcher: &mut RecommendedWatcher,
    watched: &mut HashSet<PathBuf>,
    record: &ProjectRecord,
) {
    let root = match fs::canonicalize(&record.local_root) {
        Ok(root) => root,
        Err(err) => {
            tracing::warn!(
                project = %record.id,
                root = %record.local_root.display(),
                error = %err,
                "local root unavailable; not watching"
            );
            return;
        }
    };
    if !watched.insert(root.clone()) {
        return;
    }
    match watcher.watch(&root, RecursiveMode::Recursive) {
        Ok(()) => tracing::debug!(project = %record.id, path = %root.display(), "watching local root"),
        Err(err) => {
            watched.remove(&root);
            tracing::warn!(project = %record.id, error = %err, "failed to watch local root");
        }
    }
}

fn is_relevant_event_kind(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

fn is_registry_yaml(path: &Path, projects: &Path) -> bool {
    path.starts_with(projects)
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("yaml"))
            .unwrap_or(false)
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn should_process_event(
    debounce: &mut HashMap<PathBuf, Instant>,
    path: &Path,
    now: Instant,
) -> bool {
    should_process_event_with_threshold(debounce, path, now, REGISTRY_DEBOUNCE)
}

fn should_process_event_with_threshold(
    debounce: &mut HashMap<PathBuf, Instant>,
    path: &Path,
    now: Instant,
    threshold: Duration,
) -> bool {
    debounce.retain(|_, seen_at| now.duration_since(*seen_at) <= Duration::from_secs(30));
    match debounce.get(path) {
        Some(last_seen) if now.duration_since(*last_seen) < threshold => false,
        _ => {
            debounce.insert(path.to_path_buf(), now);
            true
        }
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    for dir in [projects_root(home), run_dir(home)] {
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        }
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// `RUST_LOG` filters (default `info`); `TANDEM_LOG_JSON` switches to JSON lines.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    let _ = if std::env::var_os("TANDEM_LOG_JSON").is_some() {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}
