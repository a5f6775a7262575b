//! Per-project YAML registry.
//!
//! # Storage layout
//!
//! ```text
//! ~/.tandem/
//!   config.yaml             (optional, see `config`)
//!   projects/
//!     <project_id>.yaml     (one file per project, mode 0600)
//!   baselines/
//!     <prefix>-<project_id>.json
//! ```
//!
//! # API pattern
//!
//! Every function has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! Tests must NEVER call the no-arg wrappers; always use `_at`.

use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::{io_err, CoreError};
use crate::types::{ProjectId, ProjectRecord, SyncDirection};

// ---------------------------------------------------------------------------
// 1. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.tandem`
pub fn tandem_root(home: &Path) -> PathBuf {
    home.join(".tandem")
}

/// `<home>/.tandem/projects/`
///
/// Creates the directory (mode `0700`) if it does not yet exist.
pub fn projects_dir_at(home: &Path) -> Result<PathBuf, CoreError> {
    let dir = tandem_root(home).join("projects");
    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        set_dir_permissions(&dir)?;
    }
    Ok(dir)
}

/// `<home>/.tandem/projects/<project>.yaml`: pure, no I/O.
pub fn project_path_at(home: &Path, project: &ProjectId) -> PathBuf {
    tandem_root(home)
        .join("projects")
        .join(format!("{}.yaml", project.0))
}

/// Project ids end up in file names and storage keys.
pub fn validate_project_id(project: &ProjectId) -> Result<(), CoreError> {
    let id = project.0.as_str();
    let valid = !id.is_empty()
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidProjectId(id.to_string()))
    }
}

// ---------------------------------------------------------------------------
// 2. Load
// ---------------------------------------------------------------------------

/// Load a single project record.
///
/// Returns `CoreError::ProjectNotFound` if absent,
/// `CoreError::Parse` (with path + line context) if malformed YAML.
pub fn load_project_at(home: &Path, project: &ProjectId) -> Result<ProjectRecord, CoreError> {
    let path = project_path_at(home, project);
    if !path.exists() {
        return Err(CoreError::ProjectNotFound { path });
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    serde_yaml::from_str(&contents).map_err(|source| CoreError::Parse { path, source })
}

/// `load_project_at` convenience wrapper.
pub fn load_project(project: &ProjectId) -> Result<ProjectRecord, CoreError> {
    load_project_at(&home()?, project)
}

/// All registered projects, sorted by id.
pub fn list_projects_at(home: &Path) -> Result<Vec<ProjectRecord>, CoreError> {
    let dir = tandem_root(home).join("projects");
    if !dir.exists() {
        return Ok(vec![]);
    }

    let mut entries: Vec<_> = std::fs::read_dir(&dir)
        .map_err(|e| io_err(&dir, e))?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .collect();
    entries.sort_by_key(|e| e.file_name());

    let mut projects = Vec::new();
    for entry in entries {
        let name = entry.file_name();
        if !name.to_string_lossy().ends_with(".yaml") {
            continue;
        }
        let path = entry.path();
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        let record: ProjectRecord = serde_yaml::from_str(&contents)
            .map_err(|source| CoreError::Parse { path, source })?;
        projects.push(record);
    }
    projects.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(projects)
}

/// `list_projects_at` convenience wrapper.
pub fn list_projects() -> Result<Vec<ProjectRecord>, CoreError> {
    list_projects_at(&home()?)
}

// ---------------------------------------------------------------------------
// 3. Save (atomic)
// ---------------------------------------------------------------------------

/// Atomically save a project record.
///
/// Write flow: serialize → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_project_at(home: &Path, record: &ProjectRecord) -> Result<(), CoreError> {
    validate_project_id(&record.id)?;
    projects_dir_at(home)?;
    let path = project_path_at(home, &record.id);
    let yaml = serde_yaml::to_string(record)?;
    atomic_write(&path, &yaml)
}

/// `save_project_at` convenience wrapper.
pub fn save_project(record: &ProjectRecord) -> Result<(), CoreError> {
    save_project_at(&home()?, record)
}

/// Write `contents` to `path` through a `.tmp` sibling and rename.
///
/// The `.tmp` file lives in the same directory as the target, so the rename
/// never crosses filesystems.
pub(crate) fn atomic_write(path: &Path, contents: &str) -> Result<(), CoreError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!("{file_name}.tmp"));
    std::fs::write(&tmp, contents).map_err(|e| io_err(&tmp, e))?;
    set_file_permissions(&tmp)?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(path, e));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// 4. Init / remove
// ---------------------------------------------------------------------------

/// Register `project` with its local replica and sandbox roots.
///
/// Idempotent when the stored roots match; a conflicting registration returns
/// `CoreError::ProjectExists`.
pub fn init_at(
    home: &Path,
    project: ProjectId,
    local_root: PathBuf,
    remote_root: PathBuf,
    default_direction: Option<SyncDirection>,
) -> Result<ProjectRecord, CoreError> {
    validate_project_id(&project)?;

    let path = project_path_at(home, &project);
    if path.exists() {
        let existing = load_project_at(home, &project)?;
        if existing.local_root == local_root && existing.remote_root == remote_root {
            return Ok(existing);
        }
        return Err(CoreError::ProjectExists {
            id: project.0,
            path,
        });
    }

    let now = Utc::now();
    let record = ProjectRecord {
        id: project,
        local_root,
        remote_root,
        default_direction: default_direction.unwrap_or_default(),
        created_at: now,
        updated_at: now,
    };
    save_project_at(home, &record)?;
    Ok(record)
}

/// `init_at` convenience wrapper.
pub fn init(
    project: ProjectId,
    local_root: PathBuf,
    remote_root: PathBuf,
    default_direction: Option<SyncDirection>,
) -> Result<ProjectRecord, CoreError> {
    init_at(&home()?, project, local_root, remote_root, default_direction)
}

/// Remove a project record. Returns `false` when it was not registered.
pub fn remove_project_at(home: &Path, project: &ProjectId) -> Result<bool, CoreError> {
    let path = project_path_at(home, project);
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(io_err(&path, e)),
    }
}

/// `remove_project_at` convenience wrapper.
pub fn remove_project(project: &ProjectId) -> Result<bool, CoreError> {
    remove_project_at(&home()?, project)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

pub(crate) fn home() -> Result<PathBuf, CoreError> {
    dirs::home_dir().ok_or(CoreError::HomeNotFound)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), CoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), CoreError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), CoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), CoreError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
