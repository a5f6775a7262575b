//! Shipped implementations of the collaborator traits.
//!
//! - [`DirStore`]: local replica as plain directories
//! - [`MemoryStore`]: local replica in memory
//! - [`LocalSandbox`]: sandbox backed by a directory and `sh`

mod dir_store;
mod local_sandbox;
mod memory;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tandem_core::paths::{is_housekeeping_dir, normalize_relative};
use tandem_core::ProjectId;

pub use dir_store::DirStore;
pub use local_sandbox::LocalSandbox;
pub use memory::MemoryStore;

/// Project id to root directory, shared by the directory-backed adapters.
#[derive(Debug, Default)]
pub(crate) struct Roots(RwLock<HashMap<ProjectId, PathBuf>>);

impl Roots {
    pub(crate) fn insert(&self, project: ProjectId, root: PathBuf) {
        let mut roots = self.0.write().unwrap_or_else(|p| p.into_inner());
        roots.insert(project, root);
    }

    pub(crate) fn get(&self, project: &ProjectId) -> Option<PathBuf> {
        let roots = self.0.read().unwrap_or_else(|p| p.into_inner());
        roots.get(project).cloned()
    }
}

/// `root` joined with a namespace-relative path; `None` if it escapes.
pub(crate) fn resolve(root: &Path, relative: &str) -> Option<PathBuf> {
    let relative = normalize_relative(relative)?;
    Some(relative.split('/').fold(root.to_path_buf(), |acc, seg| acc.join(seg)))
}

/// Every UTF-8 file under `start`, as `(path relative to root, content)`,
/// sorted by path. Housekeeping directories are not descended into and
/// files that are not UTF-8 are skipped.
pub(crate) fn walk_text_files(root: &Path, start: &Path) -> std::io::Result<Vec<(String, String)>> {
    let mut files = Vec::new();
    if start.is_file() {
        push_text_file(root, start, &mut files)?;
        return Ok(files);
    }
    if !start.is_dir() {
        return Ok(files);
    }

    let mut stack = vec![start.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            let path = entry.path();
            if file_type.is_dir() {
                let name = entry.file_name();
                if !is_housekeeping_dir(&name.to_string_lossy()) {
                    stack.push(path);
                }
            } else if file_type.is_file() {
                push_text_file(root, &path, &mut files)?;
            }
        }
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

fn push_text_file(
    root: &Path,
    path: &Path,
    files: &mut Vec<(String, String)>,
) -> std::io::Result<()> {
    let Ok(relative) = path.strip_prefix(root) else {
        return Ok(());
    };
    let relative = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    let bytes = std::fs::read(path)?;
    match String::from_utf8(bytes) {
        Ok(content) => files.push((relative, content)),
        Err(_) => tracing::debug!(path = %path.display(), "skipping non-UTF-8 file"),
    }
    Ok(())
}

/// Write through a `.tandem.tmp` sibling and rename.
pub(crate) fn write_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = PathBuf::from(format!("{}.tandem.tmp", path.display()));
    std::fs::write(&tmp, content)?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

/// Remove empty directories from `path`'s parent up to (not including) `root`.
pub(crate) fn prune_empty_parents(root: &Path, path: &Path) {
    let mut current = path.parent();
    while let Some(dir) = current {
        if dir == root || !dir.starts_with(root) {
            break;
        }
        if std::fs::remove_dir(dir).is_err() {
            break;
        }
        current = dir.parent();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn walk_skips_housekeeping_dirs_and_binary_files() {
        let root = TempDir::new().unwrap();
        write_atomic(&root.path().join("src/app.ts"), "app").unwrap();
        write_atomic(&root.path().join("node_modules/x/index.js"), "dep").unwrap();
        write_atomic(&root.path().join(".git/HEAD"), "ref").unwrap();
        std::fs::write(root.path().join("logo.png"), [0xff, 0xfe, 0x00]).unwrap();

        let files = walk_text_files(root.path(), root.path()).unwrap();
        assert_eq!(files, vec![("src/app.ts".to_string(), "app".to_string())]);
    }

    #[test]
    fn resolve_rejects_escapes() {
        let root = Path::new("/work/demo");
        assert_eq!(
            resolve(root, "src/a.ts"),
            Some(PathBuf::from("/work/demo/src/a.ts"))
        );
        assert_eq!(resolve(root, "../etc/passwd"), None);
    }

    #[test]
    fn prune_stops_at_root_and_non_empty_dirs() {
        let root = TempDir::new().unwrap();
        let keep = root.path().join("a/keep.txt");
        let gone = root.path().join("a/b/c/gone.txt");
        write_atomic(&keep, "k").unwrap();
        write_atomic(&gone, "g").unwrap();
        std::fs::remove_file(&gone).unwrap();

        prune_empty_parents(root.path(), &gone);
        assert!(!root.path().join("a/b").exists());
        assert!(keep.exists());
    }
}
