use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;

use tandem_core::{PathTranslator, ProjectId};

use super::{resolve, walk_text_files, write_atomic, Roots};
use crate::error::RemoteError;
use crate::remote::{DownloadPage, FileRecord, RemoteEnvironment, ShellOutput};

/// A sandbox that is just a directory on this machine. Remote paths such as
/// `/app/src/a.ts` map to `<root>/src/a.ts` and shell commands run with
/// `sh -c` inside `<root>`.
#[derive(Debug, Default)]
pub struct LocalSandbox {
    translator: PathTranslator,
    roots: Roots,
}

impl LocalSandbox {
    pub fn new(translator: PathTranslator) -> Self {
        Self {
            translator,
            roots: Roots::default(),
        }
    }

    pub fn with_project(self, project: ProjectId, root: impl Into<PathBuf>) -> Self {
        self.register(project, root);
        self
    }

    pub fn register(&self, project: ProjectId, root: impl Into<PathBuf>) {
        self.roots.insert(project, root.into());
    }

    fn root(&self, project: &ProjectId) -> Result<PathBuf, RemoteError> {
        self.roots
            .get(project)
            .ok_or_else(|| RemoteError::UnknownProject(project.to_string()))
    }

    fn locate(&self, root: &std::path::Path, path: &str) -> Result<PathBuf, RemoteError> {
        self.translator
            .relative_from_remote(path)
            .and_then(|relative| resolve(root, &relative))
            .ok_or_else(|| RemoteError::Rejected {
                operation: "locate",
                message: format!(
                    "'{path}' is outside '{}'",
                    self.translator.remote_prefix()
                ),
            })
    }

    /// Text files under `prefix` (or the whole code directory), sorted by
    /// relative path.
    async fn walk(
        &self,
        project: &ProjectId,
        prefix: Option<&str>,
    ) -> Result<Vec<(String, String)>, RemoteError> {
        let root = self.root(project)?;
        let start = match prefix {
            Some(prefix) if prefix.trim_end_matches('/') != self.translator.remote_prefix() => {
                self.locate(&root, prefix)?
            }
            _ => root.clone(),
        };

        let walk_root = root.clone();
        tokio::task::spawn_blocking(move || walk_text_files(&walk_root, &start))
            .await
            .map_err(|e| RemoteError::Rejected {
                operation: "download",
                message: e.to_string(),
            })?
            .map_err(|source| RemoteError::Io { path: root, source })
    }
}

#[async_trait]
impl RemoteEnvironment for LocalSandbox {
    async fn is_ready(&self, project: &ProjectId) -> Result<bool, RemoteError> {
        let root = self.root(project)?;
        Ok(tokio::fs::metadata(&root)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false))
    }

    async fn provision(&self, project: &ProjectId) -> Result<(), RemoteError> {
        let root = self.root(project)?;
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|source| RemoteError::Io { path: root, source })
    }

    async fn upload_batch(
        &self,
        project: &ProjectId,
        files: BTreeMap<String, String>,
    ) -> Result<(), RemoteError> {
        let root = self.root(project)?;
        let mut targets = Vec::with_capacity(files.len());
        for (path, content) in files {
            targets.push((self.locate(&root, &path)?, content));
        }
        tokio::task::spawn_blocking(move || {
            for (target, content) in targets {
                write_atomic(&target, &content)
                    .map_err(|source| RemoteError::Io { path: target, source })?;
            }
            Ok::<(), RemoteError>(())
        })
        .await
        .map_err(|e| RemoteError::Rejected {
            operation: "upload_batch",
            message: e.to_string(),
        })?
    }

    /// Pages re-walk the tree and slice it, so draining page by page reads
    /// every file once per page. [`Self::download_all`] walks once.
    async fn download_page(
        &self,
        project: &ProjectId,
        prefix: Option<&str>,
        page_token: Option<&str>,
        page_size: usize,
    ) -> Result<DownloadPage, RemoteError> {
        let files = self.walk(project, prefix).await?;
        let offset: usize = page_token.and_then(|t| t.parse().ok()).unwrap_or(0);
        let end = offset.saturating_add(page_size.max(1)).min(files.len());
        let page = files
            .get(offset..end)
            .unwrap_or_default()
            .iter()
            .map(|(relative, content)| {
                FileRecord::new(self.translator.remote_from_relative(relative), content.clone())
            })
            .collect();
        Ok(DownloadPage {
            files: page,
            next_page: (end < files.len()).then(|| end.to_string()),
        })
    }

    async fn download_all(
        &self,
        project: &ProjectId,
        prefix: Option<&str>,
        _page_size: usize,
    ) -> Result<Vec<FileRecord>, RemoteError> {
        Ok(self
            .walk(project, prefix)
            .await?
            .into_iter()
            .map(|(relative, content)| {
                FileRecord::new(self.translator.remote_from_relative(&relative), content)
            })
            .collect())
    }

    async fn run_shell_command(
        &self,
        project: &ProjectId,
        command: &str,
    ) -> Result<ShellOutput, RemoteError> {
        let root = self.root(project)?;
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&root)
            .output()
            .await
            .map_err(|source| RemoteError::Io { path: root, source })?;
        Ok(ShellOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sandbox(root: &std::path::Path) -> LocalSandbox {
        LocalSandbox::new(PathTranslator::default()).with_project(ProjectId::from("demo"), root)
    }

    #[tokio::test]
    async fn provision_creates_the_code_directory() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("app");
        let sandbox = sandbox(&root);
        let project = ProjectId::from("demo");

        assert!(!sandbox.is_ready(&project).await.unwrap());
        sandbox.provision(&project).await.unwrap();
        assert!(sandbox.is_ready(&project).await.unwrap());
    }

    #[tokio::test]
    async fn upload_then_page_through_downloads() {
        let tmp = TempDir::new().unwrap();
        let sandbox = sandbox(tmp.path());
        let project = ProjectId::from("demo");

        let files: BTreeMap<String, String> = ["a.txt", "b.txt", "src/c.ts"]
            .iter()
            .map(|p| (format!("/app/{p}"), p.to_string()))
            .collect();
        sandbox.upload_batch(&project, files).await.unwrap();
        std::fs::create_dir_all(tmp.path().join(".next")).unwrap();
        std::fs::write(tmp.path().join(".next/build.js"), "built").unwrap();

        let first = sandbox
            .download_page(&project, None, None, 2)
            .await
            .unwrap();
        assert_eq!(first.files.len(), 2);
        assert_eq!(first.next_page.as_deref(), Some("2"));

        let all = sandbox.download_all(&project, None, 2).await.unwrap();
        let paths: Vec<&str> = all.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["/app/a.txt", "/app/b.txt", "/app/src/c.ts"]);

        let single = sandbox
            .download_all(&project, Some("/app/src/c.ts"), 10)
            .await
            .unwrap();
        assert_eq!(single, vec![FileRecord::new("/app/src/c.ts", "src/c.ts")]);
    }

    #[tokio::test]
    async fn download_all_returns_the_tree_regardless_of_page_size() {
        let tmp = TempDir::new().unwrap();
        let sandbox = sandbox(tmp.path());
        let project = ProjectId::from("demo");
        for name in ["a.txt", "b.txt", "c.txt", "src/d.ts"] {
            let path = tmp.path().join(name);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, name).unwrap();
        }

        let all = sandbox.download_all(&project, None, 1).await.unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[3], FileRecord::new("/app/src/d.ts", "src/d.ts"));

        let under_src = sandbox
            .download_all(&project, Some("/app/src"), 1)
            .await
            .unwrap();
        assert_eq!(under_src, vec![FileRecord::new("/app/src/d.ts", "src/d.ts")]);
    }

    #[tokio::test]
    async fn shell_commands_run_in_the_code_directory() {
        let tmp = TempDir::new().unwrap();
        let sandbox = sandbox(tmp.path());
        let project = ProjectId::from("demo");
        std::fs::write(tmp.path().join("doomed.txt"), "x").unwrap();

        sandbox
            .remove_batch(&project, &["doomed.txt".to_string()])
            .await
            .unwrap();
        assert!(!tmp.path().join("doomed.txt").exists());

        let output = sandbox.run_shell_command(&project, "exit 3").await.unwrap();
        assert_eq!(output.exit_code, 3);
    }

    #[tokio::test]
    async fn uploads_outside_namespace_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let sandbox = sandbox(tmp.path());
        let files = BTreeMap::from([("/etc/passwd".to_string(), "x".to_string())]);
        let err = sandbox
            .upload_batch(&ProjectId::from("demo"), files)
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Rejected { .. }));
    }
}
