use std::path::PathBuf;

use async_trait::async_trait;

use tandem_core::{PathTranslator, ProjectId};

use super::{prune_empty_parents, resolve, walk_text_files, write_atomic, Roots};
use crate::error::StoreError;
use crate::remote::{FileRecord, LocalStore};

/// Local replica kept as one directory per project. Namespace paths such as
/// `/dapp/src/a.ts` map to `<root>/src/a.ts`.
#[derive(Debug, Default)]
pub struct DirStore {
    translator: PathTranslator,
    roots: Roots,
}

impl DirStore {
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

    pub fn root(&self, project: &ProjectId) -> Option<PathBuf> {
        self.roots.get(project)
    }

    fn locate(&self, project: &ProjectId, path: &str) -> Result<(PathBuf, PathBuf), StoreError> {
        let root = self
            .roots
            .get(project)
            .ok_or_else(|| StoreError::UnknownProject(project.to_string()))?;
        let outside = || StoreError::OutsideNamespace {
            path: path.to_string(),
            namespace: self.translator.local_prefix().to_string(),
        };
        let relative = self.translator.relative_from_local(path).ok_or_else(outside)?;
        let file = resolve(&root, &relative).ok_or_else(outside)?;
        Ok((root, file))
    }
}

#[async_trait]
impl LocalStore for DirStore {
    async fn list_files(
        &self,
        project: &ProjectId,
        namespace: &str,
    ) -> Result<Vec<FileRecord>, StoreError> {
        let root = self
            .roots
            .get(project)
            .ok_or_else(|| StoreError::UnknownProject(project.to_string()))?;
        let walk_root = root.clone();
        let files = tokio::task::spawn_blocking(move || walk_text_files(&walk_root, &walk_root))
            .await
            .map_err(|e| StoreError::Io {
                path: root.clone(),
                source: std::io::Error::other(e),
            })?
            .map_err(|source| StoreError::Io {
                path: root.clone(),
                source,
            })?;

        let namespace = PathTranslator::new(namespace, self.translator.remote_prefix());
        Ok(files
            .into_iter()
            .map(|(relative, content)| {
                FileRecord::new(namespace.local_from_relative(&relative), content)
            })
            .collect())
    }

    async fn upsert_file(
        &self,
        project: &ProjectId,
        path: &str,
        content: &str,
    ) -> Result<(), StoreError> {
        let (_, file) = self.locate(project, path)?;
        let content = content.to_string();
        let target = file.clone();
        tokio::task::spawn_blocking(move || write_atomic(&target, &content))
            .await
            .map_err(|e| StoreError::Io {
                path: file.clone(),
                source: std::io::Error::other(e),
            })?
            .map_err(|source| StoreError::Io { path: file, source })
    }

    async fn delete_file(&self, project: &ProjectId, path: &str) -> Result<bool, StoreError> {
        let (root, file) = self.locate(project, path)?;
        match tokio::fs::remove_file(&file).await {
            Ok(()) => {
                prune_empty_parents(&root, &file);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(StoreError::Io { path: file, source }),
        }
    }
}
