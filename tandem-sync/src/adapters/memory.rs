use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;

use tandem_core::ProjectId;

use crate::error::StoreError;
use crate::remote::{FileRecord, LocalStore};

/// In-memory local replica keyed by full namespace path.
#[derive(Debug, Default)]
pub struct MemoryStore {
    projects: Mutex<HashMap<ProjectId, BTreeMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write without going through the trait (test setup, editor buffers).
    pub fn insert(&self, project: &ProjectId, path: &str, content: &str) {
        let mut projects = self.lock();
        projects
            .entry(project.clone())
            .or_default()
            .insert(path.to_string(), content.to_string());
    }

    pub fn remove(&self, project: &ProjectId, path: &str) -> Option<String> {
        self.lock().get_mut(project)?.remove(path)
    }

    pub fn get(&self, project: &ProjectId, path: &str) -> Option<String> {
        self.lock().get(project)?.get(path).cloned()
    }

    pub fn files(&self, project: &ProjectId) -> BTreeMap<String, String> {
        self.lock().get(project).cloned().unwrap_or_default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ProjectId, BTreeMap<String, String>>> {
        self.projects.lock().unwrap_or_else(|p| p.into_inner())
    }
}

fn in_namespace(path: &str, namespace: &str) -> bool {
    let namespace = namespace.trim_end_matches('/');
    namespace.is_empty()
        || path
            .strip_prefix(namespace)
            .is_some_and(|rest| rest.starts_with('/'))
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn list_files(
        &self,
        project: &ProjectId,
        namespace: &str,
    ) -> Result<Vec<FileRecord>, StoreError> {
        Ok(self
            .lock()
            .get(project)
            .map(|files| {
                files
                    .iter()
                    .filter(|(path, _)| in_namespace(path, namespace))
                    .map(|(path, content)| FileRecord::new(path.clone(), content.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn upsert_file(
        &self,
        project: &ProjectId,
        path: &str,
        content: &str,
    ) -> Result<(), StoreError> {
        self.insert(project, path, content);
        Ok(())
    }

    async fn delete_file(&self, project: &ProjectId, path: &str) -> Result<bool, StoreError> {
        Ok(self.remove(project, path).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn list_is_scoped_to_namespace() {
        let store = MemoryStore::new();
        let project = ProjectId::from("demo");
        store.insert(&project, "/dapp/a.txt", "a");
        store.insert(&project, "/dappx/b.txt", "b");
        store.insert(&project, "/other/c.txt", "c");

        let files = store.list_files(&project, "/dapp").await.unwrap();
        assert_eq!(files, vec![FileRecord::new("/dapp/a.txt", "a")]);
        assert!(store.delete_file(&project, "/dapp/a.txt").await.unwrap());
        assert!(!store.delete_file(&project, "/dapp/a.txt").await.unwrap());
    }
}
