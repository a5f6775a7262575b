//! Content manifests: building them from a replica and diffing two of them.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use tandem_core::{ChangeSet, IgnoreFilter, Manifest, ManifestEntry, PathTranslator, ProjectId};

use crate::error::SyncError;
use crate::remote::{FileRecord, LocalStore};

/// Lowercase hex SHA-256 of the raw bytes.
pub fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn entry_for(relative: &str, content: &str) -> ManifestEntry {
    ManifestEntry {
        path: relative.to_string(),
        hash: hash_content(content),
        size: content.len() as u64,
    }
}

/// Manifest of `files` (local namespace paths). Files outside the namespace
/// or matched by `filter` are left out.
pub fn build_manifest(
    files: &[FileRecord],
    translator: &PathTranslator,
    filter: &IgnoreFilter,
) -> Manifest {
    files
        .iter()
        .filter_map(|file| {
            let relative = translator.relative_from_local(&file.path)?;
            (!filter.is_ignored(&relative)).then(|| entry_for(&relative, &file.content))
        })
        .collect()
}

/// Paths of `current` that are new or differ from `baseline`, plus paths
/// only `baseline` has.
pub fn diff_manifests(current: &Manifest, baseline: &Manifest) -> ChangeSet {
    let added_or_changed = current
        .entries()
        .filter(|entry| baseline.hash_of(&entry.path) != Some(entry.hash.as_str()))
        .map(|entry| entry.path.clone())
        .collect();
    let deleted = baseline
        .paths()
        .filter(|path| !current.contains(path))
        .map(str::to_string)
        .collect();
    ChangeSet {
        added_or_changed,
        deleted,
    }
}

/// A local manifest together with the contents it was computed from, keyed
/// by project-relative path.
#[derive(Debug, Clone, Default)]
pub struct LocalSnapshot {
    pub manifest: Manifest,
    pub contents: BTreeMap<String, String>,
}

impl LocalSnapshot {
    pub fn content(&self, relative: &str) -> Option<&str> {
        self.contents.get(relative).map(String::as_str)
    }
}

/// Builds manifests straight from a [`LocalStore`].
#[derive(Debug, Clone, Default)]
pub struct ManifestBuilder {
    translator: PathTranslator,
    filter: IgnoreFilter,
}

impl ManifestBuilder {
    pub fn new(translator: PathTranslator, filter: IgnoreFilter) -> Self {
        Self { translator, filter }
    }

    pub fn translator(&self) -> &PathTranslator {
        &self.translator
    }

    pub fn filter(&self) -> &IgnoreFilter {
        &self.filter
    }

    pub async fn build(
        &self,
        store: &dyn LocalStore,
        project: &ProjectId,
    ) -> Result<Manifest, SyncError> {
        Ok(self.snapshot(store, project).await?.manifest)
    }

    /// One `list_files` call, hashed and kept alongside the contents.
    pub async fn snapshot(
        &self,
        store: &dyn LocalStore,
        project: &ProjectId,
    ) -> Result<LocalSnapshot, SyncError> {
        let files = store
            .list_files(project, self.translator.local_prefix())
            .await
            .map_err(|source| SyncError::LocalStore {
                project: project.to_string(),
                operation: "list_files",
                source,
            })?;

        let mut snapshot = LocalSnapshot::default();
        for file in files {
            let Some(relative) = self.translator.relative_from_local(&file.path) else {
                continue;
            };
            if self.filter.is_ignored(&relative) {
                continue;
            }
            snapshot.manifest.insert(entry_for(&relative, &file.content));
            snapshot.contents.insert(relative, file.content);
        }
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(pairs: &[(&str, &str)]) -> Vec<FileRecord> {
        pairs
            .iter()
            .map(|(path, content)| FileRecord::new(*path, *content))
            .collect()
    }

    fn manifest_of(pairs: &[(&str, &str)]) -> Manifest {
        build_manifest(
            &files(pairs),
            &PathTranslator::default(),
            &IgnoreFilter::builtin(),
        )
    }

    #[test]
    fn hash_is_sha256_hex() {
        assert_eq!(
            hash_content(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(hash_content("abc").len(), 64);
    }

    #[test]
    fn build_skips_foreign_namespace_and_housekeeping() {
        let manifest = manifest_of(&[
            ("/dapp/src/index.ts", "export {}"),
            ("/dapp/.DS_Store", "junk"),
            ("/dapp/node_modules/react/index.js", "module"),
            ("/other/readme.md", "elsewhere"),
        ]);
        assert_eq!(manifest.paths().collect::<Vec<_>>(), vec!["src/index.ts"]);
        assert_eq!(manifest.get("src/index.ts").unwrap().size, 9);
    }

    #[test]
    fn diff_of_identical_manifests_is_empty() {
        let manifest = manifest_of(&[("/dapp/a.txt", "1"), ("/dapp/b.txt", "2")]);
        assert!(diff_manifests(&manifest, &manifest).is_empty());

        let rebuilt = manifest_of(&[("/dapp/b.txt", "2"), ("/dapp/a.txt", "1")]);
        assert!(diff_manifests(&rebuilt, &manifest).is_empty());
    }

    #[test]
    fn one_byte_change_touches_only_that_entry() {
        let before = manifest_of(&[("/dapp/a.txt", "hello"), ("/dapp/b.txt", "same")]);
        let after = manifest_of(&[("/dapp/a.txt", "hellO"), ("/dapp/b.txt", "same")]);

        assert_ne!(before.hash_of("a.txt"), after.hash_of("a.txt"));
        assert_eq!(before.hash_of("b.txt"), after.hash_of("b.txt"));

        let changes = diff_manifests(&after, &before);
        assert_eq!(changes.added_or_changed, vec!["a.txt".to_string()]);
        assert!(changes.deleted.is_empty());
    }

    #[test]
    fn additions_and_deletions_are_separated() {
        let baseline = manifest_of(&[("/dapp/keep.txt", "k"), ("/dapp/gone.txt", "g")]);
        let current = manifest_of(&[("/dapp/keep.txt", "k"), ("/dapp/new.txt", "n")]);
        let changes = diff_manifests(&current, &baseline);
        assert_eq!(changes.added_or_changed, vec!["new.txt".to_string()]);
        assert_eq!(changes.deleted, vec!["gone.txt".to_string()]);
    }

    #[test]
    fn redundant_separators_do_not_change_identity() {
        let a = manifest_of(&[("/dapp/x", "same")]);
        let b = manifest_of(&[("/dapp//x", "same")]);
        assert_eq!(a, b);
    }
}
