//! Pure reconciliation: given what changed on each side since the baseline,
//! decide what to transfer and what is in conflict. Local always wins.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use tandem_core::{ChangeSet, Manifest, RemoteChange, RemoteStatus, SyncDirection};

use crate::manifest::{entry_for, hash_content};

/// How the local side changed a conflicting path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LocalSide {
    Changed,
    Deleted,
}

/// A path changed independently on both sides. The local version is kept
/// and stays pending for the next upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conflict {
    pub path: String,
    pub local: LocalSide,
    pub remote: RemoteStatus,
}

/// Transfers for one pass, as project-relative paths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub upload: Vec<String>,
    pub remote_remove: Vec<String>,
    pub local_write: Vec<String>,
    pub local_remove: Vec<String>,
    pub conflicts: Vec<Conflict>,
    /// Paths whose baseline entry must keep its previous value.
    pub deferred: Vec<String>,
}

impl Plan {
    pub fn is_noop(&self) -> bool {
        self.upload.is_empty()
            && self.remote_remove.is_empty()
            && self.local_write.is_empty()
            && self.local_remove.is_empty()
    }
}

/// Everything the planner looks at.
pub struct ReconcileInput<'a> {
    pub direction: SyncDirection,
    /// Current local manifest.
    pub local: &'a Manifest,
    /// `diff_manifests(local, baseline)`.
    pub local_changes: &'a ChangeSet,
    /// Remote changes since the baseline commit, relative paths.
    pub remote_changes: &'a [RemoteChange],
    /// Contents of remote added/modified paths. A missing entry means the
    /// file is gone.
    pub remote_contents: &'a BTreeMap<String, String>,
}

#[derive(Clone, Copy)]
enum LocalChange<'a> {
    Changed(&'a str),
    Deleted,
}

#[derive(Clone, Copy)]
enum RemoteSide<'a> {
    Present(&'a str),
    Deleted,
}

pub fn reconcile(input: &ReconcileInput<'_>) -> Plan {
    let mut local: BTreeMap<&str, LocalChange<'_>> = BTreeMap::new();
    for path in &input.local_changes.added_or_changed {
        if let Some(hash) = input.local.hash_of(path) {
            local.insert(path.as_str(), LocalChange::Changed(hash));
        }
    }
    for path in &input.local_changes.deleted {
        local.insert(path.as_str(), LocalChange::Deleted);
    }

    let mut remote: BTreeMap<&str, (RemoteStatus, RemoteSide<'_>)> = BTreeMap::new();
    for change in input.remote_changes {
        let side = match change.status {
            RemoteStatus::Deleted => RemoteSide::Deleted,
            RemoteStatus::Added | RemoteStatus::Modified => {
                match input.remote_contents.get(&change.path) {
                    Some(content) => RemoteSide::Present(content.as_str()),
                    None => RemoteSide::Deleted,
                }
            }
        };
        remote.insert(change.path.as_str(), (change.status, side));
    }

    let paths: BTreeSet<&str> = local.keys().chain(remote.keys()).copied().collect();
    let mut plan = Plan::default();

    for path in paths {
        match (local.get(path).copied(), remote.get(path).copied()) {
            (Some(change), None) => {
                if !input.direction.uploads() {
                    plan.deferred.push(path.to_string());
                } else if matches!(change, LocalChange::Deleted) {
                    plan.remote_remove.push(path.to_string());
                } else {
                    plan.upload.push(path.to_string());
                }
            }
            (None, Some((_, side))) => {
                if !input.direction.downloads() {
                    continue;
                }
                match side {
                    RemoteSide::Present(content) => {
                        if input.local.hash_of(path) != Some(hash_content(content).as_str()) {
                            plan.local_write.push(path.to_string());
                        }
                    }
                    RemoteSide::Deleted => {
                        if input.local.contains(path) {
                            plan.local_remove.push(path.to_string());
                        }
                    }
                }
            }
            (Some(change), Some((status, side))) => {
                let converged = match (change, side) {
                    (LocalChange::Changed(hash), RemoteSide::Present(content)) => {
                        hash == hash_content(content)
                    }
                    (LocalChange::Deleted, RemoteSide::Deleted) => true,
                    _ => false,
                };
                if converged {
                    continue;
                }
                plan.conflicts.push(Conflict {
                    path: path.to_string(),
                    local: match change {
                        LocalChange::Changed(_) => LocalSide::Changed,
                        LocalChange::Deleted => LocalSide::Deleted,
                    },
                    remote: status,
                });
                plan.deferred.push(path.to_string());
            }
            (None, None) => {}
        }
    }
    plan
}

/// Local manifest the pass actually reconciled: `before` with the planned
/// downloads applied.
pub fn confirmed_manifest(
    before: &Manifest,
    plan: &Plan,
    remote_contents: &BTreeMap<String, String>,
) -> Manifest {
    let mut confirmed = before.clone();
    for path in &plan.local_write {
        if let Some(content) = remote_contents.get(path) {
            confirmed.insert(entry_for(path, content));
        }
    }
    for path in &plan.local_remove {
        confirmed.remove(path);
    }
    confirmed
}

/// Baseline manifest to persist after a pass.
///
/// Starts from the recomputed post-pass manifest. Deferred paths, and any
/// path whose post-pass entry differs from what the pass confirmed (an edit
/// that landed mid-pass), keep their previous baseline entry so they stay
/// pending.
pub fn next_baseline(
    previous: &Manifest,
    confirmed: &Manifest,
    post: &Manifest,
    deferred: &[String],
) -> Manifest {
    let mut next = post.clone();
    let candidates: BTreeSet<&str> = post
        .paths()
        .chain(confirmed.paths())
        .chain(deferred.iter().map(String::as_str))
        .collect();

    for path in candidates {
        let pending = deferred.iter().any(|d| d == path)
            || post.hash_of(path) != confirmed.hash_of(path);
        if !pending {
            continue;
        }
        match previous.get(path) {
            Some(entry) => {
                next.insert(entry.clone());
            }
            None => {
                next.remove(path);
            }
        }
    }
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::diff_manifests;

    fn manifest(pairs: &[(&str, &str)]) -> Manifest {
        pairs
            .iter()
            .map(|(path, content)| entry_for(path, content))
            .collect()
    }

    fn contents(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(p, c)| (p.to_string(), c.to_string()))
            .collect()
    }

    fn plan_for(
        direction: SyncDirection,
        baseline: &Manifest,
        local: &Manifest,
        remote_changes: &[RemoteChange],
        remote_contents: &BTreeMap<String, String>,
    ) -> Plan {
        let local_changes = diff_manifests(local, baseline);
        reconcile(&ReconcileInput {
            direction,
            local,
            local_changes: &local_changes,
            remote_changes,
            remote_contents,
        })
    }

    #[test]
    fn local_only_changes_upload_in_upload_directions() {
        let baseline = manifest(&[("a.txt", "1"), ("gone.txt", "g")]);
        let local = manifest(&[("a.txt", "2")]);
        let plan = plan_for(
            SyncDirection::LocalToRemote,
            &baseline,
            &local,
            &[],
            &BTreeMap::new(),
        );
        assert_eq!(plan.upload, vec!["a.txt".to_string()]);
        assert_eq!(plan.remote_remove, vec!["gone.txt".to_string()]);
        assert!(plan.deferred.is_empty());
    }

    #[test]
    fn local_changes_are_deferred_when_only_downloading() {
        let baseline = manifest(&[("a.txt", "1")]);
        let local = manifest(&[("a.txt", "2")]);
        let plan = plan_for(
            SyncDirection::RemoteToLocal,
            &baseline,
            &local,
            &[],
            &BTreeMap::new(),
        );
        assert!(plan.upload.is_empty());
        assert_eq!(plan.deferred, vec!["a.txt".to_string()]);
    }

    #[test]
    fn remote_writes_skip_identical_content() {
        let baseline = manifest(&[("same.txt", "x"), ("old.txt", "o")]);
        let local = baseline.clone();
        let remote = [
            RemoteChange::modified("same.txt"),
            RemoteChange::modified("old.txt"),
            RemoteChange::added("new.txt"),
        ];
        let fetched = contents(&[("same.txt", "x"), ("old.txt", "O2"), ("new.txt", "n")]);
        let plan = plan_for(SyncDirection::Both, &baseline, &local, &remote, &fetched);
        assert_eq!(
            plan.local_write,
            vec!["new.txt".to_string(), "old.txt".to_string()]
        );
    }

    #[test]
    fn remote_delete_removes_only_present_files() {
        let baseline = manifest(&[("a.txt", "1")]);
        let local = baseline.clone();
        let remote = [RemoteChange::deleted("a.txt"), RemoteChange::deleted("never.txt")];
        let plan = plan_for(
            SyncDirection::RemoteToLocal,
            &baseline,
            &local,
            &remote,
            &BTreeMap::new(),
        );
        assert_eq!(plan.local_remove, vec!["a.txt".to_string()]);
    }

    #[test]
    fn both_sides_changed_is_a_conflict_and_local_wins() {
        let baseline = manifest(&[("x", "v1")]);
        let local = manifest(&[("x", "local-v2")]);
        let remote = [RemoteChange::modified("x")];
        let fetched = contents(&[("x", "remote-v2")]);
        let plan = plan_for(SyncDirection::Both, &baseline, &local, &remote, &fetched);

        assert_eq!(
            plan.conflicts,
            vec![Conflict {
                path: "x".into(),
                local: LocalSide::Changed,
                remote: RemoteStatus::Modified,
            }]
        );
        assert!(plan.is_noop());
        assert_eq!(plan.deferred, vec!["x".to_string()]);
    }

    #[test]
    fn convergent_edits_are_not_conflicts() {
        let baseline = manifest(&[("x", "v1"), ("y", "y")]);
        let local = manifest(&[("x", "v2")]);
        let remote = [RemoteChange::modified("x"), RemoteChange::deleted("y")];
        let fetched = contents(&[("x", "v2")]);
        let plan = plan_for(SyncDirection::Both, &baseline, &local, &remote, &fetched);
        assert!(plan.conflicts.is_empty());
        assert!(plan.is_noop());
        assert!(plan.deferred.is_empty());
    }

    #[test]
    fn local_add_against_remote_delete_keeps_local() {
        let baseline = manifest(&[("x", "v1")]);
        let local = manifest(&[("x", "edited")]);
        let remote = [RemoteChange::deleted("x")];
        let plan = plan_for(SyncDirection::Both, &baseline, &local, &remote, &BTreeMap::new());
        assert_eq!(plan.conflicts.len(), 1);
        assert_eq!(plan.conflicts[0].local, LocalSide::Changed);
        assert_eq!(plan.conflicts[0].remote, RemoteStatus::Deleted);
        assert!(plan.local_remove.is_empty());
    }

    #[test]
    fn missing_remote_content_counts_as_deleted() {
        let baseline = manifest(&[("x", "v1")]);
        let local = baseline.clone();
        let remote = [RemoteChange::modified("x")];
        let plan = plan_for(SyncDirection::Both, &baseline, &local, &remote, &BTreeMap::new());
        assert_eq!(plan.local_remove, vec!["x".to_string()]);
    }

    #[test]
    fn next_baseline_keeps_pending_paths_at_previous_entries() {
        let previous = manifest(&[("x", "v1"), ("d", "deleted-locally")]);
        let confirmed = manifest(&[("x", "local-v2"), ("new", "n")]);
        let post = confirmed.clone();
        let next = next_baseline(
            &previous,
            &confirmed,
            &post,
            &["x".to_string(), "d".to_string(), "new".to_string()],
        );
        assert_eq!(next.hash_of("x"), previous.hash_of("x"));
        assert_eq!(next.hash_of("d"), previous.hash_of("d"));
        assert!(!next.contains("new"));
    }

    #[test]
    fn next_baseline_ignores_edits_that_landed_mid_pass() {
        let previous = manifest(&[("a", "1")]);
        let confirmed = manifest(&[("a", "2")]);
        let post = manifest(&[("a", "3"), ("late", "l")]);
        let next = next_baseline(&previous, &confirmed, &post, &[]);
        assert_eq!(next.hash_of("a"), previous.hash_of("a"));
        assert!(!next.contains("late"));
    }

    #[test]
    fn confirmed_manifest_applies_downloads() {
        let before = manifest(&[("a", "1"), ("b", "2")]);
        let plan = Plan {
            local_write: vec!["a".into(), "c".into()],
            local_remove: vec!["b".into()],
            ..Plan::default()
        };
        let fetched = contents(&[("a", "1'"), ("c", "3")]);
        let confirmed = confirmed_manifest(&before, &plan, &fetched);
        assert_eq!(confirmed, manifest(&[("a", "1'"), ("c", "3")]));
    }
}
