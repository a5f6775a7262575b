//! `GitTracker` against a real `git` through `LocalSandbox`. Skipped when
//! `git` is not installed.

use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use tempfile::TempDir;

use tandem_core::config::TrackerConfig;
use tandem_core::{PathTranslator, ProjectId, RemoteCommit, RemoteStatus, SyncConfig, SyncDirection};
use tandem_sync::adapters::{DirStore, LocalSandbox};
use tandem_sync::{ChangeTracker, GitTracker, JsonFileBaselineStore, SyncService};

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn tracker_for(root: &Path) -> (Arc<LocalSandbox>, GitTracker) {
    let sandbox = Arc::new(
        LocalSandbox::new(PathTranslator::default()).with_project(ProjectId::from("demo"), root),
    );
    let tracker = GitTracker::new(sandbox.clone(), TrackerConfig::default());
    (sandbox, tracker)
}

#[tokio::test]
async fn snapshot_commits_only_when_the_tree_changes() {
    if !git_available() {
        eprintln!("git not installed; skipping");
        return;
    }
    let root = TempDir::new().unwrap();
    let (_sandbox, tracker) = tracker_for(root.path());
    let project = ProjectId::from("demo");

    assert_eq!(tracker.snapshot(&project, "empty").await.unwrap(), None);

    std::fs::write(root.path().join("a.txt"), "1").unwrap();
    let first = tracker.snapshot(&project, "first").await.unwrap().expect("commit");
    let again = tracker.snapshot(&project, "nothing new").await.unwrap();
    assert_eq!(again, Some(first.clone()));

    std::fs::write(root.path().join("a.txt"), "2").unwrap();
    std::fs::write(root.path().join("b.txt"), "b").unwrap();
    let second = tracker.snapshot(&project, "second").await.unwrap().unwrap();
    assert_ne!(first, second);

    let diff = tracker.changed_since(&project, Some(&first)).await.unwrap();
    assert!(!diff.history_lost);
    let mut changes: Vec<(String, RemoteStatus)> = diff
        .changes
        .into_iter()
        .map(|c| (c.path, c.status))
        .collect();
    changes.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(
        changes,
        vec![
            ("a.txt".to_string(), RemoteStatus::Modified),
            ("b.txt".to_string(), RemoteStatus::Added),
        ]
    );

    let log = tracker.commit_log(&project, Some(&first)).await.unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].message, "second");
}

#[tokio::test]
async fn unknown_commit_reports_every_file_as_added() {
    if !git_available() {
        return;
    }
    let root = TempDir::new().unwrap();
    let (_sandbox, tracker) = tracker_for(root.path());
    let project = ProjectId::from("demo");
    std::fs::write(root.path().join("a.txt"), "1").unwrap();
    tracker.snapshot(&project, "init").await.unwrap();

    let bogus = RemoteCommit::from("0123456789abcdef0123456789abcdef01234567");
    let diff = tracker.changed_since(&project, Some(&bogus)).await.unwrap();
    assert!(diff.history_lost);
    assert_eq!(diff.changes.len(), 1);
    assert_eq!(diff.changes[0].status, RemoteStatus::Added);

    let injected = RemoteCommit::from("HEAD; touch pwned");
    let diff = tracker.changed_since(&project, Some(&injected)).await.unwrap();
    assert!(diff.history_lost);
    assert!(!root.path().join("pwned").exists());
}

#[tokio::test]
async fn housekeeping_paths_are_never_committed() {
    if !git_available() {
        return;
    }
    let root = TempDir::new().unwrap();
    let (_sandbox, tracker) = tracker_for(root.path());
    let project = ProjectId::from("demo");
    std::fs::create_dir_all(root.path().join("node_modules/react")).unwrap();
    std::fs::write(root.path().join("node_modules/react/index.js"), "dep").unwrap();
    std::fs::write(root.path().join(".DS_Store"), "junk").unwrap();
    std::fs::write(root.path().join("index.ts"), "code").unwrap();

    tracker.snapshot(&project, "init").await.unwrap();
    let diff = tracker.changed_since(&project, None).await.unwrap();
    let paths: Vec<&str> = diff.changes.iter().map(|c| c.path.as_str()).collect();
    assert_eq!(paths, vec!["index.ts"]);
}

#[tokio::test]
async fn directory_replicas_round_trip_through_git() {
    if !git_available() {
        return;
    }
    let home = TempDir::new().unwrap();
    let local_root = TempDir::new().unwrap();
    let sandbox_root = TempDir::new().unwrap();
    let project = ProjectId::from("demo");
    let config = SyncConfig::default();

    let local = Arc::new(
        DirStore::new(config.translator()).with_project(project.clone(), local_root.path()),
    );
    let sandbox = Arc::new(
        LocalSandbox::new(config.translator()).with_project(project.clone(), sandbox_root.path()),
    );
    let tracker = Arc::new(GitTracker::new(sandbox.clone(), config.tracker.clone()));
    let baselines = Arc::new(JsonFileBaselineStore::at_home(home.path(), "sync-baseline"));
    let service = SyncService::new(local, sandbox, tracker, baselines, &config).unwrap();

    std::fs::create_dir_all(local_root.path().join("src")).unwrap();
    std::fs::write(local_root.path().join("src/app.ts"), "v1").unwrap();
    let first = service.sync(&project, SyncDirection::Both).await;
    assert!(first.success, "{}", first.summary);
    assert_eq!(
        std::fs::read_to_string(sandbox_root.path().join("src/app.ts")).unwrap(),
        "v1"
    );

    std::fs::write(sandbox_root.path().join("README.md"), "agent wrote this").unwrap();
    std::fs::remove_file(sandbox_root.path().join("src/app.ts")).unwrap();
    let second = service.sync(&project, SyncDirection::Both).await;
    assert!(second.success, "{}", second.summary);
    assert_eq!(second.downloaded, vec!["README.md".to_string()]);
    assert_eq!(second.removed, vec!["src/app.ts".to_string()]);
    assert!(!local_root.path().join("src").exists());
    assert!(home
        .path()
        .join(".tandem/baselines/sync-baseline-demo.json")
        .exists());
}
