//! Remote change tracking: which sandbox files changed since a commit.
//!
//! [`GitTracker`] keeps a git repository inside the sandbox code directory
//! and drives it through [`RemoteEnvironment::run_shell_command`]. Everything
//! that parses git output stays private to this module.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;

use tandem_core::config::TrackerConfig;
use tandem_core::paths::housekeeping_exclusions;
use tandem_core::{ProjectId, RemoteChange, RemoteCommit};

use crate::error::SyncError;
use crate::remote::{shell_quote, RemoteEnvironment, ShellOutput};

/// Commits listed by [`ChangeTracker::commit_log`] without a starting point.
const RECENT_LOG_LIMIT: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitInfo {
    pub id: RemoteCommit,
    pub message: String,
}

/// Answer to "what changed since commit X".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteDiff {
    pub changes: Vec<RemoteChange>,
    /// The starting commit was absent or unknown, so every tracked file is
    /// reported as added.
    pub history_lost: bool,
}

#[async_trait]
pub trait ChangeTracker: Send + Sync {
    /// Initialize tracking in the sandbox. Cheap after the first success.
    async fn ensure_tracked(&self, project: &ProjectId) -> Result<(), SyncError>;

    /// Forget cached tracking state, e.g. after the sandbox was recreated.
    fn invalidate(&self, _project: &ProjectId) {}

    /// Commit the current sandbox tree if it differs from HEAD and return
    /// HEAD. `None` when nothing was ever committed.
    async fn snapshot(
        &self,
        project: &ProjectId,
        message: &str,
    ) -> Result<Option<RemoteCommit>, SyncError>;

    /// Changes between `since` and HEAD. Fails open on unknown history.
    async fn changed_since(
        &self,
        project: &ProjectId,
        since: Option<&RemoteCommit>,
    ) -> Result<RemoteDiff, SyncError>;

    /// Commits after `since`, newest first.
    async fn commit_log(
        &self,
        project: &ProjectId,
        since: Option<&RemoteCommit>,
    ) -> Result<Vec<CommitInfo>, SyncError>;
}

// ---------------------------------------------------------------------------
// GitTracker
// ---------------------------------------------------------------------------

pub struct GitTracker {
    remote: Arc<dyn RemoteEnvironment>,
    identity: TrackerConfig,
    extra_exclusions: Vec<String>,
    tracked: Mutex<HashSet<ProjectId>>,
}

impl GitTracker {
    pub fn new(remote: Arc<dyn RemoteEnvironment>, identity: TrackerConfig) -> Self {
        Self {
            remote,
            identity,
            extra_exclusions: Vec::new(),
            tracked: Mutex::new(HashSet::new()),
        }
    }

    /// Additional patterns written to `.git/info/exclude`.
    pub fn with_exclusions(mut self, patterns: &[String]) -> Self {
        self.extra_exclusions = patterns.to_vec();
        self
    }

    fn is_tracked(&self, project: &ProjectId) -> bool {
        self.tracked
            .lock()
            .map(|set| set.contains(project))
            .unwrap_or(false)
    }

    fn mark_tracked(&self, project: &ProjectId) {
        if let Ok(mut set) = self.tracked.lock() {
            set.insert(project.clone());
        }
    }

    async fn git(
        &self,
        project: &ProjectId,
        operation: &'static str,
        command: &str,
    ) -> Result<ShellOutput, SyncError> {
        tracing::trace!(project = %project, command, "tracker command");
        self.remote
            .run_shell_command(project, command)
            .await
            .map_err(|source| SyncError::Transport {
                project: project.to_string(),
                operation,
                source,
            })
    }

    async fn git_ok(
        &self,
        project: &ProjectId,
        operation: &'static str,
        command: &str,
    ) -> Result<ShellOutput, SyncError> {
        let output = self.git(project, operation, command).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(command_failed(project, operation, &output))
        }
    }

    async fn head(&self, project: &ProjectId) -> Result<Option<RemoteCommit>, SyncError> {
        let output = self
            .git(project, "rev-parse", "git rev-parse --verify -q HEAD")
            .await?;
        if !output.success() {
            return Ok(None);
        }
        let id = output.stdout.trim();
        Ok((!id.is_empty()).then(|| RemoteCommit::from(id)))
    }

    /// `true` when `commit` is a well-formed id the sandbox repository knows.
    async fn resolves(&self, project: &ProjectId, commit: &RemoteCommit) -> Result<bool, SyncError> {
        if !is_commit_id(commit.as_str()) {
            return Ok(false);
        }
        let command = format!("git cat-file -e {}^{{commit}}", commit.as_str());
        Ok(self.git(project, "cat-file", &command).await?.success())
    }

    async fn all_tracked_files(&self, project: &ProjectId) -> Result<RemoteDiff, SyncError> {
        let output = self.git_ok(project, "ls-files", "git ls-files -z").await?;
        Ok(RemoteDiff {
            changes: parse_ls_files(&output.stdout)
                .into_iter()
                .map(RemoteChange::added)
                .collect(),
            history_lost: true,
        })
    }

    fn exclude_file(&self) -> String {
        let mut lines: Vec<String> = housekeeping_exclusions()
            .into_iter()
            .map(str::to_string)
            .collect();
        lines.extend(self.extra_exclusions.iter().cloned());
        lines.join("\n")
    }
}

#[async_trait]
impl ChangeTracker for GitTracker {
    async fn ensure_tracked(&self, project: &ProjectId) -> Result<(), SyncError> {
        if self.is_tracked(project) {
            return Ok(());
        }
        let script = format!(
            "{{ test -d .git || git init -q; }} \
             && git config user.name {name} \
             && git config user.email {email} \
             && mkdir -p .git/info \
             && printf '%s\\n' {exclude} > .git/info/exclude",
            name = shell_quote(&self.identity.committer_name),
            email = shell_quote(&self.identity.committer_email),
            exclude = shell_quote(&self.exclude_file()),
        );
        self.git_ok(project, "init", &script).await?;
        self.mark_tracked(project);
        tracing::debug!(project = %project, "sandbox tracking initialized");
        Ok(())
    }

    fn invalidate(&self, project: &ProjectId) {
        if let Ok(mut set) = self.tracked.lock() {
            set.remove(project);
        }
    }

    async fn snapshot(
        &self,
        project: &ProjectId,
        message: &str,
    ) -> Result<Option<RemoteCommit>, SyncError> {
        self.ensure_tracked(project).await?;
        self.git_ok(project, "add", "git add -A").await?;

        let staged = self
            .git(project, "diff", "git diff --cached --quiet")
            .await?;
        match staged.exit_code {
            0 => {}
            1 => {
                let command = format!("git commit -q --no-verify -m {}", shell_quote(message));
                self.git_ok(project, "commit", &command).await?;
            }
            _ => return Err(command_failed(project, "diff", &staged)),
        }

        let head = self.head(project).await?;
        if let Some(commit) = &head {
            tracing::debug!(project = %project, commit = commit.short(), "sandbox snapshot");
        }
        Ok(head)
    }

    async fn changed_since(
        &self,
        project: &ProjectId,
        since: Option<&RemoteCommit>,
    ) -> Result<RemoteDiff, SyncError> {
        let Some(since) = since else {
            return self.all_tracked_files(project).await;
        };
        if !self.resolves(project, since).await? {
            tracing::warn!(
                project = %project,
                commit = since.short(),
                "baseline commit unknown to sandbox; treating every file as added"
            );
            return self.all_tracked_files(project).await;
        }

        let command = format!(
            "git diff --name-status -z --no-renames {} HEAD",
            since.as_str()
        );
        let output = self.git_ok(project, "diff", &command).await?;
        Ok(RemoteDiff {
            changes: parse_name_status(&output.stdout),
            history_lost: false,
        })
    }

    async fn commit_log(
        &self,
        project: &ProjectId,
        since: Option<&RemoteCommit>,
    ) -> Result<Vec<CommitInfo>, SyncError> {
        if self.head(project).await?.is_none() {
            return Ok(Vec::new());
        }
        let range = match since {
            Some(commit) if self.resolves(project, commit).await? => {
                format!("{}..HEAD", commit.as_str())
            }
            _ => format!("-n {RECENT_LOG_LIMIT} HEAD"),
        };
        let command = format!("git log --format=%H%x1f%s%x1e {range}");
        let output = self.git_ok(project, "log", &command).await?;
        Ok(parse_log(&output.stdout))
    }
}

fn command_failed(project: &ProjectId, operation: &'static str, output: &ShellOutput) -> SyncError {
    let detail = if output.stderr.trim().is_empty() {
        output.stdout.trim()
    } else {
        output.stderr.trim()
    };
    SyncError::Tracker {
        project: project.to_string(),
        operation,
        message: format!("exit {}: {detail}", output.exit_code),
    }
}

// ---------------------------------------------------------------------------
// Output parsers
// ---------------------------------------------------------------------------

fn is_commit_id(id: &str) -> bool {
    (4..=64).contains(&id.len()) && id.chars().all(|c| c.is_ascii_hexdigit())
}

/// `git diff --name-status -z`: `STATUS\0path\0`, with two paths for
/// renames and copies.
fn parse_name_status(raw: &str) -> Vec<RemoteChange> {
    let mut fields = raw.split('\0').filter(|f| !f.is_empty());
    let mut changes = Vec::new();
    while let Some(status) = fields.next() {
        match status.chars().next() {
            Some('A') => changes.extend(fields.next().map(RemoteChange::added)),
            Some('M') | Some('T') => changes.extend(fields.next().map(RemoteChange::modified)),
            Some('D') => changes.extend(fields.next().map(RemoteChange::deleted)),
            Some('R') => {
                let (from, to) = (fields.next(), fields.next());
                changes.extend(from.map(RemoteChange::deleted));
                changes.extend(to.map(RemoteChange::added));
            }
            Some('C') => {
                let _source = fields.next();
                changes.extend(fields.next().map(RemoteChange::added));
            }
            _ => {
                // Unmerged or unknown: skip its path.
                let _ = fields.next();
            }
        }
    }
    changes
}

fn parse_ls_files(raw: &str) -> Vec<String> {
    raw.split('\0')
        .filter(|path| !path.is_empty())
        .map(str::to_string)
        .collect()
}

/// Records of `%H%x1f%s%x1e`.
fn parse_log(raw: &str) -> Vec<CommitInfo> {
    raw.split('\u{1e}')
        .filter_map(|record| {
            let record = record.trim_matches('\n');
            let (id, message) = record.split_once('\u{1f}')?;
            let id = id.trim();
            (!id.is_empty()).then(|| CommitInfo {
                id: RemoteCommit::from(id),
                message: message.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use tandem_core::RemoteStatus;

    use super::*;

    #[test]
    fn name_status_statuses_map_to_changes() {
        let raw = "M\0src/app.ts\0A\0new file.txt\0D\0old.txt\0";
        let changes = parse_name_status(raw);
        assert_eq!(
            changes,
            vec![
                RemoteChange::modified("src/app.ts"),
                RemoteChange::added("new file.txt"),
                RemoteChange::deleted("old.txt"),
            ]
        );
    }

    #[test]
    fn renames_become_delete_plus_add() {
        let changes = parse_name_status("R087\0a.txt\0b.txt\0");
        assert_eq!(changes[0].status, RemoteStatus::Deleted);
        assert_eq!(changes[0].path, "a.txt");
        assert_eq!(changes[1].status, RemoteStatus::Added);
        assert_eq!(changes[1].path, "b.txt");
    }

    #[test]
    fn empty_output_means_no_changes() {
        assert!(parse_name_status("").is_empty());
        assert!(parse_ls_files("").is_empty());
        assert!(parse_log("").is_empty());
    }

    #[test]
    fn ls_files_splits_on_nul() {
        assert_eq!(
            parse_ls_files("a.txt\0dir/b c.txt\0"),
            vec!["a.txt".to_string(), "dir/b c.txt".to_string()]
        );
    }

    #[test]
    fn log_records_keep_message_text() {
        let raw = "abc123\u{1f}sync: 2 files\u{1e}\ndef456\u{1f}agent edit\u{1e}\n";
        let log = parse_log(raw);
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].id.as_str(), "abc123");
        assert_eq!(log[0].message, "sync: 2 files");
        assert_eq!(log[1].message, "agent edit");
    }

    #[rstest]
    #[case("0123abcdef", true)]
    #[case("0123456789abcdef0123456789abcdef01234567", true)]
    #[case("HEAD; rm -rf /", false)]
    #[case("$(touch x)", false)]
    #[case("abc", false)]
    #[case("", false)]
    fn only_hex_ids_are_interpolated(#[case] id: &str, #[case] accepted: bool) {
        assert_eq!(is_commit_id(id), accepted);
    }
}
