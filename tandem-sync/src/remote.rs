//! Collaborator traits: the local replica and the remote sandbox.
//!
//! The sync engine only ever talks to these two traits; the shipped
//! implementations live in [`crate::adapters`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use tandem_core::ProjectId;

use crate::error::{RemoteError, StoreError};

/// One file as exchanged with either replica. `path` is namespaced
/// (`/dapp/...` locally, `/app/...` in the sandbox).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub content: String,
}

impl FileRecord {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// One page of a paginated sandbox download.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadPage {
    pub files: Vec<FileRecord>,
    /// Token for the next page; `None` on the last page.
    pub next_page: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShellOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ShellOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// The editable local replica.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Every file under `namespace` (e.g. `/dapp`).
    async fn list_files(
        &self,
        project: &ProjectId,
        namespace: &str,
    ) -> Result<Vec<FileRecord>, StoreError>;

    async fn upsert_file(
        &self,
        project: &ProjectId,
        path: &str,
        content: &str,
    ) -> Result<(), StoreError>;

    /// Returns `false` when the file did not exist.
    async fn delete_file(&self, project: &ProjectId, path: &str) -> Result<bool, StoreError>;
}

/// The disposable sandbox.
#[async_trait]
pub trait RemoteEnvironment: Send + Sync {
    async fn is_ready(&self, project: &ProjectId) -> Result<bool, RemoteError>;

    /// Request provisioning; readiness is observed through [`Self::is_ready`].
    async fn provision(&self, project: &ProjectId) -> Result<(), RemoteError>;

    /// Write every `path -> content` pair (remote namespace paths).
    async fn upload_batch(
        &self,
        project: &ProjectId,
        files: BTreeMap<String, String>,
    ) -> Result<(), RemoteError>;

    /// One page of files under `prefix` (the whole code directory when `None`).
    async fn download_page(
        &self,
        project: &ProjectId,
        prefix: Option<&str>,
        page_token: Option<&str>,
        page_size: usize,
    ) -> Result<DownloadPage, RemoteError>;

    /// Run `command` with `sh -c` inside the sandbox code directory.
    async fn run_shell_command(
        &self,
        project: &ProjectId,
        command: &str,
    ) -> Result<ShellOutput, RemoteError>;

    /// Drain every page of [`Self::download_page`].
    async fn download_all(
        &self,
        project: &ProjectId,
        prefix: Option<&str>,
        page_size: usize,
    ) -> Result<Vec<FileRecord>, RemoteError> {
        let mut files = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = self
                .download_page(project, prefix, token.as_deref(), page_size)
                .await?;
            files.extend(page.files);
            match page.next_page {
                Some(next) if Some(&next) != token.as_ref() => token = Some(next),
                _ => break,
            }
        }
        Ok(files)
    }

    /// Delete `paths` (relative to the code directory) with one shell command.
    async fn remove_batch(&self, project: &ProjectId, paths: &[String]) -> Result<(), RemoteError> {
        if paths.is_empty() {
            return Ok(());
        }
        let quoted: Vec<String> = paths.iter().map(|p| shell_quote(p)).collect();
        let command = format!("rm -f -- {}", quoted.join(" "));
        let output = self.run_shell_command(project, &command).await?;
        if output.success() {
            Ok(())
        } else {
            Err(RemoteError::Rejected {
                operation: "remove_batch",
                message: format!("exit {}: {}", output.exit_code, output.stderr.trim()),
            })
        }
    }
}

/// Single-quote `value` for POSIX `sh`.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
