//! Namespace translation between the two replicas and the housekeeping filter.
//!
//! The local replica addresses files as `<local_prefix>/<relative>` and the
//! sandbox as `<remote_prefix>/<relative>`. Manifests, diffs and baselines
//! only ever hold the `<relative>` part.

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::error::CoreError;

pub const DEFAULT_LOCAL_PREFIX: &str = "/dapp";
pub const DEFAULT_REMOTE_PREFIX: &str = "/app";

/// File names that are never synchronized.
const HOUSEKEEPING_FILES: &[&str] = &[".DS_Store", "Thumbs.db", "ehthumbs.db", "desktop.ini"];

/// Any path with one of these directory components is never synchronized.
const HOUSEKEEPING_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    ".next",
    ".cache",
    ".turbo",
    "__pycache__",
];

/// File-name globs that are never synchronized.
const HOUSEKEEPING_PATTERNS: &[&str] = &["._*", "*.swp", "*.swo", "*~", "*.tandem.tmp"];

/// Normalize a project-relative path: forward slashes, no empty or `.`
/// segments, no leading slash. Returns `None` for empty paths or paths that
/// climb out of the project with `..`.
pub fn normalize_relative(path: &str) -> Option<String> {
    let unified = path.replace('\\', "/");
    let mut parts = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return None,
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

fn strip_namespace<'a>(prefix: &str, path: &'a str) -> Option<&'a str> {
    if prefix.is_empty() {
        return Some(path);
    }
    let rest = path.strip_prefix(prefix)?;
    if rest.is_empty() || rest.starts_with('/') {
        Some(rest)
    } else {
        // `/dappx/...` is not inside `/dapp`.
        None
    }
}

/// Fixed prefix substitution between the local and remote namespaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTranslator {
    local_prefix: String,
    remote_prefix: String,
}

impl Default for PathTranslator {
    fn default() -> Self {
        Self::new(DEFAULT_LOCAL_PREFIX, DEFAULT_REMOTE_PREFIX)
    }
}

impl PathTranslator {
    pub fn new(local_prefix: &str, remote_prefix: &str) -> Self {
        Self {
            local_prefix: normalize_prefix(local_prefix),
            remote_prefix: normalize_prefix(remote_prefix),
        }
    }

    pub fn local_prefix(&self) -> &str {
        &self.local_prefix
    }

    pub fn remote_prefix(&self) -> &str {
        &self.remote_prefix
    }

    /// `/dapp/src/a.ts` → `src/a.ts`; `None` outside the local namespace.
    pub fn relative_from_local(&self, path: &str) -> Option<String> {
        strip_namespace(&self.local_prefix, path).and_then(normalize_relative)
    }

    /// `/app/src/a.ts` → `src/a.ts`; `None` outside the remote namespace.
    pub fn relative_from_remote(&self, path: &str) -> Option<String> {
        strip_namespace(&self.remote_prefix, path).and_then(normalize_relative)
    }

    pub fn local_from_relative(&self, relative: &str) -> String {
        format!("{}/{}", self.local_prefix, relative.trim_start_matches('/'))
    }

    pub fn remote_from_relative(&self, relative: &str) -> String {
        format!("{}/{}", self.remote_prefix, relative.trim_start_matches('/'))
    }

    pub fn local_to_remote(&self, path: &str) -> Option<String> {
        self.relative_from_local(path)
            .map(|relative| self.remote_from_relative(&relative))
    }

    pub fn remote_to_local(&self, path: &str) -> Option<String> {
        self.relative_from_remote(path)
            .map(|relative| self.local_from_relative(&relative))
    }
}

/// Predicate excluding housekeeping files from manifests, diffs and transfers.
#[derive(Debug, Clone)]
pub struct IgnoreFilter {
    globs: GlobSet,
    extra: GlobSet,
    extra_patterns: Vec<String>,
}

impl Default for IgnoreFilter {
    fn default() -> Self {
        Self::builtin()
    }
}

impl IgnoreFilter {
    /// Only the built-in housekeeping rules.
    pub fn builtin() -> Self {
        Self {
            globs: builtin_globs().unwrap_or_else(|_| GlobSet::empty()),
            extra: GlobSet::empty(),
            extra_patterns: Vec::new(),
        }
    }

    /// Built-in rules plus extra globs matched against the relative path.
    pub fn with_patterns(patterns: &[String]) -> Result<Self, CoreError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let glob = Glob::new(pattern).map_err(|source| CoreError::IgnorePattern {
                pattern: pattern.clone(),
                source,
            })?;
            builder.add(glob);
        }
        let extra = builder.build().map_err(|source| CoreError::IgnorePattern {
            pattern: patterns.join(","),
            source,
        })?;
        Ok(Self {
            extra,
            extra_patterns: patterns.to_vec(),
            ..Self::builtin()
        })
    }

    pub fn extra_patterns(&self) -> &[String] {
        &self.extra_patterns
    }

    /// True when `relative` (a project-relative path) must not be synchronized.
    pub fn is_ignored(&self, relative: &str) -> bool {
        let normalized = relative.replace('\\', "/");
        let mut segments = normalized.split('/').filter(|s| !s.is_empty()).peekable();
        let mut file_name = "";
        while let Some(segment) = segments.next() {
            if segments.peek().is_none() {
                file_name = segment;
            } else if HOUSEKEEPING_DIRS.contains(&segment) {
                return true;
            }
        }

        if file_name.is_empty() {
            return true;
        }
        if HOUSEKEEPING_FILES.contains(&file_name) {
            return true;
        }
        if self.globs.is_match(file_name) {
            return true;
        }
        self.extra.is_match(normalized.trim_start_matches('/'))
    }
}

fn builtin_globs() -> Result<GlobSet, globset::Error> {
    let mut builder = GlobSetBuilder::new();
    for pattern in HOUSEKEEPING_PATTERNS {
        builder.add(Glob::new(pattern)?);
    }
    builder.build()
}

/// True for directory names whose contents are never synchronized.
pub fn is_housekeeping_dir(name: &str) -> bool {
    HOUSEKEEPING_DIRS.contains(&name)
}

/// Directory names the tracker should exclude from version control.
pub fn housekeeping_exclusions() -> Vec<&'static str> {
    HOUSEKEEPING_DIRS
        .iter()
        .filter(|dir| **dir != ".git")
        .chain(HOUSEKEEPING_FILES.iter())
        .chain(HOUSEKEEPING_PATTERNS.iter())
        .copied()
        .collect()
}
