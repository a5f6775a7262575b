//! Error types for tandem-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from registry and configuration operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Underlying I/O failure, with the path that was being touched.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML serialization error (write/save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load: includes file path and line context from serde_yaml.
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None`: cannot locate `~/.tandem/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// The project YAML file did not exist at the expected path.
    #[error("project not found at {path}")]
    ProjectNotFound { path: PathBuf },

    /// A project with this id is already registered.
    #[error("project '{id}' is already registered at {path}")]
    ProjectExists { id: String, path: PathBuf },

    /// Project ids become file names and baseline keys.
    #[error("invalid project id '{0}': use letters, digits, '-', '_' or '.'")]
    InvalidProjectId(String),

    /// A configured ignore pattern is not a valid glob.
    #[error("invalid ignore pattern '{pattern}': {source}")]
    IgnorePattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },
}

/// Convenience constructor for [`CoreError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> CoreError {
    CoreError::Io {
        path: path.into(),
        source,
    }
}
