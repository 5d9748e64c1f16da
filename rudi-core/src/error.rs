//! Error types for rudi-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from the persistence collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying I/O failure, annotated with the document path.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A stored JSON document could not be parsed (load path).
    #[error("failed to parse document at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// JSON serialization error (save path).
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// The blocking I/O task backing an async store call did not complete.
    #[error("store task failed: {0}")]
    Task(String),
}

/// Errors raised while loading the node configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error on load: includes file path and line context from serde_yaml.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None`: cannot locate `~/.rudi/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// Portal credentials are missing or the password is not valid base64.
    #[error("invalid portal credentials: {0}")]
    InvalidCredentials(String),

    /// No `portal_url` is configured.
    #[error("portal connection is disabled (no portal_url configured)")]
    PortalDisabled,
}

/// Convenience constructor for [`StoreError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}
