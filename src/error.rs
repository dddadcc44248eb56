use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading, analysing, or writing location data.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid export: {0}")]
    InvalidExport(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid config: {0}")]
    Config(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Render error: {0}")]
    Render(String),

    #[error("HTTP client error: {0}")]
    Http(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io { path: path.into(), source }
    }
}

/// Result type for library operations
pub type Result<T> = std::result::Result<T, Error>;
