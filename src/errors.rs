// src/errors.rs
use thiserror::Error;

/// Failures a refresh can run into.
///
/// Only `NotAnArchive`, `MissingArchiveMember`, `Http`, `Archive`, `Worker`, `TimedOut` and an
/// unresolvable offer code column abort a refresh. The rest are logged and
/// degraded around by the stage that hit them.
#[derive(Debug, Error)]
pub enum TariffError {
    #[error("no download URL could be discovered")]
    DiscoveryFailed,

    #[error("content downloaded from {url} is not a zip archive")]
    NotAnArchive { url: String },

    #[error("file '{requested}' not found in archive, available: {available:?}")]
    MissingArchiveMember {
        requested: String,
        available: Vec<String>,
    },

    #[error("could not parse document '{document}': {reason}")]
    ParseFailure { document: String, reason: String },

    #[error("no {field} column among {columns:?}")]
    SchemaColumnMissing { field: String, columns: Vec<String> },

    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("worker task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),

    #[error("refresh did not finish within {0:?}")]
    TimedOut(std::time::Duration),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type TariffResult<T> = Result<T, TariffError>;

impl TariffError {
    pub(crate) fn http(url: impl Into<String>, source: reqwest::Error) -> Self {
        TariffError::Http {
            url: url.into(),
            source,
        }
    }
}
