//! Error taxonomy for the ingestion pipeline
//!
//! Each stage has its own error type so the orchestrator can tell an
//! unpublished month (skip) apart from a transport, parse or write failure.

use thiserror::Error;

use crate::month::SnapshotMonth;

/// Retrieval errors surfaced by the snapshot fetcher
#[derive(Debug, Error)]
pub enum FetchError {
    /// The resource definitively does not exist (404/410); never retried
    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    /// Transient failure that persisted after all retries
    #[error("transport error for {url} after {attempts} attempt(s): {message}")]
    Transport {
        url: String,
        attempts: u32,
        message: String,
    },
}

impl FetchError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::NotFound(_))
    }
}

/// The snapshot as a whole could not be read
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("detailed listing is not a JSON object")]
    NotAnObject,

    #[error("ranking listing contains no table rows")]
    NoRankingRows,

    #[error("failed to read snapshot file: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("row {name} belongs to {row_key}, not {key}")]
    KeyMismatch {
        name: String,
        row_key: String,
        key: String,
    },
}

/// A single malformed entity dropped from an otherwise valid snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct RecordSkipped {
    pub name: String,
    pub reason: String,
}

impl RecordSkipped {
    pub fn new(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for RecordSkipped {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.reason)
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    /// No snapshot has been published for this month yet
    #[error("no snapshot published for {month} (tried {tried} candidate(s))")]
    SourceNotFound { month: SnapshotMonth, tried: usize },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Write(#[from] WriteError),
}
