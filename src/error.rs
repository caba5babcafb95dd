use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A request that could not produce a response body.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("certificate verification failed for {url}: {source}")]
    Certificate { url: String, source: BoxError },

    #[error("request to {url} failed: {source}")]
    Request { url: String, source: BoxError },

    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },
}

impl TransportError {
    pub fn is_certificate(&self) -> bool {
        matches!(self, TransportError::Certificate { .. })
    }
}

/// Failure while draining a response body into its destination file.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("failed to create '{path}': {source}")]
    Create { path: PathBuf, source: io::Error },

    #[error("failed to read response body for '{path}': {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to write '{path}': {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("cancelled while writing '{path}'")]
    Cancelled { path: PathBuf },
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to serialize history: {0}")]
    Serialize(#[from] csv::Error),

    #[error("failed to write history file '{path}': {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("failed to parse history file '{path}': {source}")]
    Parse { path: PathBuf, source: csv::Error },
}

/// Why a single download task ended in `Failed`.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Io(#[from] WriteError),

    #[error("cancelled before the download started")]
    Cancelled,
}

impl TaskError {
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            TaskError::Cancelled | TaskError::Io(WriteError::Cancelled { .. })
        )
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("destination '{path}' is claimed by both {first} and {second}")]
    DuplicateDestination {
        path: PathBuf,
        first: String,
        second: String,
    },
}

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("download aggregation task crashed: {0}")]
    Aggregator(#[from] tokio::task::JoinError),
}
