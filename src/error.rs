//! Crate-wide error type. Every error aborts the run; nothing is retried.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("unsupported source: {0}")]
    UnsupportedSource(String),

    #[error("source metadata unavailable: {0}")]
    Metadata(String),

    #[error("stream integrity violated: {0}")]
    StreamIntegrity(String),

    /// Write or discard after streaming has started. Programmer error,
    /// unreachable when the pipeline drives the ledger.
    #[error("ledger is frozen, no further writes are accepted")]
    LedgerFrozen,

    #[error("operation not supported: {0}")]
    NotSupported(String),

    #[error("unsupported partition encoding: {0}")]
    UnsupportedPartitionEncoding(String),

    #[error("config data missing from operation")]
    MissingPayload,

    #[error("partition missing from operation")]
    MissingPartition,

    #[error("copy operation needs from and to endpoints")]
    MissingEndpoints,

    #[error("unknown operation command: {0}")]
    UnknownCommand(String),

    #[error("filesystem session error: {0}")]
    FilesystemSession(String),

    #[error("object store error: {0}")]
    ObjectStore(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ImageError>;
