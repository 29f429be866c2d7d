//! Upload flow error types.

use std::path::PathBuf;

/// Errors produced while validating, packaging or uploading sequences.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Protocol(#[from] seqlift_protocol::ProtocolError),

    #[error("image path {} not found", .0.display())]
    MissingImage(PathBuf),

    #[error("unable to find the root dir of an empty sequence")]
    EmptySequence,

    #[error("no common root dir found within {0} levels")]
    RootTooDeep(usize),

    #[error("invalid archive entry: {0}")]
    InvalidEntry(String),

    #[error("the zip file {} is empty", .0.display())]
    EmptyArchive(PathBuf),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("transfer error: {0}")]
    Transfer(#[from] seqlift_transfer::TransferError),

    #[error("metadata submission failed: {0}")]
    Metadata(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("cancelled")]
    Cancelled,

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
