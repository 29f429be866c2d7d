//! Shared data model for seqlift.
//!
//! Image descriptors as produced by the capture/processing tools, the user
//! credential record, per-sequence upload results and the progress events
//! published while an archive is transferred.

pub mod descriptor;
pub mod schema;
pub mod types;

pub use descriptor::{FinalImageDescriptor, ImageDescriptor};
pub use types::{ProgressEvent, SequenceInfo, UploadEvent, UserCredentials, PROGRESS_TOPIC};

/// Errors produced while decoding or validating protocol records.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{subject} does not match schema: {}", .details.join("; "))]
    Schema {
        subject: String,
        details: Vec<String>,
    },
}
