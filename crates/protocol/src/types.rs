use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ProtocolError;

/// Topic under which byte-progress events are published.
pub const PROGRESS_TOPIC: &str = "upload";

/// Stored user record: upload bearer token plus the account name used for
/// backup partitioning and offset queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCredentials {
    #[serde(rename = "SettingsUsername")]
    pub username: String,
    #[serde(rename = "user_upload_token")]
    pub upload_token: String,
}

impl UserCredentials {
    /// Validates a raw user record against the user schema, then decodes it.
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        crate::schema::validate_user(&value)?;
        Ok(serde_json::from_value(value)?)
    }
}

/// Aggregated result of one uploaded sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceInfo {
    /// Number of images in the sequence.
    pub count: usize,
    /// Archive size in MiB.
    pub size: f64,
    /// Content identity confirmed by the upload.
    pub hash: String,
}

/// Byte-progress notification for one accepted chunk.
///
/// `uploaded_bytes` is cumulative and continues from the resume offset when
/// an upload is resumed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub chunk_size: u64,
    pub uploaded_bytes: u64,
    pub sequence_path: String,
    pub sequence_uuid: String,
    pub total_bytes: u64,
    pub sequence_idx: usize,
    pub total_sequences: usize,
}

impl ProgressEvent {
    /// Returns the progress as a percentage (0-100).
    pub fn percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.uploaded_bytes as f64 / self.total_bytes as f64 * 100.0
    }
}

/// Events published by the upload engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum UploadEvent {
    /// A sequence was packaged and its transfer is about to start.
    SequenceStarted {
        sequence_uuid: String,
        sequence_idx: usize,
        total_sequences: usize,
        total_bytes: u64,
    },
    /// A chunk was accepted by the server.
    #[serde(rename = "upload")]
    Progress(ProgressEvent),
    /// A transfer attempt failed and will be retried.
    Retrying {
        sequence_uuid: String,
        attempt: u32,
        delay_secs: u64,
        error: String,
    },
    /// The archive was uploaded and its metadata submitted.
    SequenceCompleted {
        sequence_uuid: String,
        info: SequenceInfo,
    },
}
