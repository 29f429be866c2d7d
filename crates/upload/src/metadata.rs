//! Per-sequence metadata submission and its local backup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Local;
use seqlift_protocol::{ImageDescriptor, SequenceInfo, UserCredentials};
use seqlift_transfer::BoxFuture;
use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use crate::error::UploadError;

/// Parameters of one metadata submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetadataRequest {
    pub organization_key: String,
    pub project_key: String,
    /// Descriptor records of the uploaded sequence.
    pub json_data: Vec<ImageDescriptor>,
    /// Description-file summary augmented with the sequence result.
    pub summary: Value,
}

impl MetadataRequest {
    pub fn new(
        organization_key: Option<&str>,
        project_key: Option<&str>,
        json_data: Vec<ImageDescriptor>,
        summary: Value,
    ) -> Self {
        Self {
            organization_key: organization_key.unwrap_or_default().to_string(),
            project_key: project_key.unwrap_or_default().to_string(),
            json_data,
            summary,
        }
    }

    /// Request body: `{"options": {"parameters": {...}}}`.
    pub fn payload(&self) -> Result<Value, UploadError> {
        Ok(json!({ "options": { "parameters": serde_json::to_value(self)? } }))
    }
}

/// Builds the summary record for one sequence.
///
/// The trailing record of a description file is its summary when it is not
/// an image record. `Information.Sequence` is set to `{uuid: info}`.
pub fn build_summary(
    descs: &[Value],
    sequence_uuid: &str,
    info: &SequenceInfo,
) -> Result<Value, UploadError> {
    let mut summary: Map<String, Value> = descs
        .last()
        .filter(|d| d.get("Heading").is_none())
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    let mut sequence = Map::new();
    sequence.insert(sequence_uuid.to_string(), serde_json::to_value(info)?);

    let information = summary
        .entry("Information")
        .or_insert_with(|| Value::Object(Map::new()));
    if !information.is_object() {
        *information = Value::Object(Map::new());
    }
    if let Some(information) = information.as_object_mut() {
        information.insert("Sequence".to_string(), Value::Object(sequence));
    }
    Ok(Value::Object(summary))
}

/// Sends per-sequence metadata to the ingestion service.
pub trait MetadataSubmitter: Send + Sync {
    fn submit<'a>(
        &'a self,
        request: &'a MetadataRequest,
        credentials: &'a UserCredentials,
    ) -> BoxFuture<'a, Result<(), UploadError>>;
}

/// Posts metadata as JSON with bearer authentication.
///
/// A non-success answer is logged and tolerated; only transport failures
/// are errors.
#[derive(Debug, Clone)]
pub struct HttpMetadataSubmitter {
    http_client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpMetadataSubmitter {
    pub fn new(http_client: reqwest::Client, endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http_client,
            endpoint: endpoint.into(),
            timeout,
        }
    }
}

impl MetadataSubmitter for HttpMetadataSubmitter {
    fn submit<'a>(
        &'a self,
        request: &'a MetadataRequest,
        credentials: &'a UserCredentials,
    ) -> BoxFuture<'a, Result<(), UploadError>> {
        Box::pin(async move {
            let payload = request.payload()?;
            let response = self
                .http_client
                .post(&self.endpoint)
                .timeout(self.timeout)
                .bearer_auth(&credentials.upload_token)
                .json(&payload)
                .send()
                .await
                .map_err(|e| UploadError::Metadata(format!("POST {}: {e}", self.endpoint)))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                warn!(
                    endpoint = %self.endpoint,
                    status = status.as_u16(),
                    body = %body,
                    "metadata rejected"
                );
                return Ok(());
            }
            info!(images = request.json_data.len(), "metadata submitted");
            Ok(())
        })
    }
}

/// Accepts every submission without network access.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunSubmitter;

impl MetadataSubmitter for DryRunSubmitter {
    fn submit<'a>(
        &'a self,
        request: &'a MetadataRequest,
        _credentials: &'a UserCredentials,
    ) -> BoxFuture<'a, Result<(), UploadError>> {
        Box::pin(async move {
            debug!(images = request.json_data.len(), "dry run: metadata not submitted");
            Ok(())
        })
    }
}

/// Keeps a copy of every outgoing metadata payload, per user.
#[derive(Debug, Clone)]
pub struct BackupStore {
    dir: PathBuf,
}

impl BackupStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes `<dir>/<username>/<timestamp>_backup_request_<org>_<project>.json`.
    pub fn write(&self, username: &str, request: &MetadataRequest) -> Result<PathBuf, UploadError> {
        let user_dir = self.dir.join(username);
        std::fs::create_dir_all(&user_dir)?;

        let timestamp = Local::now().format("%Y_%m_%d_%H_%M_%S");
        let path = user_dir.join(format!(
            "{timestamp}_backup_request_{}_{}.json",
            request.organization_key, request.project_key
        ));
        let json = serde_json::to_string_pretty(&request.payload()?)?;
        std::fs::write(&path, json)?;
        debug!(path = %path.display(), "metadata backup written");
        Ok(path)
    }
}
