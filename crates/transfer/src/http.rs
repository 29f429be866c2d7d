//! HTTP binding of [`ChunkedUploadClient`].
//!
//! Wire contract:
//! - `GET {endpoint}/{session_key}?identity={username}` answers `{"offset": n}`
//!   with the number of bytes already held for the session.
//! - Each chunk is `POST`ed to `{endpoint}/{session_key}` with the raw bytes as
//!   body and `X-Offset`, `X-Entity-Length` and `X-Chunk-Sha256` headers.
//!   The response to the chunk that completes the entity carries
//!   `{"hash": "..."}`.
//!
//! Every request is authorized with the user's upload token as a bearer token.

use std::time::Duration;

use seqlift_protocol::UserCredentials;
use serde_json::Value;
use tracing::{debug, trace};

use crate::chunked::ChunkReader;
use crate::client::{BoxFuture, ChunkedUploadClient};
use crate::progress::ObserverChain;
use crate::retry::TransportError;
use crate::types::{AcceptedChunk, UploadSession};

const HEADER_OFFSET: &str = "X-Offset";
const HEADER_ENTITY_LENGTH: &str = "X-Entity-Length";
const HEADER_CHUNK_SHA256: &str = "X-Chunk-Sha256";
const HEADER_ORGANIZATION: &str = "X-Organization-Key";
const HEADER_PROJECT: &str = "X-Project-Key";

/// Resumable upload service client over HTTP.
#[derive(Debug, Clone)]
pub struct HttpUploadClient {
    http_client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpUploadClient {
    pub fn new(http_client: reqwest::Client, endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http_client,
            endpoint: endpoint.into(),
            timeout,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn session_url(&self, session: &UploadSession) -> String {
        format!(
            "{}/{}",
            self.endpoint.trim_end_matches('/'),
            session.session_key()
        )
    }

    async fn send_chunk(
        &self,
        url: &str,
        session: &UploadSession,
        credentials: &UserCredentials,
        offset: u64,
        data: Vec<u8>,
        checksum: &str,
    ) -> Result<Value, TransportError> {
        let mut request = self
            .http_client
            .post(url)
            .timeout(self.timeout)
            .bearer_auth(&credentials.upload_token)
            .header(HEADER_OFFSET, offset)
            .header(HEADER_ENTITY_LENGTH, session.entity_size())
            .header(HEADER_CHUNK_SHA256, checksum);
        if let Some(org) = session.organization_key() {
            request = request.header(HEADER_ORGANIZATION, org);
        }
        if let Some(project) = session.project_key() {
            request = request.header(HEADER_PROJECT, project);
        }

        let response = request.body(data).send().await.map_err(map_reqwest)?;
        read_json("POST", url, response).await
    }
}

impl ChunkedUploadClient for HttpUploadClient {
    fn fetch_offset<'a>(
        &'a self,
        session: &'a UploadSession,
        credentials: &'a UserCredentials,
    ) -> BoxFuture<'a, Result<u64, TransportError>> {
        Box::pin(async move {
            let url = self.session_url(session);
            let response = self
                .http_client
                .get(&url)
                .timeout(self.timeout)
                .bearer_auth(&credentials.upload_token)
                .query(&[("identity", credentials.username.as_str())])
                .send()
                .await
                .map_err(map_reqwest)?;
            let body = read_json("GET", &url, response).await?;
            let offset = parse_offset(&body)?;
            debug!(session = %session.session_key(), offset, "server offset");
            Ok(offset)
        })
    }

    fn upload<'a, 'o: 'a>(
        &'a self,
        session: &'a UploadSession,
        credentials: &'a UserCredentials,
        reader: &'a mut ChunkReader,
        observers: &'a mut ObserverChain<'o>,
    ) -> BoxFuture<'a, Result<String, TransportError>> {
        Box::pin(async move {
            let url = self.session_url(session);

            // The server already holds everything: an empty request at the
            // end offset asks it to finalize and report the hash.
            if reader.remaining() == 0 {
                let offset = reader.offset();
                let body = self
                    .send_chunk(&url, session, credentials, offset, Vec::new(), &crate::checksum_bytes(&[]))
                    .await?;
                return parse_hash(&body);
            }

            let mut last = Value::Null;
            while let Some(chunk) = reader.next_chunk().await? {
                let accepted = AcceptedChunk {
                    offset: chunk.offset,
                    size: chunk.size() as u64,
                };
                last = self
                    .send_chunk(&url, session, credentials, chunk.offset, chunk.data, &chunk.checksum)
                    .await?;
                trace!(offset = accepted.offset, size = accepted.size, "chunk accepted");
                observers.notify(&accepted);
            }
            parse_hash(&last)
        })
    }
}

async fn read_json(method: &str, url: &str, response: reqwest::Response) -> Result<Value, TransportError> {
    let status = response.status();
    let body = response.text().await.map_err(map_reqwest)?;
    if !status.is_success() {
        return Err(TransportError::Status {
            method: method.to_string(),
            url: url.to_string(),
            status: status.as_u16(),
            body,
        });
    }
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&body)
        .map_err(|e| TransportError::Protocol(format!("invalid JSON from {method} {url}: {e}")))
}

fn map_reqwest(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(err.to_string())
    } else if err.is_connect() || err.is_request() || err.is_body() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Protocol(err.to_string())
    }
}

fn parse_offset(body: &Value) -> Result<u64, TransportError> {
    body.get("offset")
        .and_then(Value::as_u64)
        .ok_or_else(|| TransportError::Protocol(format!("offset missing from response: {body}")))
}

fn parse_hash(body: &Value) -> Result<String, TransportError> {
    body.get("hash")
        .and_then(Value::as_str)
        .filter(|h| !h.is_empty())
        .map(str::to_string)
        .ok_or_else(|| TransportError::Protocol(format!("hash missing from response: {body}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn session_url_joins_endpoint_and_key() {
        let client = HttpUploadClient::new(
            reqwest::Client::new(),
            "https://upload.example/v1/",
            Duration::from_secs(30),
        );
        let session = UploadSession::new("seq_abc.zip", 10, 4);
        assert_eq!(
            client.session_url(&session),
            "https://upload.example/v1/seq_abc.zip"
        );
    }

    #[test]
    fn offset_is_required() {
        assert_eq!(parse_offset(&json!({"offset": 42})).unwrap(), 42);
        assert!(matches!(
            parse_offset(&json!({"other": 1})),
            Err(TransportError::Protocol(_))
        ));
        assert!(parse_offset(&json!({"offset": -1})).is_err());
    }

    #[test]
    fn hash_is_required_and_non_empty() {
        assert_eq!(parse_hash(&json!({"hash": "d41d8c"})).unwrap(), "d41d8c");
        assert!(parse_hash(&json!({"hash": ""})).is_err());
        assert!(parse_hash(&Value::Null).is_err());
    }

    #[test]
    fn missing_hash_is_not_retriable() {
        let err = parse_hash(&json!({})).unwrap_err();
        assert!(!err.is_retriable());
    }
}
