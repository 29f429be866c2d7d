use std::path::Path;
use std::sync::Arc;

use seqlift_protocol::{UploadEvent, UserCredentials};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::TransferError;
use crate::chunked::ChunkReader;
use crate::client::ChunkedUploadClient;
use crate::progress::{ObserverChain, ProgressNotifier, ThroughputObserver};
use crate::retry::{RetryDecision, RetryPolicy, RetryState, TransportError};
use crate::types::UploadSession;

/// Drives a [`ChunkedUploadClient`] until an archive is fully accepted.
///
/// Every attempt re-queries the server offset and resumes from there. Failed
/// attempts are classified by the [`RetryPolicy`]; the retry counter resets
/// whenever the server accepts new bytes.
pub struct ResumableUploader {
    client: Arc<dyn ChunkedUploadClient>,
    policy: RetryPolicy,
    cancel: CancellationToken,
    events: Option<mpsc::Sender<UploadEvent>>,
}

impl ResumableUploader {
    pub fn new(client: Arc<dyn ChunkedUploadClient>) -> Self {
        Self {
            client,
            policy: RetryPolicy::default(),
            cancel: CancellationToken::new(),
            events: None,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Sends a [`UploadEvent::Retrying`] for every scheduled retry.
    pub fn with_events(mut self, events: mpsc::Sender<UploadEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Uploads `archive` under `session` and returns the confirmed content identity.
    ///
    /// `notifier`, when given, is notified after every accepted chunk and is
    /// re-seeded with the server offset at the start of each attempt.
    pub async fn upload(
        &self,
        archive: &Path,
        session: &UploadSession,
        credentials: &UserCredentials,
        mut notifier: Option<&mut ProgressNotifier>,
    ) -> Result<String, TransferError> {
        let mut state = RetryState::default();
        let mut throughput = ThroughputObserver::new(session.session_key(), session.entity_size());
        let sequence_uuid = notifier
            .as_ref()
            .map(|n| n.context().sequence_uuid.clone())
            .unwrap_or_else(|| session.session_key().to_string());

        loop {
            if self.cancel.is_cancelled() {
                return Err(TransferError::Cancelled);
            }
            state.begin_attempt();

            let result = tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!(session = %session.session_key(), "upload cancelled");
                    return Err(TransferError::Cancelled);
                }
                r = self.attempt(
                    archive,
                    session,
                    credentials,
                    &mut state,
                    &mut throughput,
                    notifier.as_deref_mut(),
                ) => r,
            };

            let err = match result {
                Ok(hash) => {
                    info!(session = %session.session_key(), hash = %hash, "archive uploaded");
                    return Ok(hash);
                }
                Err(err) => err,
            };

            let delay = match self.policy.on_failure(&mut state, &err) {
                RetryDecision::Retry(delay) => delay,
                RetryDecision::GiveUp => {
                    warn!(
                        session = %session.session_key(),
                        attempts = state.attempts(),
                        error = %err,
                        "upload failed"
                    );
                    return Err(TransferError::Fatal {
                        attempts: state.attempts(),
                        source: err,
                    });
                }
            };

            warn!(
                session = %session.session_key(),
                attempt = state.attempts(),
                max = self.policy.max_retries,
                delay_secs = delay.as_secs(),
                error = %err,
                "upload attempt failed, retrying"
            );
            if let Some(tx) = &self.events {
                let _ = tx.try_send(UploadEvent::Retrying {
                    sequence_uuid: sequence_uuid.clone(),
                    attempt: state.attempts(),
                    delay_secs: delay.as_secs(),
                    error: err.to_string(),
                });
            }

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!(session = %session.session_key(), "upload cancelled during backoff");
                    return Err(TransferError::Cancelled);
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn attempt(
        &self,
        archive: &Path,
        session: &UploadSession,
        credentials: &UserCredentials,
        state: &mut RetryState,
        throughput: &mut ThroughputObserver,
        notifier: Option<&mut ProgressNotifier>,
    ) -> Result<String, TransportError> {
        let mut reader = ChunkReader::open(archive, session.chunk_size()).await?;
        let offset = self.client.fetch_offset(session, credentials).await?;
        reader.seek_to(offset).await?;
        let offset = reader.offset();
        if offset > 0 {
            debug!(session = %session.session_key(), offset, "resuming upload");
        }

        throughput.reset_to(offset);
        let mut chain = ObserverChain::new();
        chain.push(throughput);
        chain.push(state);
        if let Some(notifier) = notifier {
            notifier.reset_to(offset);
            chain.push(notifier);
        }

        self.client
            .upload(session, credentials, &mut reader, &mut chain)
            .await
    }
}
