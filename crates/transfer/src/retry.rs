//! Failure classification and bounded exponential backoff.

use std::time::Duration;

use serde_json::Value;

use crate::progress::ChunkObserver;
use crate::types::AcceptedChunk;

/// Failure reported by a [`ChunkedUploadClient`](crate::ChunkedUploadClient).
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    /// The server answered with an error status.
    #[error("{method} {url} returned {status}: {body}")]
    Status {
        method: String,
        url: String,
        status: u16,
        body: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Whether retrying the same logical operation may succeed.
    ///
    /// Connectivity and timeout failures and server errors are retriable.
    /// Client errors (4xx) are retriable only when the response body is JSON
    /// carrying `debug_info.retriable: true`. Everything else is fatal.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Connect(_) | Self::Timeout(_) => true,
            Self::Status { status, body, .. } if (400..500).contains(status) => {
                body_flags_retriable(body)
            }
            Self::Status { .. } => true,
            Self::Io(_) | Self::Protocol(_) => false,
        }
    }

    /// HTTP status of the failed request, if the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

fn body_flags_retriable(body: &str) -> bool {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("debug_info")?.get("retriable")?.as_bool())
        .unwrap_or(false)
}

/// Retry bookkeeping for one upload loop.
///
/// Lent to each attempt as a chunk observer; the counter resets whenever the
/// server accepts new bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryState {
    attempts: u32,
    made_progress: bool,
}

impl RetryState {
    /// Retries consumed since the last forward progress.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether the current attempt got any bytes accepted.
    pub fn made_progress(&self) -> bool {
        self.made_progress
    }

    /// Clears the per-attempt progress flag.
    pub fn begin_attempt(&mut self) {
        self.made_progress = false;
    }
}

impl ChunkObserver for RetryState {
    fn on_chunk_accepted(&mut self, _chunk: &AcceptedChunk) {
        self.attempts = 0;
        self.made_progress = true;
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for the delay, then re-query the offset and try again.
    Retry(Duration),
    /// Propagate the failure.
    GiveUp,
}

/// Retry ceiling and backoff cap.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum consecutive retries without forward progress.
    pub max_retries: u32,
    /// Maximum delay between attempts.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 200,
            max_backoff: Duration::from_secs(16),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): `min(2^attempt, cap)` seconds.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let secs = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_secs(secs).min(self.max_backoff)
    }

    /// Classifies a failure and updates `state`.
    ///
    /// Retriable failures below the ceiling consume one retry; anything else
    /// gives up and leaves the counter untouched.
    pub fn on_failure(&self, state: &mut RetryState, err: &TransportError) -> RetryDecision {
        if state.attempts < self.max_retries && err.is_retriable() {
            state.attempts += 1;
            RetryDecision::Retry(self.delay_for_attempt(state.attempts))
        } else {
            RetryDecision::GiveUp
        }
    }
}
