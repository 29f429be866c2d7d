//! Resumable chunked transfer of sequence archives.
//!
//! The engine never talks to the network directly: it drives a
//! [`ChunkedUploadClient`] that can report how many bytes the server already
//! holds for a session and can send the rest. Around that seam this crate
//! provides the retry policy, the per-chunk observer chain and the resumable
//! upload loop.

mod chunked;
pub mod client;
pub mod http;
mod progress;
pub mod retry;
mod resumable;
mod types;
mod validation;

pub use chunked::{ChunkReader, checksum_bytes};
pub use client::{BoxFuture, ChunkedUploadClient, FakeUploadClient};
pub use http::HttpUploadClient;
pub use progress::{
    ChunkObserver, ObserverChain, ProgressNotifier, SequenceContext, SpeedCalculator,
    ThroughputObserver,
};
pub use resumable::ResumableUploader;
pub use retry::{RetryDecision, RetryPolicy, RetryState, TransportError};
pub use types::{AcceptedChunk, Chunk, UploadSession};
pub use validation::validate_entry_path;

/// Lower bound for the adaptive chunk size: 2 MiB.
pub const MIN_CHUNK_SIZE: usize = 2 * 1024 * 1024;

/// Upper bound for the adaptive chunk size: 16 MiB.
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Archives larger than this are accepted but flagged: 750 MiB.
pub const MAX_UPLOAD_SIZE: u64 = 750 * 1024 * 1024;

/// Picks a chunk size from the average image size of an archive.
///
/// Dense sequences (large images) get large chunks, sparse ones small
/// chunks; the result always lies in `[min, max]`. An empty archive or an
/// image count of zero yields `min`.
pub fn adaptive_chunk_size(entity_size: u64, image_count: usize, min: usize, max: usize) -> usize {
    let max = max.max(min);
    if image_count == 0 {
        return min;
    }
    let average = entity_size / image_count as u64;
    let average = usize::try_from(average).unwrap_or(usize::MAX);
    average.clamp(min, max)
}

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// A non-retriable failure, or a retriable one after the retry budget ran out.
    #[error("upload failed after {attempts} retries: {source}")]
    Fatal {
        attempts: u32,
        #[source]
        source: TransportError,
    },

    #[error("cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_size_uses_average_image_size() {
        let size = adaptive_chunk_size(40 * 1024 * 1024, 8, MIN_CHUNK_SIZE, MAX_CHUNK_SIZE);
        assert_eq!(size, 5 * 1024 * 1024);
    }

    #[test]
    fn chunk_size_clamps_small_images_to_min() {
        assert_eq!(
            adaptive_chunk_size(10, 3, MIN_CHUNK_SIZE, MAX_CHUNK_SIZE),
            MIN_CHUNK_SIZE
        );
        assert_eq!(
            adaptive_chunk_size(0, 1, MIN_CHUNK_SIZE, MAX_CHUNK_SIZE),
            MIN_CHUNK_SIZE
        );
    }

    #[test]
    fn chunk_size_clamps_large_images_to_max() {
        let size = adaptive_chunk_size(u64::MAX, 1, MIN_CHUNK_SIZE, MAX_CHUNK_SIZE);
        assert_eq!(size, MAX_CHUNK_SIZE);
    }

    #[test]
    fn chunk_size_zero_count_is_min() {
        assert_eq!(
            adaptive_chunk_size(1 << 30, 0, MIN_CHUNK_SIZE, MAX_CHUNK_SIZE),
            MIN_CHUNK_SIZE
        );
    }

    #[test]
    fn chunk_size_always_within_bounds() {
        for count in 1..50usize {
            for size in [1u64, 1 << 10, 1 << 20, 3 << 21, 1 << 26, 1 << 34] {
                let c = adaptive_chunk_size(size, count, MIN_CHUNK_SIZE, MAX_CHUNK_SIZE);
                assert!((MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&c));
            }
        }
    }
}
