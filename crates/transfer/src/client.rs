//! The chunked-upload collaborator seam.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use md5::{Digest, Md5};
use seqlift_protocol::UserCredentials;
use tracing::debug;

use crate::chunked::ChunkReader;
use crate::progress::ObserverChain;
use crate::retry::TransportError;
use crate::types::{AcceptedChunk, UploadSession};

/// Boxed future returned by [`ChunkedUploadClient`] methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Resumable chunked transfer of one archive.
///
/// Implementations keep the server-side resumable state keyed by
/// [`UploadSession::session_key`]. Using a trait keeps the upload loop
/// decoupled from the wire protocol and testable with mocks.
pub trait ChunkedUploadClient: Send + Sync {
    /// Returns how many bytes of the session the server has durably accepted.
    ///
    /// The credentials' username is passed as the identity of the uploader.
    fn fetch_offset<'a>(
        &'a self,
        session: &'a UploadSession,
        credentials: &'a UserCredentials,
    ) -> BoxFuture<'a, Result<u64, TransportError>>;

    /// Sends the rest of the archive, starting at the reader's position.
    ///
    /// `observers` must be notified, in order, after every chunk the server
    /// accepts. Returns the content identity confirmed for the archive.
    fn upload<'a, 'o: 'a>(
        &'a self,
        session: &'a UploadSession,
        credentials: &'a UserCredentials,
        reader: &'a mut ChunkReader,
        observers: &'a mut ObserverChain<'o>,
    ) -> BoxFuture<'a, Result<String, TransportError>>;
}

/// No-op transfer backend for dry runs.
///
/// Reads and "accepts" every chunk without contacting the network. The
/// returned identity is the session's known content hash, or the MD5 of the
/// archive file when none was recorded.
#[derive(Debug, Clone, Default)]
pub struct FakeUploadClient {
    resume_offset: u64,
}

impl FakeUploadClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretends the server already holds the first `offset` bytes.
    pub fn with_resume_offset(mut self, offset: u64) -> Self {
        self.resume_offset = offset;
        self
    }
}

impl ChunkedUploadClient for FakeUploadClient {
    fn fetch_offset<'a>(
        &'a self,
        session: &'a UploadSession,
        _credentials: &'a UserCredentials,
    ) -> BoxFuture<'a, Result<u64, TransportError>> {
        Box::pin(async move { Ok(self.resume_offset.min(session.entity_size())) })
    }

    fn upload<'a, 'o: 'a>(
        &'a self,
        session: &'a UploadSession,
        _credentials: &'a UserCredentials,
        reader: &'a mut ChunkReader,
        observers: &'a mut ObserverChain<'o>,
    ) -> BoxFuture<'a, Result<String, TransportError>> {
        Box::pin(async move {
            let start = reader.offset();
            while let Some(chunk) = reader.next_chunk().await? {
                observers.notify(&AcceptedChunk {
                    offset: chunk.offset,
                    size: chunk.size() as u64,
                });
            }
            debug!(
                session = %session.session_key(),
                from = start,
                to = reader.offset(),
                "dry run: archive accepted"
            );

            match session.content_hash() {
                Some(hash) => Ok(hash.to_string()),
                None => Ok(file_md5(reader.path()).await?),
            }
        })
    }
}

async fn file_md5(path: &Path) -> std::io::Result<String> {
    let mut reader = ChunkReader::open(path, crate::MIN_CHUNK_SIZE).await?;
    let mut hasher = Md5::new();
    while let Some(chunk) = reader.next_chunk().await? {
        hasher.update(&chunk.data);
    }
    Ok(hex::encode(hasher.finalize()))
}
