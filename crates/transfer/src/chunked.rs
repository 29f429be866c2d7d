use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};

use crate::types::Chunk;

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Reads an archive in fixed-size chunks with SHA-256 checksums.
pub struct ChunkReader {
    file: File,
    chunk_size: usize,
    offset: u64,
    path: PathBuf,
    file_size: u64,
}

impl ChunkReader {
    /// Opens `path` for chunked reading.
    ///
    /// If `chunk_size` is 0, [`MIN_CHUNK_SIZE`](crate::MIN_CHUNK_SIZE) is used.
    pub async fn open(path: &Path, chunk_size: usize) -> std::io::Result<Self> {
        let file = File::open(path).await?;
        let file_size = file.metadata().await?.len();
        let chunk_size = if chunk_size == 0 {
            crate::MIN_CHUNK_SIZE
        } else {
            chunk_size
        };
        Ok(Self {
            file,
            chunk_size,
            offset: 0,
            path: path.to_path_buf(),
            file_size,
        })
    }

    /// Seeks to the given byte offset (for resume).
    ///
    /// Offsets past the end are clamped to the file size.
    pub async fn seek_to(&mut self, offset: u64) -> std::io::Result<()> {
        let offset = offset.min(self.file_size);
        self.file.seek(SeekFrom::Start(offset)).await?;
        self.offset = offset;
        Ok(())
    }

    /// Reads the next chunk. Returns `None` at EOF.
    pub async fn next_chunk(&mut self) -> std::io::Result<Option<Chunk>> {
        let remaining = self.remaining();
        if remaining == 0 {
            return Ok(None);
        }

        let read_size = usize::try_from(remaining)
            .unwrap_or(usize::MAX)
            .min(self.chunk_size);
        let mut buf = vec![0u8; read_size];
        self.file.read_exact(&mut buf).await?;

        let checksum = checksum_bytes(&buf);
        let chunk = Chunk {
            offset: self.offset,
            data: buf,
            checksum,
        };
        self.offset += read_size as u64;
        Ok(Some(chunk))
    }

    /// Current byte offset.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Total file size in bytes.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Bytes remaining to read.
    pub fn remaining(&self) -> u64 {
        self.file_size.saturating_sub(self.offset)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
