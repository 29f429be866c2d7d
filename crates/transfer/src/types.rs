/// A slice of archive data read for transfer.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Byte offset within the archive.
    pub offset: u64,
    /// Raw chunk data.
    pub data: Vec<u8>,
    /// SHA-256 hex checksum of `data`.
    pub checksum: String,
}

impl Chunk {
    /// Size of this chunk in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Offset of the first byte after this chunk.
    pub fn end(&self) -> u64 {
        self.offset + self.data.len() as u64
    }
}

/// A byte range the server confirmed as durably received.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcceptedChunk {
    pub offset: u64,
    pub size: u64,
}

/// Transient state for one archive transfer.
///
/// The session key binds local attempts to the resumable state kept by the
/// upload service; nothing here is persisted locally.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadSession {
    session_key: String,
    entity_size: u64,
    chunk_size: usize,
    content_hash: Option<String>,
    organization_key: Option<String>,
    project_key: Option<String>,
}

impl UploadSession {
    /// Creates a session for an archive of `entity_size` bytes.
    ///
    /// If `chunk_size` is 0, [`MIN_CHUNK_SIZE`](crate::MIN_CHUNK_SIZE) is used.
    pub fn new(session_key: impl Into<String>, entity_size: u64, chunk_size: usize) -> Self {
        let chunk_size = if chunk_size == 0 {
            crate::MIN_CHUNK_SIZE
        } else {
            chunk_size
        };
        Self {
            session_key: session_key.into(),
            entity_size,
            chunk_size,
            content_hash: None,
            organization_key: None,
            project_key: None,
        }
    }

    /// Records the locally computed content hash of the archive.
    pub fn with_content_hash(mut self, hash: impl Into<String>) -> Self {
        self.content_hash = Some(hash.into());
        self
    }

    /// Attaches the organization/project the upload is filed under.
    pub fn with_destination(
        mut self,
        organization_key: Option<String>,
        project_key: Option<String>,
    ) -> Self {
        self.organization_key = organization_key.filter(|k| !k.is_empty());
        self.project_key = project_key.filter(|k| !k.is_empty());
        self
    }

    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    pub fn entity_size(&self) -> u64 {
        self.entity_size
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn content_hash(&self) -> Option<&str> {
        self.content_hash.as_deref()
    }

    pub fn organization_key(&self) -> Option<&str> {
        self.organization_key.as_deref()
    }

    pub fn project_key(&self) -> Option<&str> {
        self.project_key.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_chunk_size_falls_back_to_min() {
        let session = UploadSession::new("k", 10, 0);
        assert_eq!(session.chunk_size(), crate::MIN_CHUNK_SIZE);
    }

    #[test]
    fn empty_destination_keys_are_dropped() {
        let session = UploadSession::new("k", 10, 4)
            .with_destination(Some(String::new()), Some("proj".into()));
        assert_eq!(session.organization_key(), None);
        assert_eq!(session.project_key(), Some("proj"));
    }

    #[test]
    fn chunk_end_offset() {
        let chunk = Chunk {
            offset: 6,
            data: b"6789".to_vec(),
            checksum: String::new(),
        };
        assert_eq!(chunk.size(), 4);
        assert_eq!(chunk.end(), 10);
    }
}
