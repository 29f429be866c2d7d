//! Upload orchestrator.
//!
//! Drives the whole pipeline per sequence: package into a temporary
//! archive, upload it resumably, record the result and submit metadata.
//! Sequences are handled strictly one after another.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use seqlift_protocol::{SequenceInfo, UploadEvent, UserCredentials};
use seqlift_transfer::{
    ChunkedUploadClient, FakeUploadClient, HttpUploadClient, MAX_UPLOAD_SIZE, ProgressNotifier,
    ResumableUploader, SequenceContext, TransferError, UploadSession, adaptive_chunk_size,
};
use serde_json::Value;
use tempfile::NamedTempFile;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::UploaderConfig;
use crate::error::UploadError;
use crate::grouping::{Sequence, collect_sequences};
use crate::metadata::{
    BackupStore, DryRunSubmitter, HttpMetadataSubmitter, MetadataRequest, MetadataSubmitter,
    build_summary,
};
use crate::packager::{
    ImageTransform, PackagedArchive, SourceBytes, archive_file_name, package_to_dir,
    write_sequence_archive,
};

const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

/// Result of one uploaded sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceOutcome {
    pub sequence_uuid: String,
    pub info: SequenceInfo,
}

/// Orchestrates packaging, upload and metadata submission of sequences.
pub struct UploadOrchestrator {
    config: UploaderConfig,
    client: Arc<dyn ChunkedUploadClient>,
    submitter: Arc<dyn MetadataSubmitter>,
    transform: Arc<dyn ImageTransform>,
    backups: BackupStore,
    events_tx: mpsc::Sender<UploadEvent>,
    events_rx: Option<mpsc::Receiver<UploadEvent>>,
    cancel: CancellationToken,
}

impl UploadOrchestrator {
    /// Creates an orchestrator talking to the configured HTTP endpoints.
    pub fn new(config: UploaderConfig) -> Result<Self, UploadError> {
        config.validate()?;
        let http_client = reqwest::Client::builder()
            .build()
            .map_err(|e| UploadError::Config(format!("failed to build HTTP client: {e}")))?;
        let client = HttpUploadClient::new(
            http_client.clone(),
            config.upload_endpoint.clone(),
            config.request_timeout(),
        );
        let submitter = HttpMetadataSubmitter::new(
            http_client,
            config.metadata_endpoint.clone(),
            config.request_timeout(),
        );
        Ok(Self::with_clients(
            config,
            Arc::new(client),
            Arc::new(submitter),
        ))
    }

    /// Creates an orchestrator that runs the full flow without network access.
    pub fn dry_run(config: UploaderConfig) -> Self {
        Self::with_clients(
            config,
            Arc::new(FakeUploadClient::new()),
            Arc::new(DryRunSubmitter),
        )
    }

    pub fn with_clients(
        config: UploaderConfig,
        client: Arc<dyn ChunkedUploadClient>,
        submitter: Arc<dyn MetadataSubmitter>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(256);
        let backups = BackupStore::new(config.backup_dir.clone());
        Self {
            config,
            client,
            submitter,
            transform: Arc::new(SourceBytes),
            backups,
            events_tx,
            events_rx: Some(events_rx),
            cancel: CancellationToken::new(),
        }
    }

    /// Replaces the image encoding applied before hashing and archiving.
    pub fn with_transform(mut self, transform: Arc<dyn ImageTransform>) -> Self {
        self.transform = transform;
        self
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<UploadEvent>> {
        self.events_rx.take()
    }

    /// Returns a cancellation token for this orchestrator.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &UploaderConfig {
        &self.config
    }

    /// Uploads every sequence described by `descs` from `image_dir`.
    ///
    /// All descriptors are validated before anything is packaged. The first
    /// failing sequence aborts the run; results of the sequences completed
    /// before it are reported through the events channel.
    pub async fn upload_image_dir_and_description(
        &self,
        image_dir: &Path,
        descs: &[Value],
        credentials: &UserCredentials,
        organization_key: Option<&str>,
        project_key: Option<&str>,
    ) -> Result<Vec<SequenceOutcome>, UploadError> {
        let sequences = collect_sequences(image_dir, descs)?;
        let total = sequences.len();
        info!(sequences = total, dir = %image_dir.display(), "starting upload");

        let mut outcomes = Vec::with_capacity(total);
        for (idx, sequence) in sequences.into_iter().enumerate() {
            let uuid = sequence.uuid.clone();
            let outcome = self
                .upload_sequence(
                    image_dir,
                    sequence,
                    idx,
                    total,
                    descs,
                    credentials,
                    organization_key,
                    project_key,
                )
                .await
                .inspect_err(|e| error!(sequence = %uuid, error = %e, "sequence upload failed"))?;
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Uploads an existing archive, keyed by its file name.
    ///
    /// Returns the confirmed content identity.
    pub async fn upload_zipfile(
        &self,
        zip_path: &Path,
        credentials: &UserCredentials,
    ) -> Result<String, UploadError> {
        self.check_cancelled()?;

        let path = zip_path.to_path_buf();
        let entries = tokio::task::spawn_blocking(move || -> Result<usize, UploadError> {
            let archive = zip::ZipArchive::new(std::fs::File::open(&path)?)?;
            Ok(archive.len())
        })
        .await??;
        if entries == 0 {
            return Err(UploadError::EmptyArchive(zip_path.to_path_buf()));
        }

        let entity_size = tokio::fs::metadata(zip_path).await?.len();
        let session_key = zip_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| UploadError::InvalidEntry(format!("{} has no file name", zip_path.display())))?;
        let session = UploadSession::new(session_key, entity_size, self.chunk_size(entity_size, entries));

        let mut notifier = ProgressNotifier::new(
            SequenceContext {
                sequence_path: zip_path.display().to_string(),
                sequence_uuid: String::new(),
                total_bytes: entity_size,
                sequence_idx: 0,
                total_sequences: 1,
            },
            Some(self.events_tx.clone()),
        );
        self.transfer(zip_path, &session, credentials, &mut notifier)
            .await
    }

    /// Packages every sequence into `out_dir` without uploading.
    ///
    /// Returns the written archive paths in sequence order.
    pub async fn zip_image_dir(
        &self,
        image_dir: &Path,
        descs: &[Value],
        out_dir: &Path,
    ) -> Result<Vec<PathBuf>, UploadError> {
        let sequences = collect_sequences(image_dir, descs)?;
        let mut written = Vec::with_capacity(sequences.len());
        for sequence in sequences {
            self.check_cancelled()?;
            let image_dir = image_dir.to_path_buf();
            let out_dir = out_dir.to_path_buf();
            let prefix = self.config.archive_prefix.clone();
            let transform = Arc::clone(&self.transform);
            let path = tokio::task::spawn_blocking(move || {
                package_to_dir(&image_dir, &sequence, transform.as_ref(), &out_dir, &prefix)
            })
            .await??;
            written.push(path);
        }
        Ok(written)
    }

    #[allow(clippy::too_many_arguments)]
    async fn upload_sequence(
        &self,
        image_dir: &Path,
        sequence: Sequence,
        idx: usize,
        total: usize,
        descs: &[Value],
        credentials: &UserCredentials,
        organization_key: Option<&str>,
        project_key: Option<&str>,
    ) -> Result<SequenceOutcome, UploadError> {
        self.check_cancelled()?;
        info!(
            sequence = %sequence.uuid,
            progress = format_args!("{}/{}", idx + 1, total),
            images = sequence.len(),
            "packaging sequence"
        );

        let (temp, archive, sequence) = self.package_temp(image_dir, sequence).await?;
        let entity_size = temp.as_file().metadata()?.len();
        if entity_size > MAX_UPLOAD_SIZE {
            warn!(
                sequence = %sequence.uuid,
                size = entity_size,
                limit = MAX_UPLOAD_SIZE,
                "archive exceeds the recommended upload size"
            );
        }

        let session = UploadSession::new(
            archive_file_name(&self.config.archive_prefix, &archive.content_hash),
            entity_size,
            self.chunk_size(entity_size, sequence.len()),
        )
        .with_content_hash(archive.content_hash.clone())
        .with_destination(
            organization_key.map(str::to_string),
            project_key.map(str::to_string),
        );

        self.emit(UploadEvent::SequenceStarted {
            sequence_uuid: sequence.uuid.clone(),
            sequence_idx: idx,
            total_sequences: total,
            total_bytes: entity_size,
        });
        let mut notifier = ProgressNotifier::new(
            SequenceContext {
                sequence_path: archive.root_dir.display().to_string(),
                sequence_uuid: sequence.uuid.clone(),
                total_bytes: entity_size,
                sequence_idx: idx,
                total_sequences: total,
            },
            Some(self.events_tx.clone()),
        );
        let hash = self
            .transfer(temp.path(), &session, credentials, &mut notifier)
            .await?;
        drop(temp);

        let info = SequenceInfo {
            count: sequence.len(),
            size: entity_size as f64 / BYTES_PER_MIB,
            hash,
        };
        info!(sequence = %sequence.uuid, hash = %info.hash, "sequence uploaded");

        let summary = build_summary(descs, &sequence.uuid, &info)?;
        let request = MetadataRequest::new(
            organization_key,
            project_key,
            sequence.descriptors,
            summary,
        );
        self.backups.write(&credentials.username, &request)?;
        self.submitter.submit(&request, credentials).await?;

        self.emit(UploadEvent::SequenceCompleted {
            sequence_uuid: sequence.uuid.clone(),
            info: info.clone(),
        });
        Ok(SequenceOutcome {
            sequence_uuid: sequence.uuid,
            info,
        })
    }

    /// Writes the archive into a temporary file on a blocking thread.
    ///
    /// The file is deleted when the returned handle is dropped.
    async fn package_temp(
        &self,
        image_dir: &Path,
        sequence: Sequence,
    ) -> Result<(NamedTempFile, PackagedArchive, Sequence), UploadError> {
        let image_dir = image_dir.to_path_buf();
        let transform = Arc::clone(&self.transform);
        tokio::task::spawn_blocking(move || -> Result<_, UploadError> {
            let mut temp = NamedTempFile::new()?;
            let archive =
                write_sequence_archive(&image_dir, &sequence, transform.as_ref(), temp.as_file_mut())?;
            Ok((temp, archive, sequence))
        })
        .await?
    }

    async fn transfer(
        &self,
        archive: &Path,
        session: &UploadSession,
        credentials: &UserCredentials,
        notifier: &mut ProgressNotifier,
    ) -> Result<String, UploadError> {
        let uploader = ResumableUploader::new(Arc::clone(&self.client))
            .with_policy(self.config.retry_policy())
            .with_cancel(self.cancel.clone())
            .with_events(self.events_tx.clone());

        uploader
            .upload(archive, session, credentials, Some(notifier))
            .await
            .map_err(|e| match e {
                TransferError::Cancelled => UploadError::Cancelled,
                other => UploadError::Transfer(other),
            })
    }

    fn chunk_size(&self, entity_size: u64, image_count: usize) -> usize {
        adaptive_chunk_size(
            entity_size,
            image_count,
            self.config.min_chunk_size,
            self.config.max_chunk_size,
        )
    }

    fn check_cancelled(&self) -> Result<(), UploadError> {
        if self.cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }
        Ok(())
    }

    fn emit(&self, event: UploadEvent) {
        if let Err(e) = self.events_tx.try_send(event) {
            tracing::trace!("dropped upload event: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use md5::{Digest, Md5};
    use seqlift_transfer::{BoxFuture, ChunkReader, ObserverChain, TransportError};
    use serde_json::json;
    use tempfile::TempDir;

    fn creds() -> UserCredentials {
        UserCredentials {
            username: "surveyor".into(),
            upload_token: "token".into(),
        }
    }

    fn config(dir: &Path) -> UploaderConfig {
        UploaderConfig {
            backup_dir: dir.join("backups"),
            ..Default::default()
        }
    }

    fn record(path: &str, filename: &str, time: &str, seq: &str) -> Value {
        json!({
            "path": path,
            "filename": filename,
            "CaptureTime": time,
            "SequenceUUID": seq,
            "Heading": 180.0,
        })
    }

    fn write_image(dir: &Path, rel: &str, data: &[u8]) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, data).unwrap();
    }

    /// Records what the orchestrator submits.
    #[derive(Default)]
    struct RecordingSubmitter {
        requests: Mutex<Vec<MetadataRequest>>,
    }

    impl MetadataSubmitter for RecordingSubmitter {
        fn submit<'a>(
            &'a self,
            request: &'a MetadataRequest,
            _credentials: &'a UserCredentials,
        ) -> BoxFuture<'a, Result<(), UploadError>> {
            Box::pin(async move {
                self.requests.lock().unwrap().push(request.clone());
                Ok(())
            })
        }
    }

    /// Rejects every upload, remembering which archive it was given.
    #[derive(Default)]
    struct RejectingClient {
        archives: Mutex<Vec<PathBuf>>,
    }

    impl ChunkedUploadClient for RejectingClient {
        fn fetch_offset<'a>(
            &'a self,
            _session: &'a UploadSession,
            _credentials: &'a UserCredentials,
        ) -> BoxFuture<'a, Result<u64, TransportError>> {
            Box::pin(async move { Ok(0) })
        }

        fn upload<'a, 'o: 'a>(
            &'a self,
            session: &'a UploadSession,
            _credentials: &'a UserCredentials,
            reader: &'a mut ChunkReader,
            _observers: &'a mut ObserverChain<'o>,
        ) -> BoxFuture<'a, Result<String, TransportError>> {
            Box::pin(async move {
                assert!(reader.path().is_file());
                self.archives.lock().unwrap().push(reader.path().to_path_buf());
                Err(TransportError::Status {
                    method: "POST".into(),
                    url: format!("https://upload.example/{}", session.session_key()),
                    status: 403,
                    body: r#"{"message":"forbidden"}"#.into(),
                })
            })
        }
    }

    fn two_sequences(dir: &Path) -> Vec<Value> {
        write_image(dir, "run/a/1.jpg", b"a1");
        write_image(dir, "run/a/2.jpg", b"a2");
        write_image(dir, "run/b/1.jpg", b"b1");
        vec![
            record("run/a", "2.jpg", "t2", "seq-a"),
            record("run/b", "1.jpg", "t1", "seq-b"),
            record("run/a", "1.jpg", "t1", "seq-a"),
            json!({ "Information": { "total_images": 3 } }),
        ]
    }

    #[tokio::test]
    async fn uploads_sequences_in_order_and_submits_metadata() {
        let dir = TempDir::new().unwrap();
        let descs = two_sequences(dir.path());
        let submitter = Arc::new(RecordingSubmitter::default());
        let orch = UploadOrchestrator::with_clients(
            config(dir.path()),
            Arc::new(FakeUploadClient::new()),
            submitter.clone(),
        );

        let outcomes = orch
            .upload_image_dir_and_description(dir.path(), &descs, &creds(), Some("org"), None)
            .await
            .unwrap();

        let uuids: Vec<&str> = outcomes.iter().map(|o| o.sequence_uuid.as_str()).collect();
        assert_eq!(uuids, vec!["seq-a", "seq-b"]);
        assert_eq!(outcomes[0].info.count, 2);
        assert_eq!(outcomes[0].info.hash, hex::encode(Md5::digest(b"a1a2")));
        assert_eq!(outcomes[1].info.hash, hex::encode(Md5::digest(b"b1")));

        let requests = submitter.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].organization_key, "org");
        assert_eq!(requests[0].project_key, "");
        assert_eq!(requests[0].json_data.len(), 2);
        assert_eq!(
            requests[0].summary["Information"]["Sequence"]["seq-a"]["hash"],
            json!(outcomes[0].info.hash)
        );
        assert_eq!(requests[0].summary["Information"]["total_images"], 3);

        let backups = std::fs::read_dir(dir.path().join("backups").join("surveyor"))
            .unwrap()
            .count();
        assert!(backups >= 1);
    }

    #[tokio::test]
    async fn events_follow_sequence_lifecycle() {
        let dir = TempDir::new().unwrap();
        let descs = two_sequences(dir.path());
        let mut orch = UploadOrchestrator::dry_run(config(dir.path()));
        let mut events_rx = orch.take_events().unwrap();

        orch.upload_image_dir_and_description(dir.path(), &descs, &creds(), None, None)
            .await
            .unwrap();
        drop(orch);

        let mut kinds = Vec::new();
        let mut last_uploaded = 0;
        while let Some(event) = events_rx.recv().await {
            match event {
                UploadEvent::SequenceStarted { sequence_idx, total_sequences, .. } => {
                    assert_eq!(total_sequences, 2);
                    kinds.push(format!("start{sequence_idx}"));
                    last_uploaded = 0;
                }
                UploadEvent::Progress(p) => {
                    assert!(p.uploaded_bytes >= last_uploaded);
                    assert!(p.uploaded_bytes <= p.total_bytes);
                    last_uploaded = p.uploaded_bytes;
                }
                UploadEvent::SequenceCompleted { sequence_uuid, .. } => {
                    kinds.push(format!("done:{sequence_uuid}"));
                }
                UploadEvent::Retrying { .. } => panic!("dry run should not retry"),
            }
        }
        assert_eq!(kinds, vec!["start0", "done:seq-a", "start1", "done:seq-b"]);
    }

    #[tokio::test]
    async fn fatal_upload_releases_archive_and_skips_metadata() {
        let dir = TempDir::new().unwrap();
        let descs = two_sequences(dir.path());
        let client = Arc::new(RejectingClient::default());
        let submitter = Arc::new(RecordingSubmitter::default());
        let orch =
            UploadOrchestrator::with_clients(config(dir.path()), client.clone(), submitter.clone());

        let err = orch
            .upload_image_dir_and_description(dir.path(), &descs, &creds(), None, None)
            .await
            .unwrap_err();

        match err {
            UploadError::Transfer(TransferError::Fatal { source, .. }) => {
                assert_eq!(source.status(), Some(403));
            }
            other => panic!("expected fatal transfer error, got {other:?}"),
        }
        let archives = client.archives.lock().unwrap();
        assert_eq!(archives.len(), 1);
        assert!(!archives[0].exists());
        assert!(submitter.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let dir = TempDir::new().unwrap();
        let descs = two_sequences(dir.path());
        let orch = UploadOrchestrator::dry_run(config(dir.path()));
        orch.cancel_token().cancel();

        let err = orch
            .upload_image_dir_and_description(dir.path(), &descs, &creds(), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Cancelled));
    }

    #[tokio::test]
    async fn zip_image_dir_writes_hash_named_archives() {
        let dir = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let descs = two_sequences(dir.path());
        let orch = UploadOrchestrator::dry_run(config(dir.path()));

        let paths = orch
            .zip_image_dir(dir.path(), &descs, out.path())
            .await
            .unwrap();

        let hash = hex::encode(Md5::digest(b"a1a2"));
        assert_eq!(paths.len(), 2);
        assert_eq!(paths[0], out.path().join(format!("seqlift_{hash}.zip")));
        assert!(paths.iter().all(|p| p.is_file()));
    }

    #[tokio::test]
    async fn upload_zipfile_uses_archive_identity() {
        let dir = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let descs = two_sequences(dir.path());
        let orch = UploadOrchestrator::dry_run(config(dir.path()));
        let paths = orch
            .zip_image_dir(dir.path(), &descs, out.path())
            .await
            .unwrap();

        let hash = orch.upload_zipfile(&paths[0], &creds()).await.unwrap();

        let bytes = std::fs::read(&paths[0]).unwrap();
        assert_eq!(hash, hex::encode(Md5::digest(&bytes)));
    }

    #[tokio::test]
    async fn upload_zipfile_rejects_empty_archive() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.zip");
        zip::ZipWriter::new(std::fs::File::create(&path).unwrap())
            .finish()
            .unwrap();
        let orch = UploadOrchestrator::dry_run(config(dir.path()));

        let err = orch.upload_zipfile(&path, &creds()).await.unwrap_err();
        assert!(matches!(err, UploadError::EmptyArchive(p) if p == path));
    }

    #[tokio::test]
    async fn take_events_once() {
        let dir = TempDir::new().unwrap();
        let mut orch = UploadOrchestrator::dry_run(config(dir.path()));
        assert!(orch.take_events().is_some());
        assert!(orch.take_events().is_none());
    }
}
