//! Deterministic, content-hashed sequence archives.
//!
//! Images are written in capture-time order, one at a time, into a deflate
//! zip whose entries are named relative to the sequence root. The MD5 of the
//! encoded image bytes, in that order, is the archive's content identity.

use std::fs::File;
use std::io::{BufWriter, Seek, Write};
use std::path::{Path, PathBuf};

use md5::{Digest, Md5};
use seqlift_protocol::FinalImageDescriptor;
use seqlift_transfer::validate_entry_path;
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use crate::error::UploadError;
use crate::grouping::Sequence;
use crate::root::find_root_dir;

/// Produces the bytes stored in the archive for one image.
pub trait ImageTransform: Send + Sync {
    fn encode(
        &self,
        source: &Path,
        descriptor: &FinalImageDescriptor,
    ) -> Result<Vec<u8>, UploadError>;
}

/// Stores images unchanged.
///
/// Descriptor metadata is not embedded into the image bytes, so the content
/// hash of a sequence depends only on its files and their capture order.
#[derive(Debug, Clone, Copy, Default)]
pub struct SourceBytes;

impl ImageTransform for SourceBytes {
    fn encode(
        &self,
        source: &Path,
        _descriptor: &FinalImageDescriptor,
    ) -> Result<Vec<u8>, UploadError> {
        Ok(std::fs::read(source)?)
    }
}

/// Result of packaging one sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagedArchive {
    /// Hex MD5 of the encoded image bytes in capture order.
    pub content_hash: String,
    /// Directory, relative to the image directory, entries are named against.
    pub root_dir: PathBuf,
    pub entry_count: usize,
}

/// Canonical archive file name: `<prefix>_<hash>.zip`.
pub fn archive_file_name(prefix: &str, content_hash: &str) -> String {
    format!("{prefix}_{content_hash}.zip")
}

/// Image keys sorted by capture time, ties broken by key.
pub fn capture_order(sequence: &Sequence) -> Vec<&Path> {
    let mut keys: Vec<(&PathBuf, &FinalImageDescriptor)> = sequence.images.iter().collect();
    keys.sort_by(|(ka, a), (kb, b)| a.capture_time.cmp(&b.capture_time).then_with(|| ka.cmp(kb)));
    keys.into_iter().map(|(k, _)| k.as_path()).collect()
}

/// Archive entry name for `key`: relative to `root`, `/`-separated.
pub fn entry_name(root: &Path, key: &Path) -> Result<String, UploadError> {
    let relative = key
        .strip_prefix(root)
        .map_err(|_| UploadError::InvalidEntry(format!("{} is outside {}", key.display(), root.display())))?;
    let name = relative.to_string_lossy().replace('\\', "/");
    validate_entry_path(&name).map_err(|e| UploadError::InvalidEntry(e.to_string()))?;
    Ok(name)
}

/// Streams `sequence` into a zip written to `writer`.
///
/// Each image is read, encoded, hashed and written before the next one is
/// touched. Entry timestamps are fixed so identical inputs give identical
/// archives.
pub fn write_sequence_archive<W: Write + Seek>(
    image_dir: &Path,
    sequence: &Sequence,
    transform: &dyn ImageTransform,
    writer: W,
) -> Result<PackagedArchive, UploadError> {
    let root_dir = find_root_dir(sequence.images.keys().map(PathBuf::as_path))?;
    let order = capture_order(sequence);

    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default());
    let mut zip = ZipWriter::new(writer);
    let mut hasher = Md5::new();

    for key in &order {
        let name = entry_name(&root_dir, key)?;
        let Some(descriptor) = sequence.images.get(*key) else {
            continue;
        };
        let bytes = transform.encode(&image_dir.join(key), descriptor)?;
        hasher.update(&bytes);
        zip.start_file(name, options)?;
        zip.write_all(&bytes)?;
    }

    let mut writer = zip.finish()?;
    writer.flush()?;

    let content_hash = hex::encode(hasher.finalize());
    debug!(
        sequence = %sequence.uuid,
        root = %root_dir.display(),
        entries = order.len(),
        hash = %content_hash,
        "sequence packaged"
    );
    Ok(PackagedArchive {
        content_hash,
        root_dir,
        entry_count: order.len(),
    })
}

/// Packages `sequence` into `out_dir` under its canonical name.
///
/// The archive is written to `<prefix>_<uuid>.<pid>.wip` first and renamed
/// only once complete, so the canonical name never holds a partial archive.
pub fn package_to_dir(
    image_dir: &Path,
    sequence: &Sequence,
    transform: &dyn ImageTransform,
    out_dir: &Path,
    prefix: &str,
) -> Result<PathBuf, UploadError> {
    std::fs::create_dir_all(out_dir)?;
    let wip = out_dir.join(format!(
        "{prefix}_{}.{}.wip",
        sequence.uuid,
        std::process::id()
    ));

    let written = File::create(&wip)
        .map_err(UploadError::from)
        .and_then(|file| write_sequence_archive(image_dir, sequence, transform, BufWriter::new(file)));
    let archive = match written {
        Ok(archive) => archive,
        Err(e) => {
            let _ = std::fs::remove_file(&wip);
            return Err(e);
        }
    };

    let path = out_dir.join(archive_file_name(prefix, &archive.content_hash));
    std::fs::rename(&wip, &path)?;
    info!(sequence = %sequence.uuid, path = %path.display(), "archive written");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grouping::group_sequences;
    use seqlift_protocol::ImageDescriptor;
    use serde_json::json;
    use std::io::{Cursor, Read};
    use tempfile::TempDir;

    fn descriptor(path: &str, filename: &str, time: &str) -> ImageDescriptor {
        serde_json::from_value(json!({
            "path": path,
            "filename": filename,
            "CaptureTime": time,
            "SequenceUUID": "seq",
            "Heading": 0.0,
        }))
        .unwrap()
    }

    fn write_image(dir: &Path, rel: &str, data: &[u8]) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, data).unwrap();
    }

    fn sequence(descs: Vec<ImageDescriptor>) -> Sequence {
        group_sequences(descs).into_iter().next().unwrap()
    }

    fn package(dir: &Path, seq: &Sequence) -> (PackagedArchive, Vec<u8>) {
        let mut buf = Cursor::new(Vec::new());
        let archive = write_sequence_archive(dir, seq, &SourceBytes, &mut buf).unwrap();
        (archive, buf.into_inner())
    }

    fn entry_names(bytes: Vec<u8>) -> Vec<String> {
        let zip = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        zip.file_names().map(str::to_string).collect()
    }

    fn fixture() -> TempDir {
        let dir = TempDir::new().unwrap();
        write_image(dir.path(), "run/left/a.jpg", b"first");
        write_image(dir.path(), "run/left/b.jpg", b"second");
        write_image(dir.path(), "run/left/c.jpg", b"third");
        dir
    }

    #[test]
    fn hash_follows_capture_order() {
        let dir = fixture();
        let seq = sequence(vec![
            descriptor("run/left", "b.jpg", "2024_01_01_00_00_02"),
            descriptor("run/left", "a.jpg", "2024_01_01_00_00_01"),
            descriptor("run/left", "c.jpg", "2024_01_01_00_00_03"),
        ]);
        let (archive, _) = package(dir.path(), &seq);

        let expected = hex::encode(Md5::digest(b"firstsecondthird"));
        assert_eq!(archive.content_hash, expected);
        assert_eq!(archive.entry_count, 3);
        assert_eq!(archive.root_dir, Path::new("run/left"));
    }

    #[test]
    fn hash_ignores_descriptor_order() {
        let dir = fixture();
        let forward = sequence(vec![
            descriptor("run/left", "a.jpg", "t1"),
            descriptor("run/left", "b.jpg", "t2"),
            descriptor("run/left", "c.jpg", "t3"),
        ]);
        let shuffled = sequence(vec![
            descriptor("run/left", "c.jpg", "t3"),
            descriptor("run/left", "a.jpg", "t1"),
            descriptor("run/left", "b.jpg", "t2"),
        ]);

        let (a, bytes_a) = package(dir.path(), &forward);
        let (b, bytes_b) = package(dir.path(), &shuffled);
        assert_eq!(a.content_hash, b.content_hash);
        assert_eq!(bytes_a, bytes_b);
    }

    #[test]
    fn hash_changes_with_capture_order() {
        let dir = fixture();
        let original = sequence(vec![
            descriptor("run/left", "a.jpg", "t1"),
            descriptor("run/left", "b.jpg", "t2"),
        ]);
        let swapped = sequence(vec![
            descriptor("run/left", "a.jpg", "t2"),
            descriptor("run/left", "b.jpg", "t1"),
        ]);

        let (a, _) = package(dir.path(), &original);
        let (b, _) = package(dir.path(), &swapped);
        assert_ne!(a.content_hash, b.content_hash);
    }

    #[test]
    fn entries_are_relative_to_root() {
        let dir = TempDir::new().unwrap();
        write_image(dir.path(), "run/a/x.jpg", b"x");
        write_image(dir.path(), "run/b/y.jpg", b"y");
        let seq = sequence(vec![
            descriptor("run/a", "x.jpg", "t1"),
            descriptor("run/b", "y.jpg", "t2"),
        ]);

        let (archive, bytes) = package(dir.path(), &seq);
        assert_eq!(archive.root_dir, Path::new("run"));

        let names = entry_names(bytes);
        assert_eq!(names, vec!["a/x.jpg", "b/y.jpg"]);
        for name in &names {
            assert!(Path::new(name).is_relative());
            assert!(validate_entry_path(name).is_ok());
        }
    }

    #[test]
    fn entries_store_encoded_bytes() {
        let dir = fixture();
        let seq = sequence(vec![descriptor("run/left", "a.jpg", "t1")]);
        let (_, bytes) = package(dir.path(), &seq);

        let mut zip = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut entry = zip.by_name("a.jpg").unwrap();
        let mut data = Vec::new();
        entry.read_to_end(&mut data).unwrap();
        assert_eq!(data, b"first");
    }

    #[test]
    fn entry_outside_root_is_rejected() {
        assert!(entry_name(Path::new("run"), Path::new("other/x.jpg")).is_err());
        assert_eq!(
            entry_name(Path::new(""), Path::new("a/b.jpg")).unwrap(),
            "a/b.jpg"
        );
    }

    #[test]
    fn package_to_dir_uses_hash_name() {
        let dir = fixture();
        let out = TempDir::new().unwrap();
        let seq = sequence(vec![
            descriptor("run/left", "a.jpg", "t1"),
            descriptor("run/left", "b.jpg", "t2"),
        ]);

        let path = package_to_dir(dir.path(), &seq, &SourceBytes, out.path(), "seqlift").unwrap();

        let hash = hex::encode(Md5::digest(b"firstsecond"));
        assert_eq!(path, out.path().join(format!("seqlift_{hash}.zip")));
        assert!(path.is_file());
        let leftovers: Vec<_> = std::fs::read_dir(out.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .filter(|n| n.to_string_lossy().ends_with(".wip"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn failed_packaging_leaves_no_wip_file() {
        let dir = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let seq = sequence(vec![descriptor("run", "gone.jpg", "t1")]);

        assert!(package_to_dir(dir.path(), &seq, &SourceBytes, out.path(), "seqlift").is_err());
        assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
    }
}
