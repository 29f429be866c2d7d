//! Sequence upload flow: validate, group, package, upload, submit metadata.
//!
//! This crate implements the **business logic** of uploading geotagged
//! image sequences. Transfer mechanics live in `seqlift-transfer`; this crate
//! decides what is uploaded, under which identity, and what is reported
//! afterwards.
//!
//! # Pipeline
//!
//! 1. **Validate**: schema-check every image descriptor, check every file exists
//! 2. **Group**: partition images by sequence identifier
//! 3. **Package**: stream each sequence into a content-hashed zip
//! 4. **Upload**: resumable chunked transfer with retry and backoff
//! 5. **Submit**: post the per-sequence metadata and keep a backup copy

pub mod config;
pub mod error;
pub mod grouping;
pub mod metadata;
pub mod orchestrator;
pub mod packager;
pub mod root;

pub use config::UploaderConfig;
pub use error::UploadError;
pub use grouping::{GroupedSequences, Sequence, collect_sequences, group_sequences};
pub use metadata::{
    BackupStore, DryRunSubmitter, HttpMetadataSubmitter, MetadataRequest, MetadataSubmitter,
};
pub use orchestrator::{SequenceOutcome, UploadOrchestrator};
pub use packager::{ImageTransform, PackagedArchive, SourceBytes, write_sequence_archive};
pub use root::find_root_dir;
