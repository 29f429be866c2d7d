//! Image descriptor records.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Metadata record for one image, as found in a description file.
///
/// Known keys are typed; everything else (coordinates, camera model,
/// processing flags, ...) is carried through untouched in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageDescriptor {
    /// Directory of the image, relative to the image root.
    pub path: String,
    pub filename: String,
    #[serde(rename = "CaptureTime")]
    pub capture_time: String,
    #[serde(rename = "SequenceUUID", default, skip_serializing_if = "Option::is_none")]
    pub sequence_uuid: Option<String>,
    #[serde(rename = "Heading", default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ImageDescriptor {
    /// Location of the image relative to the image root (`path/filename`).
    pub fn relative_path(&self) -> PathBuf {
        Path::new(&self.path).join(&self.filename)
    }

    /// Drops the filename, returning the map key and the final record.
    pub fn into_final(self) -> (PathBuf, FinalImageDescriptor) {
        let key = self.relative_path();
        let desc = FinalImageDescriptor {
            path: self.path,
            capture_time: self.capture_time,
            sequence_uuid: self.sequence_uuid,
            heading: self.heading,
            extra: self.extra,
        };
        (key, desc)
    }
}

/// An [`ImageDescriptor`] once grouped into a sequence.
///
/// The filename is gone because the sequence map key already encodes the
/// image location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalImageDescriptor {
    pub path: String,
    #[serde(rename = "CaptureTime")]
    pub capture_time: String,
    #[serde(rename = "SequenceUUID", default, skip_serializing_if = "Option::is_none")]
    pub sequence_uuid: Option<String>,
    #[serde(rename = "Heading", default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
