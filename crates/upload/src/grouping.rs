//! Descriptor validation and grouping into sequences.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use seqlift_protocol::schema::validate_descriptor;
use seqlift_protocol::{FinalImageDescriptor, ImageDescriptor};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::error::UploadError;

/// Images sharing one sequence identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct Sequence {
    pub uuid: String,
    /// Final descriptors keyed by location relative to the image directory.
    pub images: BTreeMap<PathBuf, FinalImageDescriptor>,
    /// The grouped descriptor records, as submitted with the metadata.
    pub descriptors: Vec<ImageDescriptor>,
}

impl Sequence {
    fn new(uuid: String) -> Self {
        Self {
            uuid,
            images: BTreeMap::new(),
            descriptors: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

/// Sequences in the order their first image appeared in the input.
#[derive(Debug, Clone, Default)]
pub struct GroupedSequences {
    sequences: Vec<Sequence>,
    index: HashMap<String, usize>,
}

impl GroupedSequences {
    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    pub fn get(&self, uuid: &str) -> Option<&Sequence> {
        self.index.get(uuid).map(|&i| &self.sequences[i])
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Sequence> {
        self.sequences.iter()
    }

    fn entry(&mut self, uuid: &str) -> &mut Sequence {
        let next = self.sequences.len();
        let i = *self.index.entry(uuid.to_string()).or_insert(next);
        if i == next {
            self.sequences.push(Sequence::new(uuid.to_string()));
        }
        &mut self.sequences[i]
    }
}

impl IntoIterator for GroupedSequences {
    type Item = Sequence;
    type IntoIter = std::vec::IntoIter<Sequence>;

    fn into_iter(self) -> Self::IntoIter {
        self.sequences.into_iter()
    }
}

impl<'a> IntoIterator for &'a GroupedSequences {
    type Item = &'a Sequence;
    type IntoIter = std::slice::Iter<'a, Sequence>;

    fn into_iter(self) -> Self::IntoIter {
        self.sequences.iter()
    }
}

/// Records eligible for packaging: those carrying a `Heading`.
///
/// Anything else in a description file (the trailing summary record, for
/// instance) is not an image of a sequence.
pub fn image_records(descs: &[Value]) -> Vec<&Value> {
    descs.iter().filter(|d| d.get("Heading").is_some()).collect()
}

/// Checks every record against the descriptor schema, then checks that every
/// referenced image exists under `image_dir`.
///
/// Fails on the first violation; nothing is returned partially.
pub fn validate_descriptors(
    image_dir: &Path,
    records: &[&Value],
) -> Result<Vec<ImageDescriptor>, UploadError> {
    for record in records {
        validate_descriptor(record)?;
    }

    let descs = records
        .iter()
        .map(|record| ImageDescriptor::deserialize(*record))
        .collect::<Result<Vec<_>, _>>()?;

    for desc in &descs {
        let abspath = image_dir.join(desc.relative_path());
        if !abspath.is_file() {
            return Err(UploadError::MissingImage(abspath));
        }
    }
    Ok(descs)
}

/// Partitions descriptors by `SequenceUUID`.
///
/// Records without one all land in a single sequence whose identifier is
/// generated for this run and written back into those records.
pub fn group_sequences(descs: Vec<ImageDescriptor>) -> GroupedSequences {
    let missing_uuid = Uuid::new_v4().to_string();
    let mut grouped = GroupedSequences::default();

    for mut desc in descs {
        let uuid = desc
            .sequence_uuid
            .get_or_insert_with(|| missing_uuid.clone())
            .clone();
        let (key, image) = desc.clone().into_final();
        let sequence = grouped.entry(&uuid);
        sequence.images.insert(key, image);
        sequence.descriptors.push(desc);
    }

    debug!(sequences = grouped.len(), "grouped descriptors");
    grouped
}

/// Validates and groups the image records of a description file.
pub fn collect_sequences(
    image_dir: &Path,
    descs: &[Value],
) -> Result<GroupedSequences, UploadError> {
    let records = image_records(descs);
    let images = validate_descriptors(image_dir, &records)?;
    Ok(group_sequences(images))
}
