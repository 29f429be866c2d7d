//! Common root directory of a sequence.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::error::UploadError;

/// Upper bound on climbing rounds before giving up.
pub const MAX_ROOT_DEPTH: usize = 256;

/// Returns the directory shared by all `paths`.
///
/// The parent directories of the inputs are collected; a single distinct
/// parent is the root. Otherwise the set of parents becomes the new input and
/// every member climbs one level, until one directory remains. The empty path
/// is the top: files directly under the image directory resolve to `""`.
pub fn find_root_dir<'a, I>(paths: I) -> Result<PathBuf, UploadError>
where
    I: IntoIterator<Item = &'a Path>,
{
    let mut dirs: BTreeSet<PathBuf> = paths.into_iter().map(parent_of).collect();
    if dirs.is_empty() {
        return Err(UploadError::EmptySequence);
    }

    for _ in 0..MAX_ROOT_DEPTH {
        if dirs.len() == 1 {
            return Ok(dirs.pop_first().unwrap_or_default());
        }
        dirs = dirs.iter().map(|d| parent_of(d)).collect();
    }
    Err(UploadError::RootTooDeep(MAX_ROOT_DEPTH))
}

fn parent_of(path: &Path) -> PathBuf {
    path.parent().map(Path::to_path_buf).unwrap_or_default()
}
