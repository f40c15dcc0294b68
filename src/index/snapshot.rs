//! On-disk index snapshots (`rkyv` archive, read back through a memory map).

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use rkyv::rancor::Error as RkyvError;
use rkyv::{Archive, Deserialize, Serialize};

use super::error::{IndexError, IndexResult};

pub const SNAPSHOT_VERSION: u32 = 1;

const TEMP_SUFFIX: &str = ".tmp";

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(TEMP_SUFFIX);
    PathBuf::from(name)
}

/// Archived form of a [`super::VectorIndex`].
///
/// `ivf_nlist == 0` marks a flat index. Metadata objects are stored as JSON strings.
#[derive(Archive, Deserialize, Serialize, Debug, PartialEq, Clone)]
pub struct IndexSnapshot {
    pub version: u32,
    pub dimension: u32,
    pub ivf_nlist: u32,
    pub ivf_nprobe: u32,
    pub vectors: Vec<f32>,
    pub texts: Vec<String>,
    pub metadata: Vec<String>,
    pub centroids: Vec<f32>,
    pub assignments: Vec<u32>,
}

impl IndexSnapshot {
    pub fn write(&self, path: &Path) -> IndexResult<()> {
        let bytes = rkyv::to_bytes::<RkyvError>(self).map_err(|e| IndexError::Snapshot {
            reason: e.to_string(),
        })?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let temp_path = temp_path(path);
        {
            let mut file = File::create(&temp_path)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&temp_path, path)?;
        Ok(())
    }

    pub fn read(path: &Path) -> IndexResult<Self> {
        if !path.is_file() {
            return Err(IndexError::NotFound {
                path: path.to_path_buf(),
            });
        }

        let file = File::open(path)?;
        if file.metadata()?.len() == 0 {
            return Err(IndexError::EmptySnapshot {
                path: path.to_path_buf(),
            });
        }

        // SAFETY: the map is dropped before returning; `write` renames a finished file into place.
        let mmap = unsafe { Mmap::map(&file)? };

        let archived = rkyv::access::<ArchivedIndexSnapshot, RkyvError>(&mmap[..]).map_err(|e| {
            IndexError::Snapshot {
                reason: e.to_string(),
            }
        })?;
        let snapshot = rkyv::deserialize::<IndexSnapshot, RkyvError>(archived).map_err(|e| {
            IndexError::Snapshot {
                reason: e.to_string(),
            }
        })?;

        if snapshot.version != SNAPSHOT_VERSION {
            return Err(IndexError::Snapshot {
                reason: format!("unsupported snapshot version {}", snapshot.version),
            });
        }
        Ok(snapshot)
    }
}
