use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::container_specs::Manifest;
use crate::errors::{ReplicationError, Result};

/// The fetched manifest, serialized into a private temporary directory for
/// the duration of one migration. Registration reads the document back from
/// here; the directory is removed by `close`, or on drop if `close` is never
/// reached.
pub struct StagedManifest {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl StagedManifest {
    pub fn stage(manifest: &Manifest, parent: Option<&Path>) -> Result<StagedManifest> {
        let dir = match parent {
            Some(parent) => {
                std::fs::create_dir_all(parent).map_err(|e| {
                    ReplicationError::io(format!("Failed to create staging dir {:?}", parent), e)
                })?;
                tempfile::Builder::new()
                    .prefix("manifest-")
                    .tempdir_in(parent)
            }
            None => tempfile::Builder::new().prefix("manifest-").tempdir(),
        }
        .map_err(|e| ReplicationError::io("Failed to create manifest staging dir", e))?;

        let path = dir.path().join("manifest.json");
        manifest.write_file(&path)?;
        tracing::debug!("Staged manifest at {:?}", path);
        Ok(StagedManifest {
            dir: Some(dir),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read_bytes(&self) -> Result<Vec<u8>> {
        std::fs::read(&self.path).map_err(|e| {
            ReplicationError::io(format!("Failed to read staged manifest {:?}", self.path), e)
        })
    }

    /// Removes the staged document. Failures are logged, never raised: the
    /// migration outcome is already decided by the time we clean up.
    pub fn close(mut self) {
        if let Some(dir) = self.dir.take() {
            let dir_path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                tracing::warn!("Failed to clean up staged manifest {:?}: {}", dir_path, e);
            }
        }
    }
}
