//! Per-job output persistence
//!
//! One PNG per job id under the output directory. Writes go to a temporary
//! sibling first and are renamed into place, so a concurrent download never
//! observes a half-written poster.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::job::JobId;
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct OutputStore {
    dir: PathBuf,
}

impl OutputStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the output directory if it does not exist yet.
    pub fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            Error::StorageError(format!(
                "Failed to create output directory {}: {}",
                self.dir.display(),
                e
            ))
        })
    }

    pub fn path_for(&self, id: &JobId) -> PathBuf {
        self.dir.join(format!("poster-{}.png", id))
    }

    /// File name offered to clients downloading the poster
    pub fn download_name(id: &JobId) -> String {
        format!("map-poster-{}.png", id)
    }

    /// Persist the poster for `id`, returning its final path.
    pub fn persist(&self, id: &JobId, png: &[u8]) -> Result<PathBuf> {
        self.ensure_dir()?;

        let target = self.path_for(id);
        let partial = self.dir.join(format!(".poster-{}.png.partial", id));

        if let Err(e) = fs::write(&partial, png) {
            let _ = fs::remove_file(&partial);
            return Err(Error::StorageError(format!(
                "Failed to write {}: {}",
                partial.display(),
                e
            )));
        }
        fs::rename(&partial, &target).map_err(|e| {
            let _ = fs::remove_file(&partial);
            Error::StorageError(format!("Failed to move poster into place: {}", e))
        })?;

        info!("[{}] Poster saved to {}", id, target.display());
        Ok(target)
    }

    /// Bytes of a persisted poster, `None` when it was never produced.
    pub fn load(&self, id: &JobId) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(id);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("[{}] No poster at {}", id, path.display());
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}
