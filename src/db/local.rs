//! Local snapshot file, used in single-instance mode and as the fallback
//! when a shared store write fails.

use std::path::{Path, PathBuf};
use thiserror::Error;

use super::models::StatusSnapshot;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize snapshot: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Writes the status snapshot to a well-known file.
#[derive(Debug, Clone)]
pub struct LocalSnapshot {
    path: PathBuf,
}

impl LocalSnapshot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Overwrite the snapshot file.
    ///
    /// The document goes to a sibling temp file first and is then renamed
    /// into place, so readers see either the old or the new snapshot.
    pub fn write(&self, snapshot: &StatusSnapshot) -> Result<(), SnapshotError> {
        let body = serde_json::to_string_pretty(snapshot)?;
        let io_err = |source| SnapshotError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        std::fs::write(&tmp, body).map_err(io_err)?;
        if let Err(e) = std::fs::rename(&tmp, &self.path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(io_err(e));
        }
        Ok(())
    }

    pub fn read(&self) -> Option<StatusSnapshot> {
        let raw = std::fs::read_to_string(&self.path).ok()?;
        serde_json::from_str(&raw).ok()
    }
}
