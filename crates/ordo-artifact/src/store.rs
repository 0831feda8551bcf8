//! On-disk artifact store
//!
//! Layout under the store directory:
//!
//! - `<Name>.<network>.json`: one artifact per unit and network
//! - `ready`: zero-byte sentinel, written after every artifact of a run
//!
//! Every file is written to a temporary sibling and renamed into place, so
//! a reader never observes a partially written artifact.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::artifact::Artifact;

/// Name of the sentinel file marking a complete export
pub const READY_SENTINEL: &str = "ready";

/// Serialize `value` as pretty JSON and atomically replace `path`
///
/// # Errors
/// Returns error if the parent directory cannot be created, the value
/// cannot be serialized, or the rename fails.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_bytes_atomic(path, &bytes)
}

/// Atomically replace `path` with `bytes`
///
/// # Errors
/// Returns error on any I/O failure
pub fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
        path: dir.clone(),
        source,
    })?;

    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(io_err)?;
    tmp.write_all(bytes).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}

/// Artifact store bound to one network
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
    network: String,
}

impl ArtifactStore {
    /// Create a store rooted at `dir` for `network`
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, network: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            network: network.into(),
        }
    }

    /// Same directory, different network
    #[must_use]
    pub fn for_network(&self, network: impl Into<String>) -> Self {
        Self::new(self.dir.clone(), network)
    }

    #[inline]
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[inline]
    #[must_use]
    pub fn network(&self) -> &str {
        &self.network
    }

    /// Path of the artifact for `name` on this store's network
    #[must_use]
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.{}.json", self.network))
    }

    /// Atomically write an artifact, replacing any previous version
    ///
    /// # Errors
    /// Returns error if serialization or the filesystem write fails
    pub fn write(&self, artifact: &Artifact) -> Result<PathBuf, StoreError> {
        let path = self.path_for(&artifact.name);
        write_json_atomic(&path, artifact)?;
        tracing::debug!("Wrote artifact {}", path.display());
        Ok(path)
    }

    /// Read the artifact for `name`
    ///
    /// A missing file is the normal "not yet deployed" answer. An unreadable
    /// or malformed file is logged and treated the same way.
    #[must_use]
    pub fn read(&self, name: &str) -> Option<Artifact> {
        let path = self.path_for(name);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!("Cannot read artifact {}: {}", path.display(), e);
                return None;
            }
        };
        match serde_json::from_slice(&raw) {
            Ok(artifact) => Some(artifact),
            Err(e) => {
                tracing::warn!("Ignoring malformed artifact {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Remove a stale `ready` sentinel before a new export starts
    ///
    /// # Errors
    /// Returns error if the sentinel exists and cannot be removed
    pub fn begin_export(&self) -> Result<(), StoreError> {
        let path = self.dir.join(READY_SENTINEL);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    /// Write the `ready` sentinel; call only after every artifact is written
    ///
    /// # Errors
    /// Returns error if the sentinel cannot be written
    pub fn finalize(&self) -> Result<(), StoreError> {
        write_bytes_atomic(&self.dir.join(READY_SENTINEL), &[])?;
        tracing::info!("Artifacts ready in {}", self.dir.display());
        Ok(())
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.dir.join(READY_SENTINEL).is_file()
    }

    /// Names of every unit with an artifact on this network, sorted
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let suffix = format!(".{}.json", self.network);
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .filter_map(|e| e.file_name().into_string().ok())
            .filter_map(|f| f.strip_suffix(&suffix).map(str::to_string))
            .collect();
        names.sort();
        names
    }
}

/// Errors that can occur when persisting artifacts
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Filesystem failure
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
