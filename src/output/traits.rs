//! Sink and sidecar traits
//!
//! A sink is where finished artifacts end up. The pipeline only ever sees
//! this interface, so a remote store can be plugged in by embedding code.

use crate::extract::FinalRecord;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while committing artifacts or sidecars
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid permission policy: {0}")]
    Permission(String),

    #[error("Remote sink error: {0}")]
    Remote(String),
}

impl SinkError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Result type for sink operations
pub type SinkResult<T> = Result<T, SinkError>;

/// What `put` did with a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Stored,
    /// The target existed and overwrite was off
    SkippedExisting,
}

/// Destination for finished artifacts
#[async_trait]
pub trait Sink: Send + Sync {
    /// True if committing involves a transfer away from this machine
    fn is_remote(&self) -> bool;

    /// Local directory where artifacts are staged before `put`
    fn staging_dir(&self) -> &Path;

    /// True if `name` already exists at the destination
    async fn exists(&self, name: &str) -> SinkResult<bool>;

    /// Stores the local file under `name`
    async fn put(&self, local: &Path, name: &str, overwrite: bool) -> SinkResult<PutOutcome>;
}

/// Writes a metadata description file next to an artifact
pub trait SidecarWriter: Send + Sync {
    /// Path of the sidecar belonging to `artifact`
    fn sidecar_path(&self, artifact: &Path) -> PathBuf;

    /// Writes the sidecar for `artifact`
    ///
    /// Returns `Ok(None)` if a sidecar already exists and `overwrite` is off.
    fn write(&self, record: &FinalRecord, artifact: &Path, overwrite: bool) -> SinkResult<Option<PathBuf>>;
}
