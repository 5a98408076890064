//! Download artifact lifecycle
//!
//! A download lands at a hidden temporary path beside its destination and
//! only reaches the destination path after it has been probed and found
//! valid. Deleting the temporary file is the only way out of the
//! unvalidated state.

use crate::download::ProbeReport;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Where an artifact is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactState {
    /// Nothing on disk
    Absent,

    /// Bytes landed at the temporary path but have not been validated
    TemporaryUnvalidated,

    /// Probed successfully and renamed to the destination path
    FinalValidated,
}

impl ArtifactState {
    /// Returns true if a file for this artifact exists on disk
    pub fn is_on_disk(&self) -> bool {
        !matches!(self, Self::Absent)
    }

    /// Returns true if the artifact can be committed to a sink
    pub fn is_final(&self) -> bool {
        matches!(self, Self::FinalValidated)
    }

    /// Returns true if moving from `self` to `next` is allowed
    pub fn can_transition_to(&self, next: ArtifactState) -> bool {
        matches!(
            (self, next),
            (Self::Absent, Self::TemporaryUnvalidated)
                | (Self::TemporaryUnvalidated, Self::FinalValidated)
                | (Self::TemporaryUnvalidated, Self::Absent)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::TemporaryUnvalidated => "temporary_unvalidated",
            Self::FinalValidated => "final_validated",
        }
    }
}

impl fmt::Display for ArtifactState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("Invalid artifact transition: {from} -> {to}")]
    InvalidTransition {
        from: ArtifactState,
        to: ArtifactState,
    },

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Returns the hidden temporary path used while downloading to `destination`
///
/// The temporary file keeps the destination's extension so container-aware
/// tools write the right format: `/dir/Title.mp4` becomes `/dir/.Title.mp4`.
pub fn temporary_path(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    destination.with_file_name(format!(".{}", name))
}

/// One artifact moving through its lifecycle
#[derive(Debug)]
pub struct Artifact {
    temp_path: PathBuf,
    final_path: PathBuf,
    state: ArtifactState,
}

impl Artifact {
    pub fn new(final_path: &Path) -> Self {
        Self {
            temp_path: temporary_path(final_path),
            final_path: final_path.to_path_buf(),
            state: ArtifactState::Absent,
        }
    }

    pub fn state(&self) -> ArtifactState {
        self.state
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    fn transition(&mut self, next: ArtifactState) -> Result<(), ArtifactError> {
        if !self.state.can_transition_to(next) {
            return Err(ArtifactError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Marks the temporary file as written by a backend
    pub fn landed(&mut self) -> Result<(), ArtifactError> {
        self.transition(ArtifactState::TemporaryUnvalidated)
    }

    /// Renames the temporary file into place
    ///
    /// The probe report is the proof of validity the transition requires.
    pub async fn promote(&mut self, report: &ProbeReport) -> Result<(), ArtifactError> {
        if !self.state.can_transition_to(ArtifactState::FinalValidated) {
            return Err(ArtifactError::InvalidTransition {
                from: self.state,
                to: ArtifactState::FinalValidated,
            });
        }

        tokio::fs::rename(&self.temp_path, &self.final_path)
            .await
            .map_err(|source| ArtifactError::Io {
                path: self.final_path.clone(),
                source,
            })?;

        tracing::debug!(
            "Promoted {} ({:.0}s, {} bytes)",
            self.final_path.display(),
            report.duration_secs,
            report.size_bytes
        );
        self.transition(ArtifactState::FinalValidated)
    }

    /// Deletes the temporary file, returning the artifact to `Absent`
    ///
    /// Safe to call before anything landed: a missing file is not an error.
    pub async fn discard(&mut self) -> Result<(), ArtifactError> {
        match tokio::fs::remove_file(&self.temp_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(ArtifactError::Io {
                    path: self.temp_path.clone(),
                    source,
                })
            }
        }
        if self.state == ArtifactState::TemporaryUnvalidated {
            self.transition(ArtifactState::Absent)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn report() -> ProbeReport {
        ProbeReport {
            duration_secs: 10.0,
            width: Some(1920),
            height: Some(1080),
            bitrate_kbps: 4000,
            size_bytes: 5_000_000,
        }
    }

    #[test]
    fn test_transitions() {
        use ArtifactState::*;
        assert!(Absent.can_transition_to(TemporaryUnvalidated));
        assert!(TemporaryUnvalidated.can_transition_to(FinalValidated));
        assert!(TemporaryUnvalidated.can_transition_to(Absent));

        assert!(!Absent.can_transition_to(FinalValidated));
        assert!(!FinalValidated.can_transition_to(Absent));
        assert!(!FinalValidated.can_transition_to(TemporaryUnvalidated));
    }

    #[test]
    fn test_predicates_and_display() {
        assert!(!ArtifactState::Absent.is_on_disk());
        assert!(ArtifactState::TemporaryUnvalidated.is_on_disk());
        assert!(ArtifactState::FinalValidated.is_final());
        assert_eq!(
            ArtifactState::TemporaryUnvalidated.to_string(),
            "temporary_unvalidated"
        );
    }

    #[test]
    fn test_temporary_path_is_hidden_sibling() {
        assert_eq!(
            temporary_path(Path::new("/data/My Clip.mp4")),
            PathBuf::from("/data/.My Clip.mp4")
        );
    }

    #[tokio::test]
    async fn test_promote_renames_into_place() {
        let dir = TempDir::new().unwrap();
        let mut artifact = Artifact::new(&dir.path().join("clip.mp4"));
        std::fs::write(artifact.temp_path(), b"data").unwrap();

        artifact.landed().unwrap();
        artifact.promote(&report()).await.unwrap();

        assert_eq!(artifact.state(), ArtifactState::FinalValidated);
        assert!(!artifact.temp_path().exists());
        assert!(artifact.final_path().exists());
    }

    #[tokio::test]
    async fn test_promote_requires_landed_bytes() {
        let dir = TempDir::new().unwrap();
        let mut artifact = Artifact::new(&dir.path().join("clip.mp4"));
        let result = artifact.promote(&report()).await;
        assert!(matches!(
            result,
            Err(ArtifactError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_discard_removes_temp() {
        let dir = TempDir::new().unwrap();
        let mut artifact = Artifact::new(&dir.path().join("clip.mp4"));
        std::fs::write(artifact.temp_path(), b"partial").unwrap();
        artifact.landed().unwrap();

        artifact.discard().await.unwrap();
        assert_eq!(artifact.state(), ArtifactState::Absent);
        assert!(!artifact.temp_path().exists());
        assert!(!artifact.final_path().exists());
    }
}
