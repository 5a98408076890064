use crate::config::{parse_mode, DestinationConfig, PermissionPolicy};
use crate::output::traits::{PutOutcome, Sink, SinkError, SinkResult};
use async_trait::async_trait;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Sink backed by a local directory
#[derive(Debug, Clone)]
pub struct LocalSink {
    root: PathBuf,
    staging: PathBuf,
    permissions: Option<PermissionPolicy>,
}

impl LocalSink {
    pub fn new(root: PathBuf, staging: Option<PathBuf>, permissions: Option<PermissionPolicy>) -> Self {
        let staging = staging.unwrap_or_else(|| root.clone());
        Self {
            root,
            staging,
            permissions,
        }
    }

    pub fn from_config(config: &DestinationConfig) -> Self {
        Self::new(
            config.path.clone(),
            config.staging.clone(),
            config.permissions.clone(),
        )
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Applies the ownership and mode policy to a committed file
    pub fn apply_permissions(&self, path: &Path) -> SinkResult<()> {
        let Some(policy) = &self.permissions else {
            return Ok(());
        };

        if policy.uid.is_some() || policy.gid.is_some() {
            std::os::unix::fs::chown(path, policy.uid, policy.gid)
                .map_err(|e| SinkError::io(path, e))?;
        }

        if let Some(mode) = &policy.mode {
            let mode = parse_mode(mode).map_err(|e| SinkError::Permission(e.to_string()))?;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
                .map_err(|e| SinkError::io(path, e))?;
        }

        debug!("Applied permissions to {}", path.display());
        Ok(())
    }
}

/// Moves a file, copying across filesystems when a rename is refused
async fn move_file(from: &Path, to: &Path) -> SinkResult<()> {
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(from, to)
        .await
        .map_err(|e| SinkError::io(to, e))?;
    tokio::fs::remove_file(from)
        .await
        .map_err(|e| SinkError::io(from, e))
}

#[async_trait]
impl Sink for LocalSink {
    fn is_remote(&self) -> bool {
        false
    }

    fn staging_dir(&self) -> &Path {
        &self.staging
    }

    async fn exists(&self, name: &str) -> SinkResult<bool> {
        Ok(tokio::fs::try_exists(self.root.join(name)).await.unwrap_or(false))
    }

    async fn put(&self, local: &Path, name: &str, overwrite: bool) -> SinkResult<PutOutcome> {
        let target = self.root.join(name);

        if target == local {
            self.apply_permissions(&target)?;
            return Ok(PutOutcome::Stored);
        }

        if !overwrite && tokio::fs::try_exists(&target).await.unwrap_or(false) {
            info!("{} already exists, leaving it in place", target.display());
            return Ok(PutOutcome::SkippedExisting);
        }

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| SinkError::io(&self.root, e))?;
        move_file(local, &target).await?;

        if let Err(e) = self.apply_permissions(&target) {
            warn!("Failed to apply permissions to {}: {}", target.display(), e);
        }

        info!("Moved to {}", target.display());
        Ok(PutOutcome::Stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_moves_from_staging() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("library");
        let staging = dir.path().join("staging");
        std::fs::create_dir_all(&staging).unwrap();
        let local = staging.join("clip.mp4");
        std::fs::write(&local, b"video").unwrap();

        let sink = LocalSink::new(root.clone(), Some(staging), None);
        assert!(!sink.exists("clip.mp4").await.unwrap());

        let outcome = sink.put(&local, "clip.mp4", false).await.unwrap();
        assert_eq!(outcome, PutOutcome::Stored);
        assert!(!local.exists());
        assert_eq!(std::fs::read(root.join("clip.mp4")).unwrap(), b"video");
        assert!(sink.exists("clip.mp4").await.unwrap());
    }

    #[tokio::test]
    async fn test_put_skips_existing_without_overwrite() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("library");
        let staging = dir.path().join("staging");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::create_dir_all(&staging).unwrap();
        std::fs::write(root.join("clip.mp4"), b"old").unwrap();
        let local = staging.join("clip.mp4");
        std::fs::write(&local, b"new").unwrap();

        let sink = LocalSink::new(root.clone(), Some(staging), None);
        let outcome = sink.put(&local, "clip.mp4", false).await.unwrap();
        assert_eq!(outcome, PutOutcome::SkippedExisting);
        assert_eq!(std::fs::read(root.join("clip.mp4")).unwrap(), b"old");

        let outcome = sink.put(&local, "clip.mp4", true).await.unwrap();
        assert_eq!(outcome, PutOutcome::Stored);
        assert_eq!(std::fs::read(root.join("clip.mp4")).unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_put_in_place_applies_mode() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("clip.mp4");
        std::fs::write(&path, b"video").unwrap();

        let policy = PermissionPolicy {
            uid: None,
            gid: None,
            mode: Some("640".to_string()),
        };
        let sink = LocalSink::new(dir.path().to_path_buf(), None, Some(policy));
        sink.put(&path, "clip.mp4", false).await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o640);
    }
}
