//! Handling for inputs no site mode can process

use crate::output::{PutOutcome, Sink};
use async_trait::async_trait;
use chrono::Local;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;

/// Last resort for a target that matched no mode
#[async_trait]
pub trait FallbackHandler: Send + Sync {
    /// Returns true if the target was handled
    async fn handle(&self, target: &str, overwrite: bool) -> bool;
}

/// Downloads unmatched targets with `yt-dlp` and commits what it produces
pub struct YtDlpFallback {
    sink: Arc<dyn Sink>,
    user_agent: String,
    program: String,
    temp_root: PathBuf,
}

/// Name of a fresh working directory, e.g. `download_1f2e3d4c_20240301_120000`
fn work_dir_name() -> String {
    format!(
        "download_{:08x}_{}",
        rand::random::<u32>(),
        Local::now().format("%Y%m%d_%H%M%S")
    )
}

impl YtDlpFallback {
    pub fn new(sink: Arc<dyn Sink>, user_agent: impl Into<String>) -> Self {
        Self {
            sink,
            user_agent: user_agent.into(),
            program: "yt-dlp".to_string(),
            temp_root: std::env::temp_dir(),
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Directory under which working directories are created
    pub fn with_temp_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.temp_root = root.into();
        self
    }

    async fn download(&self, target: &str, dir: &Path) -> std::io::Result<bool> {
        let output = Command::new(&self.program)
            .arg("--paths")
            .arg(dir)
            .args(["--format", "best", "--add-metadata", "--user-agent"])
            .arg(&self.user_agent)
            .arg(target)
            .current_dir(dir)
            .output()
            .await?;

        if !output.status.success() {
            tracing::warn!(
                "{} exited with {} for {}: {}",
                self.program,
                output.status,
                target,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(output.status.success())
    }

    /// Commits every regular file in `dir` to the sink
    ///
    /// Returns the number of files stored or already present.
    pub async fn commit_dir(&self, dir: &Path, overwrite: bool) -> usize {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Cannot list {}: {}", dir.display(), e);
                return 0;
            }
        };

        let mut committed = 0;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };

            if !overwrite {
                match self.sink.exists(&name).await {
                    Ok(true) => {
                        tracing::info!("{} already exists at the destination, skipping", name);
                        committed += 1;
                        continue;
                    }
                    Ok(false) => {}
                    Err(e) => tracing::warn!("Cannot check {} at the destination: {}", name, e),
                }
            }

            match self.sink.put(&path, &name, overwrite).await {
                Ok(PutOutcome::Stored) => {
                    tracing::info!("Stored {}", name);
                    committed += 1;
                }
                Ok(PutOutcome::SkippedExisting) => committed += 1,
                Err(e) => tracing::error!("Failed to store {}: {}", name, e),
            }
        }
        committed
    }
}

#[async_trait]
impl FallbackHandler for YtDlpFallback {
    async fn handle(&self, target: &str, overwrite: bool) -> bool {
        let dir = self.temp_root.join(work_dir_name());
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            tracing::error!("Cannot create {}: {}", dir.display(), e);
            return false;
        }

        let handled = match self.download(target, &dir).await {
            Ok(true) => self.commit_dir(&dir, overwrite).await > 0,
            Ok(false) => false,
            Err(e) => {
                tracing::error!("Failed to run {}: {}", self.program, e);
                false
            }
        };

        if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
            tracing::debug!("Failed to remove {}: {}", dir.display(), e);
        }
        handled
    }
}
