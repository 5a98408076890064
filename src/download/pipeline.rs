use crate::config::DownloadMethod;
use crate::crawler::Headers;
use crate::download::backends::{fetch_artifact, BackendContext};
use crate::download::probe::{validate, Probe, ProbeReport};
use crate::download::{DownloadError, ValidationError};
use crate::extract::FinalRecord;
use crate::output::{PutOutcome, SidecarWriter, Sink};
use crate::state::Artifact;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One item to download and commit
#[derive(Debug, Clone, Copy)]
pub struct DownloadRequest<'a> {
    pub record: &'a FinalRecord,
    pub download_url: &'a str,
    /// Final filename, extension included
    pub filename: &'a str,
    pub method: DownloadMethod,
    pub headers: &'a Headers,
    pub user_agent: &'a str,
    pub origin: Option<&'a str>,
    pub overwrite: bool,
    /// Rewrite the sidecar even when one exists
    pub refresh_sidecar: bool,
    /// Write a sidecar at all
    pub sidecar: bool,
}

/// How a delivery ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Downloaded, validated and committed
    Committed,
    /// A valid staged artifact was committed without downloading
    Reused,
    /// The sink already held the artifact; nothing was downloaded
    AlreadyPresent,
}

/// Retrieval, validation, promotion and commit of artifacts
pub struct DownloadPipeline {
    client: Client,
    probe: Arc<dyn Probe>,
    sink: Arc<dyn Sink>,
    sidecar: Option<Arc<dyn SidecarWriter>>,
    min_bytes_per_second: u64,
}

impl DownloadPipeline {
    pub fn new(client: Client, probe: Arc<dyn Probe>, sink: Arc<dyn Sink>, min_bytes_per_second: u64) -> Self {
        Self {
            client,
            probe,
            sink,
            sidecar: None,
            min_bytes_per_second,
        }
    }

    pub fn with_sidecar(mut self, writer: Arc<dyn SidecarWriter>) -> Self {
        self.sidecar = Some(writer);
        self
    }

    pub fn sink(&self) -> &dyn Sink {
        self.sink.as_ref()
    }

    /// Delivers one item to the sink
    ///
    /// Nothing is ever left at the staged final path unless it passed the
    /// probe; a failed download leaves no temporary file behind either.
    pub async fn deliver(&self, req: &DownloadRequest<'_>) -> Result<DeliveryOutcome, DownloadError> {
        let sink = self.sink.as_ref();

        if sink.is_remote() && !req.overwrite && sink.exists(req.filename).await? {
            info!("{} already exists in the sink, skipping download", req.filename);
            if req.sidecar {
                self.ensure_remote_sidecar(req).await;
            }
            return Ok(DeliveryOutcome::AlreadyPresent);
        }

        let staged = sink.staging_dir().join(req.filename);
        let reused = !req.overwrite && self.reuse_staged(&staged).await;
        if !reused {
            self.download_validated(req, &staged).await?;
        }

        let sidecar_path = if req.sidecar {
            self.write_sidecar(req.record, &staged, req.overwrite || req.refresh_sidecar)
        } else {
            None
        };

        let outcome = sink.put(&staged, req.filename, req.overwrite).await?;
        if let Some(local) = &sidecar_path {
            self.put_sidecar(local, true).await;
        }

        if sink.is_remote() || outcome == PutOutcome::SkippedExisting {
            remove_if_present(&staged).await;
            if let Some(local) = &sidecar_path {
                remove_if_present(local).await;
            }
        }

        Ok(match (outcome, reused) {
            (PutOutcome::SkippedExisting, _) => DeliveryOutcome::AlreadyPresent,
            (PutOutcome::Stored, true) => DeliveryOutcome::Reused,
            (PutOutcome::Stored, false) => DeliveryOutcome::Committed,
        })
    }

    async fn probe_valid(&self, path: &Path) -> Result<ProbeReport, ValidationError> {
        let report = self.probe.probe(path).await?;
        validate(&report, self.min_bytes_per_second)?;
        Ok(report)
    }

    /// Probes an artifact left at the staged path by an earlier run
    ///
    /// A valid one is kept; an invalid one is deleted.
    async fn reuse_staged(&self, staged: &Path) -> bool {
        if !tokio::fs::try_exists(staged).await.unwrap_or(false) {
            return false;
        }
        match self.probe_valid(staged).await {
            Ok(report) => {
                info!(
                    "Valid file already staged at {} ({}, {}), skipping download",
                    staged.display(),
                    report.duration_hms(),
                    report.resolution()
                );
                true
            }
            Err(e) => {
                warn!("Invalid file at {} ({}), downloading again", staged.display(), e);
                remove_if_present(staged).await;
                false
            }
        }
    }

    async fn download_validated(&self, req: &DownloadRequest<'_>, staged: &Path) -> Result<(), DownloadError> {
        let ctx = BackendContext {
            client: &self.client,
            headers: req.headers,
            user_agent: req.user_agent,
            origin: req.origin,
            embed_thumbnail: req.record.text("image").is_some(),
            overwrite: req.overwrite,
        };

        let mut artifact = Artifact::new(staged);
        info!("Downloading {} to {}", req.download_url, staged.display());

        let result = async {
            fetch_artifact(req.method, req.download_url, artifact.temp_path(), &ctx).await?;
            artifact.landed()?;
            let report = self.probe_valid(artifact.temp_path()).await?;
            artifact.promote(&report).await?;
            Ok::<_, DownloadError>(report)
        }
        .await;

        match result {
            Ok(report) => {
                info!(
                    "Saved {}: {:.2} MB, {}, {}, {} kbps",
                    req.filename,
                    report.size_bytes as f64 / 1024.0 / 1024.0,
                    report.duration_hms(),
                    report.resolution(),
                    report.bitrate_kbps
                );
                Ok(())
            }
            Err(e) => {
                warn!("Download of {} failed: {}", req.download_url, e);
                if let Err(cleanup) = artifact.discard().await {
                    warn!("Failed to remove temporary file: {}", cleanup);
                }
                Err(e)
            }
        }
    }

    fn write_sidecar(&self, record: &FinalRecord, artifact: &Path, overwrite: bool) -> Option<PathBuf> {
        let writer = self.sidecar.as_ref()?;
        match writer.write(record, artifact, overwrite) {
            Ok(Some(path)) => Some(path),
            Ok(None) => {
                let existing = writer.sidecar_path(artifact);
                existing.exists().then_some(existing)
            }
            Err(e) => {
                warn!("Failed to write sidecar for {}: {}", artifact.display(), e);
                None
            }
        }
    }

    async fn put_sidecar(&self, local: &Path, overwrite: bool) {
        let Some(name) = local.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            return;
        };
        if let Err(e) = self.sink.put(local, &name, overwrite).await {
            warn!("Failed to commit sidecar {}: {}", name, e);
        }
    }

    /// Uploads a sidecar for an artifact the remote sink already holds
    async fn ensure_remote_sidecar(&self, req: &DownloadRequest<'_>) {
        let Some(writer) = &self.sidecar else {
            return;
        };
        let staged = self.sink.staging_dir().join(req.filename);
        let sidecar = writer.sidecar_path(&staged);
        let Some(name) = sidecar.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            return;
        };

        if !req.refresh_sidecar && self.sink.exists(&name).await.unwrap_or(false) {
            debug!("Sidecar {} already in the sink", name);
            return;
        }

        if let Err(e) = tokio::fs::create_dir_all(self.sink.staging_dir()).await {
            warn!("Cannot create staging directory: {}", e);
            return;
        }
        match writer.write(req.record, &staged, true) {
            Ok(Some(local)) => {
                self.put_sidecar(&local, true).await;
                remove_if_present(&local).await;
            }
            Ok(None) => {}
            Err(e) => warn!("Failed to write sidecar {}: {}", name, e),
        }
    }
}

async fn remove_if_present(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Removed {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
    }
}
