//! Download and commit pipeline
//!
//! This module handles:
//! - Filename construction under the OS byte limit
//! - Backend selection (HTTP stream, curl, wget, yt-dlp, segmented stream)
//! - Probing downloaded files and rejecting implausible ones
//! - Promoting validated artifacts and handing them to a sink

mod backends;
mod filename;
mod hls;
mod pipeline;
mod probe;

pub use backends::{fetch_artifact, BackendContext};
pub use filename::{sanitize_title, FilenameBuilder, MAX_FILENAME_BYTES};
pub use hls::{pick_best_manifest, rewrite_manifest};
pub use pipeline::{DeliveryOutcome, DownloadPipeline, DownloadRequest};
pub use probe::{validate, FfprobeProbe, Probe, ProbeReport};

use crate::config::DownloadMethod;
use crate::output::SinkError;
use crate::state::ArtifactError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors from the media probe
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("IO error while probing: {0}")]
    Io(#[from] std::io::Error),

    #[error("ffprobe exited with {status} for {path}: {stderr}")]
    Failed {
        path: PathBuf,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("Unreadable probe output: {0}")]
    Parse(String),
}

/// Errors from the validity gate
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Probe failed: {0}")]
    Probe(#[from] ProbeError),

    #[error("File too small: {size_bytes} bytes over {duration_secs:.1}s is below {minimum} B/s")]
    BelowThreshold {
        size_bytes: u64,
        duration_secs: f64,
        minimum: u64,
    },
}

/// Errors from a single download
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: &'static str,
        source: std::io::Error,
    },

    #[error("{program} exited with {status}")]
    Command {
        program: &'static str,
        status: std::process::ExitStatus,
    },

    #[error("{method:?} backend produced no file at {path}")]
    Missing { method: DownloadMethod, path: PathBuf },

    #[error("Empty download URL")]
    EmptyUrl,

    #[error("Invalid URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Artifact error: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
