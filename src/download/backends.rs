//! Retrieval backends
//!
//! Every backend writes to the path it is given and nothing else; the
//! pipeline decides whether that path ever becomes the destination.

use crate::config::DownloadMethod;
use crate::crawler::Headers;
use crate::download::hls::{rewrite_manifest, segment_count};
use crate::download::DownloadError;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};
use url::Url;

/// Progress granularity when the response has no length
const PROGRESS_STEP_UNKNOWN: u64 = 8 * 1024 * 1024;

/// Everything a backend needs besides the URL and the target path
#[derive(Debug, Clone, Copy)]
pub struct BackendContext<'a> {
    pub client: &'a Client,
    pub headers: &'a Headers,
    pub user_agent: &'a str,
    /// `Origin` header for manifest fetches
    pub origin: Option<&'a str>,
    /// Ask the downloader to embed a thumbnail
    pub embed_thumbnail: bool,
    pub overwrite: bool,
}

fn with_headers(mut request: RequestBuilder, ctx: &BackendContext<'_>) -> RequestBuilder {
    for (name, value) in ctx.headers {
        if !name.eq_ignore_ascii_case("user-agent") {
            request = request.header(name.as_str(), value.as_str());
        }
    }
    request.header("User-Agent", ctx.user_agent)
}

/// Downloads `url` to `target` with the chosen backend
///
/// Returns an error if the backend fails or leaves nothing at `target`.
pub async fn fetch_artifact(
    method: DownloadMethod,
    url: &str,
    target: &Path,
    ctx: &BackendContext<'_>,
) -> Result<(), DownloadError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(DownloadError::EmptyUrl);
    }
    let url = if url.starts_with("//") {
        format!("http:{}", url)
    } else {
        url.to_string()
    };

    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    debug!("Downloading {} with {:?} to {}", url, method, target.display());
    match method {
        DownloadMethod::Http => download_http(&url, target, ctx).await?,
        DownloadMethod::Curl => run_tool("curl", curl_args(&url, target, ctx)).await?,
        DownloadMethod::Wget => run_tool("wget", wget_args(&url, target, ctx)).await?,
        DownloadMethod::YtDlp => run_tool("yt-dlp", ytdlp_args(&url, target, ctx)).await?,
        DownloadMethod::Ffmpeg => download_segmented(&url, target, ctx).await?,
    }

    if !tokio::fs::try_exists(target).await.unwrap_or(false) {
        return Err(DownloadError::Missing {
            method,
            path: target.to_path_buf(),
        });
    }
    Ok(())
}

async fn download_http(url: &str, target: &Path, ctx: &BackendContext<'_>) -> Result<(), DownloadError> {
    let response = with_headers(ctx.client.get(url), ctx)
        .send()
        .await?
        .error_for_status()?;

    let total = response.content_length().filter(|&t| t > 0);
    let step = total.map_or(PROGRESS_STEP_UNKNOWN, |t| (t / 10).max(1));
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut file = tokio::fs::File::create(target).await?;
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;
    let mut next_report = step;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;

        if written >= next_report {
            match total {
                Some(t) => debug!(
                    "{}: {} / {} bytes ({:.0}%)",
                    name,
                    written,
                    t,
                    written as f64 * 100.0 / t as f64
                ),
                None => debug!("{}: {} bytes", name, written),
            }
            next_report = written + step;
        }
    }
    file.flush().await?;

    info!("Downloaded {} bytes to {}", written, target.display());
    Ok(())
}

fn header_args(flag: &str, ctx: &BackendContext<'_>) -> Vec<OsString> {
    ctx.headers
        .iter()
        .filter(|(name, _)| !name.eq_ignore_ascii_case("user-agent"))
        .flat_map(|(name, value)| {
            [
                OsString::from(flag),
                OsString::from(format!("{}: {}", name, value)),
            ]
        })
        .collect()
}

fn curl_args(url: &str, target: &Path, ctx: &BackendContext<'_>) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "-L".into(),
        "-o".into(),
        target.into(),
        "--retry".into(),
        "3".into(),
        "--max-time".into(),
        "600".into(),
        "--silent".into(),
        "--show-error".into(),
        "-A".into(),
        ctx.user_agent.into(),
    ];
    args.extend(header_args("-H", ctx));
    args.push(url.into());
    args
}

fn wget_args(url: &str, target: &Path, ctx: &BackendContext<'_>) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "--tries=3".into(),
        "--timeout=600".into(),
        "--no-verbose".into(),
        "-O".into(),
        target.into(),
        format!("--user-agent={}", ctx.user_agent).into(),
    ];
    args.extend(
        ctx.headers
            .iter()
            .filter(|(name, _)| !name.eq_ignore_ascii_case("user-agent"))
            .map(|(name, value)| OsString::from(format!("--header={}: {}", name, value))),
    );
    args.push(url.into());
    args
}

fn ytdlp_args(url: &str, target: &Path, ctx: &BackendContext<'_>) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "-o".into(),
        target.into(),
        "--user-agent".into(),
        ctx.user_agent.into(),
        "--no-progress".into(),
    ];
    if ctx.overwrite {
        args.push("--force-overwrite".into());
    }
    if ctx.embed_thumbnail {
        args.extend(["--embed-thumbnail", "--convert-thumbnails", "jpg"].map(OsString::from));
    }
    args.extend(header_args("--add-header", ctx));
    args.push(url.into());
    args
}

/// Where the rewritten playlist is staged while ffmpeg reads it
fn manifest_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(".m3u8");
    PathBuf::from(name)
}

async fn download_segmented(url: &str, target: &Path, ctx: &BackendContext<'_>) -> Result<(), DownloadError> {
    let manifest_url = Url::parse(url).map_err(|source| DownloadError::InvalidUrl {
        url: url.to_string(),
        source,
    })?;

    let mut request = with_headers(ctx.client.get(url), ctx)
        .header("Accept", "application/vnd.apple.mpegurl");
    if let Some(origin) = ctx.origin {
        request = request.header("Origin", origin);
    }
    let content = request.send().await?.error_for_status()?.text().await?;

    let rewritten = rewrite_manifest(&content, &manifest_url);
    debug!("Manifest {} lists {} segments", url, segment_count(&rewritten));

    let playlist = manifest_path(target);
    tokio::fs::write(&playlist, rewritten).await?;

    let args: Vec<OsString> = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-protocol_whitelist".into(),
        "file,http,https,tcp,tls,crypto".into(),
        "-i".into(),
        playlist.clone().into(),
        "-c".into(),
        "copy".into(),
        "-bsf:a".into(),
        "aac_adtstoasc".into(),
        "-y".into(),
        target.into(),
    ];
    let result = run_tool("ffmpeg", args).await;

    if let Err(e) = tokio::fs::remove_file(&playlist).await {
        warn!("Failed to remove playlist {}: {}", playlist.display(), e);
    }
    result
}

async fn run_tool(program: &'static str, args: Vec<OsString>) -> Result<(), DownloadError> {
    debug!("Executing {} {:?}", program, args);

    let output = Command::new(program)
        .args(&args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|source| DownloadError::Spawn { program, source })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        for line in stderr.lines().filter(|l| !l.trim().is_empty()).take(10) {
            warn!("{}: {}", program, line.trim());
        }
        return Err(DownloadError::Command {
            program,
            status: output.status,
        });
    }

    Ok(())
}
