use crate::download::{ProbeError, ValidationError};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use tokio::process::Command;

/// What the media probe learned about a file
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeReport {
    pub duration_secs: f64,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub bitrate_kbps: u64,
    pub size_bytes: u64,
}

impl ProbeReport {
    pub fn resolution(&self) -> String {
        match (self.width, self.height) {
            (Some(w), Some(h)) => format!("{}x{}", w, h),
            _ => "unknown".to_string(),
        }
    }

    /// Duration as `HH:MM:SS`
    pub fn duration_hms(&self) -> String {
        let total = self.duration_secs.max(0.0) as u64;
        format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
    }
}

/// Inspects a downloaded file
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<ProbeReport, ProbeError>;
}

/// Rejects a file whose size is implausibly small for its duration
///
/// A zero duration (streams ffprobe cannot time) always passes.
pub fn validate(report: &ProbeReport, min_bytes_per_second: u64) -> Result<(), ValidationError> {
    if report.duration_secs > 0.0
        && (report.size_bytes as f64) / report.duration_secs < min_bytes_per_second as f64
    {
        return Err(ValidationError::BelowThreshold {
            size_bytes: report.size_bytes,
            duration_secs: report.duration_secs,
            minimum: min_bytes_per_second,
        });
    }
    Ok(())
}

/// Probe backed by the `ffprobe` executable
#[derive(Debug, Clone)]
pub struct FfprobeProbe {
    program: String,
}

impl Default for FfprobeProbe {
    fn default() -> Self {
        Self {
            program: "ffprobe".to_string(),
        }
    }
}

impl FfprobeProbe {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

// ffprobe reports format numbers as JSON strings
#[derive(Debug, Default, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    bit_rate: Option<String>,
    size: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeStream {
    width: Option<u32>,
    height: Option<u32>,
}

/// Builds a report from ffprobe's JSON, using `file_size` when ffprobe
/// omits the size
fn parse_ffprobe_json(json: &str, file_size: u64) -> Result<ProbeReport, ProbeError> {
    let output: FfprobeOutput =
        serde_json::from_str(json).map_err(|e| ProbeError::Parse(e.to_string()))?;

    let duration_secs = output
        .format
        .duration
        .as_deref()
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);
    let size_bytes = output
        .format
        .size
        .as_deref()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(file_size);
    let bitrate_kbps = output
        .format
        .bit_rate
        .as_deref()
        .and_then(|b| b.parse::<u64>().ok())
        .map_or(0, |b| b / 1000);
    let video = output
        .streams
        .iter()
        .find(|s| s.width.is_some() && s.height.is_some());

    Ok(ProbeReport {
        duration_secs,
        width: video.and_then(|s| s.width),
        height: video.and_then(|s| s.height),
        bitrate_kbps,
        size_bytes,
    })
}

#[async_trait]
impl Probe for FfprobeProbe {
    async fn probe(&self, path: &Path) -> Result<ProbeReport, ProbeError> {
        let output = Command::new(&self.program)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration,bit_rate,size:stream=width,height",
                "-of",
                "json",
            ])
            .arg(path)
            .output()
            .await?;

        if !output.status.success() {
            return Err(ProbeError::Failed {
                path: path.to_path_buf(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let file_size = tokio::fs::metadata(path).await?.len();
        parse_ffprobe_json(&String::from_utf8_lossy(&output.stdout), file_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(duration_secs: f64, size_bytes: u64) -> ProbeReport {
        ProbeReport {
            duration_secs,
            width: None,
            height: None,
            bitrate_kbps: 0,
            size_bytes,
        }
    }

    #[test]
    fn test_parse_ffprobe_json() {
        let json = r#"{
            "programs": [],
            "streams": [{}, {"width": 1280, "height": 720}],
            "format": {"duration": "61.500000", "bit_rate": "2500123", "size": "19219000"}
        }"#;
        let report = parse_ffprobe_json(json, 1).unwrap();
        assert_eq!(report.duration_secs, 61.5);
        assert_eq!(report.resolution(), "1280x720");
        assert_eq!(report.bitrate_kbps, 2500);
        assert_eq!(report.size_bytes, 19_219_000);
        assert_eq!(report.duration_hms(), "00:01:01");
    }

    #[test]
    fn test_parse_missing_fields_defaults() {
        let report = parse_ffprobe_json("{}", 4096).unwrap();
        assert_eq!(report.duration_secs, 0.0);
        assert_eq!(report.size_bytes, 4096);
        assert_eq!(report.resolution(), "unknown");
    }

    #[test]
    fn test_parse_garbage_rejected() {
        assert!(matches!(
            parse_ffprobe_json("not json", 0),
            Err(ProbeError::Parse(_))
        ));
    }

    #[test]
    fn test_validate_rejects_truncated_file() {
        // 100 kB over two minutes is about 833 B/s
        let result = validate(&report(120.0, 100_000), 10 * 1024);
        assert!(matches!(
            result,
            Err(ValidationError::BelowThreshold { .. })
        ));
    }

    #[test]
    fn test_validate_accepts_plausible_file() {
        assert!(validate(&report(120.0, 50_000_000), 10 * 1024).is_ok());
    }

    #[test]
    fn test_validate_zero_duration_passes() {
        assert!(validate(&report(0.0, 10), 10 * 1024).is_ok());
    }
}
