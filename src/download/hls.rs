//! Playlist manifest helpers for segmented-stream downloads

use url::Url;

/// Rewrites segment references in a playlist to absolute URLs
///
/// Tag and comment lines (starting with `#`) and blank lines pass through
/// unchanged. Any other line is a segment or variant reference; relative
/// ones are resolved against the manifest's own URL.
///
/// # Examples
///
/// ```
/// use trawl::download::rewrite_manifest;
/// use url::Url;
///
/// let base = Url::parse("https://cdn.example.com/v/1/index.m3u8").unwrap();
/// let out = rewrite_manifest("#EXTM3U\nseg0.ts\n", &base);
/// assert_eq!(out, "#EXTM3U\nhttps://cdn.example.com/v/1/seg0.ts\n");
/// ```
pub fn rewrite_manifest(content: &str, manifest_url: &Url) -> String {
    let mut out = String::with_capacity(content.len() * 2);

    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with("http") {
            out.push_str(line);
        } else {
            match manifest_url.join(trimmed) {
                Ok(absolute) => out.push_str(absolute.as_str()),
                Err(e) => {
                    tracing::warn!("Cannot resolve segment '{}': {}", trimmed, e);
                    out.push_str(line);
                }
            }
        }
        out.push('\n');
    }

    out
}

/// Number of segment lines in a playlist
pub(crate) fn segment_count(content: &str) -> usize {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .count()
}

/// Picks a manifest URL from captured network traffic
///
/// Only URLs mentioning `.m3u8` are considered. A full-HD variant is
/// preferred; otherwise the first one seen wins.
pub fn pick_best_manifest<'a, I>(urls: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a String>,
{
    let candidates: Vec<&str> = urls
        .into_iter()
        .map(String::as_str)
        .filter(|u| u.contains(".m3u8"))
        .collect();

    candidates
        .iter()
        .find(|u| u.contains("1920x1080"))
        .or_else(|| candidates.first())
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrite_keeps_tags_and_absolute_lines() {
        let base = Url::parse("https://cdn.example.com/hls/master.m3u8?token=abc").unwrap();
        let manifest = "#EXTM3U\n#EXT-X-TARGETDURATION:10\n#EXTINF:10.0,\nchunk-1.ts\n\n#EXTINF:10.0,\nhttps://other.example.com/chunk-2.ts\n/root/chunk-3.ts\n#EXT-X-ENDLIST";

        let out = rewrite_manifest(manifest, &base);
        let lines: Vec<&str> = out.lines().collect();

        assert_eq!(lines[0], "#EXTM3U");
        assert_eq!(lines[3], "https://cdn.example.com/hls/chunk-1.ts");
        assert_eq!(lines[4], "");
        assert_eq!(lines[6], "https://other.example.com/chunk-2.ts");
        assert_eq!(lines[7], "https://cdn.example.com/root/chunk-3.ts");
        assert_eq!(lines[8], "#EXT-X-ENDLIST");
        assert_eq!(segment_count(&out), 3);
    }

    #[test]
    fn test_pick_prefers_full_hd() {
        let urls = vec![
            "https://cdn.example.com/player.js".to_string(),
            "https://cdn.example.com/640x360/index.m3u8".to_string(),
            "https://cdn.example.com/1920x1080/index.m3u8".to_string(),
        ];
        assert_eq!(
            pick_best_manifest(&urls),
            Some("https://cdn.example.com/1920x1080/index.m3u8")
        );
    }

    #[test]
    fn test_pick_falls_back_to_first() {
        let urls = vec![
            "https://cdn.example.com/a.m3u8".to_string(),
            "https://cdn.example.com/b.m3u8".to_string(),
        ];
        assert_eq!(pick_best_manifest(&urls), Some("https://cdn.example.com/a.m3u8"));
        assert_eq!(pick_best_manifest(&Vec::<String>::new()), None);
    }
}
