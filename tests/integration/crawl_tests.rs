//! Integration tests for the crawler
//!
//! These tests use wiremock to serve a small site and run the crawl driver
//! end-to-end against it, with a probe double standing in for ffprobe.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use trawl::config::{Settings, SiteDescription};
use trawl::crawler::{CrawlOptions, Crawler, FetchSession};
use trawl::download::{DownloadPipeline, Probe, ProbeError, ProbeReport};
use trawl::output::LocalSink;
use trawl::state::{DedupStore, PaginationCursor};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Reports a fixed duration and the real file size
struct FixedProbe(f64);

#[async_trait]
impl Probe for FixedProbe {
    async fn probe(&self, path: &Path) -> Result<ProbeReport, ProbeError> {
        let size_bytes = std::fs::metadata(path)?.len();
        Ok(ProbeReport {
            duration_secs: self.0,
            width: Some(1280),
            height: Some(720),
            bitrate_kbps: 0,
            size_bytes,
        })
    }
}

struct Harness {
    server: MockServer,
    dir: TempDir,
    settings: Settings,
    site: SiteDescription,
}

impl Harness {
    async fn start() -> Self {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();

        let settings = Settings::from_toml(&format!(
            r#"
user-agents = ["trawl-test/1.0"]
state-file = "{state}"

[sleep]
between-pages = 0.0
between-items = 0.0

[destination]
path = "{media}"
"#,
            state = dir.path().join("state.txt").display(),
            media = dir.path().join("media").display(),
        ))
        .unwrap();

        let site = SiteDescription::from_toml(&format!(
            r#"
name = "Mock Tube"
shortcode = "mt"
domain = "127.0.0.1"
base-url = "{base}"

[download]
method = "http"

[[modes]]
name = "video"
kind = "item"
url = "/watch/{{video}}"

[[modes]]
name = "search"
kind = "list"
url = "/search/{{search}}"
max-pages = 3

[[modes]]
name = "category"
kind = "list"
url = "/category/{{category}}"
url-paged = "/category/{{category}}/{{page}}"
max-pages = 2

[[modes]]
name = "rss"
kind = "feed"
url = "/rss"

[scrapers.item.fields]
title = "h1"
download_url = {{ selector = "a.download", attribute = "href" }}

[scrapers.feed.fields]
title = "title"

[scrapers.list]
container = "ul.results"
item = "li"

[scrapers.list.fields]
url = {{ selector = "a", attribute = "href" }}

[scrapers.list.pagination]
next-page = {{ selector = "a.next" }}
"#,
            base = server.uri(),
        ))
        .unwrap();

        Self {
            server,
            dir,
            settings,
            site,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.server.uri(), path)
    }

    fn media(&self) -> std::path::PathBuf {
        self.dir.path().join("media")
    }

    fn store(&self) -> DedupStore {
        DedupStore::load(&self.settings.state_file).unwrap()
    }

    /// Serves an item page whose download link points at `/media/{id}.mp4`
    async fn mount_item(&self, id: u32, title: &str, bytes: usize) {
        let body = format!(
            r#"<html><body><h1>{}</h1><a class="download" href="/media/{}.mp4">Download</a></body></html>"#,
            title, id
        );
        Mock::given(method("GET"))
            .and(path(format!("/watch/{}", id)))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&self.server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/media/{}.mp4", id)))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; bytes]))
            .mount(&self.server)
            .await;
    }

    async fn run(&self, store: &mut DedupStore, probe: f64, input: &str) -> bool {
        let mut session = FetchSession::new(&self.settings).unwrap();
        let sink = Arc::new(LocalSink::from_config(&self.settings.destination));
        let pipeline = DownloadPipeline::new(
            session.client().clone(),
            Arc::new(FixedProbe(probe)),
            sink,
            self.settings.validation.min_bytes_per_second,
        );

        let mut crawler = Crawler::new(&self.site, &self.settings, &mut session, store, &pipeline)
            .unwrap()
            .with_options(CrawlOptions::default());
        let handled = crawler
            .run_input(input, PaginationCursor::default())
            .await
            .unwrap();
        session.close().await;
        handled
    }
}

fn listing(items: &[&str], next: Option<&str>) -> String {
    let mut body = String::from(r#"<html><body><ul class="results">"#);
    for item in items {
        body.push_str(&format!(r#"<li><a href="{}">clip</a></li>"#, item));
    }
    body.push_str("</ul>");
    if let Some(next) = next {
        body.push_str(&format!(r#"<a class="next" href="{}">Next</a>"#, next));
    }
    body.push_str("</body></html>");
    body
}

#[tokio::test]
async fn test_leaf_item_is_committed_and_recorded() {
    let h = Harness::start().await;
    h.mount_item(1, "First Clip", 50_000).await;

    let mut store = h.store();
    let url = h.url("/watch/1");
    assert!(h.run(&mut store, 1.0, &url).await);

    let artifact = h.media().join("First Clip.mp4");
    assert_eq!(std::fs::metadata(&artifact).unwrap().len(), 50_000);
    assert!(!h.media().join(".First Clip.mp4").exists());
    assert!(store.contains(&url));

    let state = std::fs::read_to_string(&h.settings.state_file).unwrap();
    assert_eq!(state.lines().collect::<Vec<_>>(), vec![url.as_str()]);
}

#[tokio::test]
async fn test_implausible_download_leaves_no_artifact() {
    let h = Harness::start().await;
    // 100_000 bytes over 120 seconds is about 833 B/s
    h.mount_item(1, "Clip", 100_000).await;

    let mut store = h.store();
    let url = h.url("/watch/1");
    assert!(!h.run(&mut store, 120.0, &url).await);

    assert!(!h.media().join("Clip.mp4").exists());
    assert!(!h.media().join(".Clip.mp4").exists());
    assert!(!store.contains(&url));
}

#[tokio::test]
async fn test_recorded_item_is_not_downloaded_again() {
    let h = Harness::start().await;
    let item = h.url("/watch/7");

    let mut store = h.store();
    store.record(&item).unwrap();

    Mock::given(method("GET"))
        .and(path("/search/cats"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing(&["/watch/7"], None)))
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/watch/7"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<h1>Seen</h1>"))
        .expect(0)
        .mount(&h.server)
        .await;

    assert!(h.run(&mut store, 1.0, &h.url("/search/cats")).await);
    assert!(!h.media().join("Seen.mp4").exists());
}

#[tokio::test]
async fn test_page_cap_stops_before_next_link() {
    let h = Harness::start().await;
    let mut store = h.store();

    for page in 1..=3u32 {
        let route = if page == 1 {
            "/search/cats".to_string()
        } else {
            format!("/search/cats/{}", page)
        };
        let item = h.url(&format!("/watch/{}", page));
        store.record(&item).unwrap();
        let next = format!("/search/cats/{}", page + 1);
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(listing(&[&item], Some(&next))),
            )
            .expect(1)
            .mount(&h.server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/search/cats/4"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing(&[], None)))
        .expect(0)
        .mount(&h.server)
        .await;

    assert!(h.run(&mut store, 1.0, &h.url("/search/cats")).await);
}

#[tokio::test]
async fn test_paged_template_keeps_captured_case() {
    let h = Harness::start().await;
    let mut store = h.store();
    let item = h.url("/watch/9");
    store.record(&item).unwrap();

    Mock::given(method("GET"))
        .and(path("/category/BigCats"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing(&[&item], None)))
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/category/BigCats/2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing(&[&item], None)))
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/category/bigcats/2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing(&[], None)))
        .expect(0)
        .mount(&h.server)
        .await;

    assert!(h.run(&mut store, 1.0, &h.url("/category/BigCats")).await);
}

#[tokio::test]
async fn test_list_item_offset_applies_to_first_page() {
    let h = Harness::start().await;
    h.mount_item(2, "Second", 20_000).await;

    Mock::given(method("GET"))
        .and(path("/search/dogs"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(listing(&["/watch/1", "/watch/2"], None)),
        )
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/watch/1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<h1>First</h1>"))
        .expect(0)
        .mount(&h.server)
        .await;

    let mut store = h.store();
    let mut session = FetchSession::new(&h.settings).unwrap();
    let sink = Arc::new(LocalSink::from_config(&h.settings.destination));
    let pipeline = DownloadPipeline::new(session.client().clone(), Arc::new(FixedProbe(1.0)), sink, 10_240);
    let mut crawler = Crawler::new(&h.site, &h.settings, &mut session, &mut store, &pipeline).unwrap();

    let handled = crawler
        .run_mode("search", "dogs", PaginationCursor::new(1, 2))
        .await
        .unwrap();
    assert!(handled);
    assert!(h.media().join("Second.mp4").exists());
}

#[tokio::test]
async fn test_feed_entries_processed_oldest_first() {
    let h = Harness::start().await;
    h.mount_item(1, "Old One", 20_000).await;
    h.mount_item(2, "New One", 20_000).await;

    let feed = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"><channel><title>Mock</title><link>{base}</link><description>d</description>
<item><title>New One</title><link>{base}/watch/2</link><guid>2</guid></item>
<item><title>Old One</title><link>{base}/watch/1</link><guid>1</guid></item>
</channel></rss>"#,
        base = h.server.uri()
    );
    Mock::given(method("GET"))
        .and(path("/rss"))
        .respond_with(ResponseTemplate::new(200).set_body_string(feed))
        .mount(&h.server)
        .await;

    let mut store = h.store();
    assert!(h.run(&mut store, 1.0, &h.url("/rss")).await);

    let state = std::fs::read_to_string(&h.settings.state_file).unwrap();
    let oldest = h.url("/watch/1");
    let newest = h.url("/watch/2");
    assert_eq!(
        state.lines().collect::<Vec<_>>(),
        vec![oldest.as_str(), newest.as_str()]
    );
    assert!(h.media().join("Old One.mp4").exists());
    assert!(h.media().join("New One.mp4").exists());
}

#[tokio::test]
async fn test_unknown_mode_is_an_error() {
    let h = Harness::start().await;
    let mut store = h.store();
    let mut session = FetchSession::new(&h.settings).unwrap();
    let sink = Arc::new(LocalSink::from_config(&h.settings.destination));
    let pipeline = DownloadPipeline::new(session.client().clone(), Arc::new(FixedProbe(1.0)), sink, 10_240);
    let mut crawler = Crawler::new(&h.site, &h.settings, &mut session, &mut store, &pipeline).unwrap();

    let err = crawler
        .run_mode("nope", "x", PaginationCursor::default())
        .await
        .unwrap_err();
    assert!(matches!(err, trawl::TrawlError::UnknownMode { .. }));
}
