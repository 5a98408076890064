//! Crawl driver: mode resolution, list traversal and per-item processing
//!
//! One target is processed to completion before the next. Within a traversal
//! items are handled in document order and pages in increasing page order.
//! Failures are scoped to the page or item they occur on; they are logged and
//! traversal stops or moves on, but they never abort the run.

use crate::config::{ListScraper, ModeConfig, ModeKind, Settings, SiteDescription};
use crate::crawler::fallback::FallbackHandler;
use crate::crawler::feed::{extract_entry, parse_feed};
use crate::crawler::fetcher::{FetchSession, Headers};
use crate::download::{pick_best_manifest, DeliveryOutcome, DownloadPipeline, DownloadRequest, FilenameBuilder};
use crate::extract::{extract_record, frame_targets, FieldMap, Finalizer, FrameDocuments, IgnoreFilter, RawRecord};
use crate::state::{DedupStore, PaginationCursor};
use crate::url::{build_url, is_url, resolve_link, Bindings, RouteMatcher};
use crate::{Result, TrawlError};
use scraper::Html;
use url::Url;

/// Item field holding a link to the item page
const ITEM_URL_FIELD: &str = "url";
/// Item field holding an identifier for the leaf template
const ITEM_KEY_FIELD: &str = "key";

/// Per-run flags
#[derive(Debug, Clone, Default)]
pub struct CrawlOptions {
    /// Re-download and replace existing artifacts and bypass the dedup gate
    pub overwrite: bool,
    /// Bypass the dedup gate and rewrite sidecars
    pub refresh_sidecar: bool,
    /// Record items a remote sink already holds
    pub apply_state: bool,
    pub sort: Option<String>,
    pub min_duration: Option<String>,
}

impl CrawlOptions {
    fn bypasses_dedup(&self) -> bool {
        self.overwrite || self.refresh_sidecar
    }

    /// Bindings available to every render within a run
    pub fn extra_bindings(&self) -> Bindings {
        let mut bindings = Bindings::new();
        if let Some(sort) = &self.sort {
            bindings.set("sort", sort.as_str());
        }
        if let Some(min_duration) = &self.min_duration {
            bindings.set("min_duration", min_duration.as_str());
        }
        bindings
    }
}

/// Where mode resolution stands for an input no route matched
#[derive(Debug, Clone, PartialEq, Eq)]
enum Resolution {
    NotMatched,
    Trying(usize),
    Matched(String),
    Exhausted,
}

/// Items and next link read from one listing page
#[derive(Debug, Default)]
struct ListingPage {
    /// Derived item URL per item element, in document order
    items: Vec<Option<String>>,
    next_link: Option<String>,
}

/// Drives one site's targets through fetch, extraction and delivery
pub struct Crawler<'a> {
    site: &'a SiteDescription,
    settings: &'a Settings,
    session: &'a mut FetchSession,
    store: &'a mut DedupStore,
    pipeline: &'a DownloadPipeline,
    fallback: Option<&'a dyn FallbackHandler>,
    options: CrawlOptions,
    matcher: RouteMatcher,
    finalizer: Finalizer,
    ignore: IgnoreFilter,
    naming: FilenameBuilder,
    headers: Headers,
    user_agent: String,
}

impl<'a> Crawler<'a> {
    /// Creates a crawler for one site
    ///
    /// Fails when the site's mode templates do not compile into routes.
    /// A user agent is picked from the pool once for the whole target.
    pub fn new(
        site: &'a SiteDescription,
        settings: &'a Settings,
        session: &'a mut FetchSession,
        store: &'a mut DedupStore,
        pipeline: &'a DownloadPipeline,
    ) -> Result<Self> {
        let matcher = RouteMatcher::new(site)?;
        let user_agent = session.user_agent();
        let mut headers = settings.headers.clone();
        headers.insert("User-Agent".to_string(), user_agent.clone());

        Ok(Self {
            site,
            settings,
            session,
            store,
            pipeline,
            fallback: None,
            options: CrawlOptions::default(),
            matcher,
            finalizer: Finalizer::new(&settings.case_overrides, &settings.tag_case_overrides),
            ignore: IgnoreFilter::new(&settings.ignored),
            naming: FilenameBuilder::new(&settings.file_naming, site),
            headers,
            user_agent,
        })
    }

    pub fn with_options(mut self, options: CrawlOptions) -> Self {
        self.options = options;
        self
    }

    /// Handler for inputs no mode can process
    pub fn with_fallback(mut self, handler: &'a dyn FallbackHandler) -> Self {
        self.fallback = Some(handler);
        self
    }

    /// Processes a URL or bare identifier
    ///
    /// A URL matching a route runs that mode directly. A bare identifier that
    /// matches nothing is tried against every declared mode in order until
    /// one succeeds. Anything left over goes to the fallback handler.
    /// Returns whether the input was handled.
    pub async fn run_input(&mut self, input: &str, cursor: PaginationCursor) -> Result<bool> {
        let site = self.site;
        let input = input.trim();

        if let Some(route) = self.matcher.match_url(input) {
            tracing::info!("{} matches mode '{}' of {}", input, route.mode, site.name);
            let mode = site.mode(&route.mode).ok_or_else(|| TrawlError::UnknownMode {
                site: site.name.clone(),
                mode: route.mode.clone(),
            })?;
            let mut bindings = route.bindings;
            bindings.extend_missing(&self.options.extra_bindings());
            return Ok(self.run_matched(mode, input, bindings, cursor).await);
        }

        if is_url(input) {
            tracing::warn!("{} matches no mode of {}", input, site.name);
            return Ok(self.defer_to_fallback(input).await);
        }

        let mut state = Resolution::NotMatched;
        loop {
            state = match state {
                Resolution::NotMatched => {
                    tracing::info!("No route for '{}', trying every mode of {}", input, site.name);
                    Resolution::Trying(0)
                }
                Resolution::Trying(index) => match site.modes.get(index) {
                    Some(mode) => {
                        tracing::info!("Trying mode '{}' for '{}'", mode.name, input);
                        if self.run_query(mode, input, cursor).await {
                            Resolution::Matched(mode.name.clone())
                        } else {
                            Resolution::Trying(index + 1)
                        }
                    }
                    None => Resolution::Exhausted,
                },
                Resolution::Matched(name) => {
                    tracing::info!("Mode '{}' handled '{}'", name, input);
                    return Ok(true);
                }
                Resolution::Exhausted => {
                    tracing::warn!("Every mode of {} failed for '{}'", site.name, input);
                    return Ok(self.defer_to_fallback(input).await);
                }
            };
        }
    }

    /// Runs a named mode with a query, e.g. a search term or category name
    pub async fn run_mode(&mut self, mode_name: &str, query: &str, cursor: PaginationCursor) -> Result<bool> {
        let site = self.site;
        let mode = site.mode(mode_name).ok_or_else(|| TrawlError::UnknownMode {
            site: site.name.clone(),
            mode: mode_name.to_string(),
        })?;
        Ok(self.run_query(mode, query.trim(), cursor).await)
    }

    /// Renders a mode's template from a query and runs it
    async fn run_query(&mut self, mode: &'a ModeConfig, query: &str, cursor: PaginationCursor) -> bool {
        let site = self.site;
        let rules = site.encoding_rules(mode);
        let mut bindings = self.options.extra_bindings();
        bindings.set(&mode.name, query);

        let template = match (&mode.url_paged, cursor.page()) {
            (Some(paged), page) if page > 1 && mode.kind == ModeKind::List => {
                bindings.set_page(page);
                paged
            }
            _ => &mode.url,
        };

        let url = match build_url(&site.base_url, template, &bindings, rules) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!("Cannot build URL for mode '{}' from '{}': {}", mode.name, query, e);
                return false;
            }
        };

        match mode.kind {
            ModeKind::Item => self.process_item(&url, None).await,
            ModeKind::Feed => self.run_feed(&url).await,
            ModeKind::List => self.traverse(mode, url, bindings, cursor).await,
        }
    }

    async fn run_matched(&mut self, mode: &'a ModeConfig, url: &str, bindings: Bindings, cursor: PaginationCursor) -> bool {
        match mode.kind {
            ModeKind::Item => self.process_item(url, None).await,
            ModeKind::Feed => self.run_feed(url).await,
            ModeKind::List => {
                let cursor = match bindings.page() {
                    Some(page) if page != cursor.page() => PaginationCursor::new(page, cursor.offset()),
                    _ => cursor,
                };
                self.traverse(mode, url.to_string(), bindings, cursor).await
            }
        }
    }

    async fn defer_to_fallback(&self, input: &str) -> bool {
        match self.fallback {
            Some(handler) => {
                tracing::info!("Handing '{}' to the fallback handler", input);
                handler.handle(input, self.options.overwrite).await
            }
            None => {
                tracing::error!("No mode of {} could handle '{}'", self.site.name, input);
                false
            }
        }
    }

    /// Walks a listing from `url` until no next page exists or the cap is hit
    ///
    /// Returns true if at least one listing page yielded items.
    async fn traverse(&mut self, mode: &'a ModeConfig, mut url: String, bindings: Bindings, mut cursor: PaginationCursor) -> bool {
        let site = self.site;
        let Some(list) = site.scrapers.list.as_ref() else {
            tracing::warn!("Mode '{}' of {} is a list but no list scraper is configured", mode.name, site.name);
            return false;
        };
        let max_pages = site.max_pages(mode);
        let mut listed_any = false;

        loop {
            let page = cursor.page();
            if let Some(cap) = max_pages {
                if page > cap {
                    tracing::info!("Page {} is past the cap of {} for mode '{}'", page, cap, mode.name);
                    break;
                }
            }

            tracing::info!("Fetching page {} of '{}': {}", page, mode.name, url);
            let body = match self.session.fetch_document(&url, &self.headers, site.use_browser).await {
                Ok(body) => body,
                Err(e) => {
                    tracing::warn!("Failed to fetch listing {}: {}", url, e);
                    break;
                }
            };

            let Some(listing) = read_listing(&body, list, site, &url) else {
                break;
            };
            listed_any = true;
            tracing::info!("Found {} items on page {}", listing.items.len(), page);

            for (index, derived) in listing.items.iter().enumerate() {
                let position = index as u32 + 1;
                if cursor.skips(position) {
                    tracing::debug!("Skipping item {} before offset {}", position, cursor.offset());
                    continue;
                }
                let Some(item_url) = derived else {
                    tracing::warn!("Cannot derive a URL for item {} on {}", position, url);
                    continue;
                };
                if !self.options.bypasses_dedup() && self.store.contains(item_url) {
                    tracing::info!("Already handled {}, skipping", item_url);
                    continue;
                }
                self.process_item(item_url, None).await;
            }

            if let Some(cap) = max_pages {
                if page >= cap {
                    tracing::info!("Reached the page cap of {} for mode '{}'", cap, mode.name);
                    break;
                }
            }

            let next = match &mode.url_paged {
                Some(template) => {
                    let mut next_bindings = bindings.clone();
                    next_bindings.set_page(page + 1);
                    match build_url(&site.base_url, template, &next_bindings, site.encoding_rules(mode)) {
                        Ok(next) => Some(next),
                        Err(e) => {
                            tracing::warn!("Cannot build page {} of '{}': {}", page + 1, mode.name, e);
                            None
                        }
                    }
                }
                None => listing.next_link,
            };

            let Some(next) = next else {
                tracing::info!("No page after {} for mode '{}'", page, mode.name);
                break;
            };
            if next == url {
                tracing::warn!("Next page of {} points back to itself", url);
                break;
            }

            url = next;
            cursor = cursor.advance();
            tokio::time::sleep(self.settings.sleep.page_delay()).await;
        }

        listed_any
    }

    /// Fetches a feed and processes its entries oldest first
    async fn run_feed(&mut self, url: &str) -> bool {
        let site = self.site;
        tracing::info!("Fetching feed {}", url);
        let body = match self.session.fetch_static(url, &self.headers).await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!("Failed to fetch feed {}: {}", url, e);
                return false;
            }
        };

        let entries = match parse_feed(&body) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Failed to parse feed {}: {}", url, e);
                return false;
            }
        };
        if entries.is_empty() {
            tracing::warn!("Feed {} has no entries", url);
            return false;
        }
        tracing::info!("Found {} feed entries, processing oldest first", entries.len());

        let no_fields = FieldMap::new();
        let fields = site.scrapers.feed.as_ref().map_or(&no_fields, |f| &f.fields);
        for entry in &entries {
            if !is_url(&entry.link) {
                tracing::warn!("Feed entry '{}' has no usable link", entry.title);
                continue;
            }
            if !self.options.bypasses_dedup() && self.store.contains(&entry.link) {
                tracing::info!("Already handled {}, skipping", entry.link);
                continue;
            }
            let seed = extract_entry(entry, fields);
            self.process_item(&entry.link, Some(&seed)).await;
        }
        true
    }

    /// Processes one item page, then waits out the item delay
    async fn process_item(&mut self, url: &str, seed: Option<&RawRecord>) -> bool {
        let handled = self.handle_item(url, seed).await;
        tokio::time::sleep(self.settings.sleep.item_delay()).await;
        handled
    }

    async fn handle_item(&mut self, url: &str, seed: Option<&RawRecord>) -> bool {
        let site = self.site;
        tracing::info!("Processing {}", url);

        let Some(scraper) = site.scrapers.item.as_ref() else {
            tracing::warn!("{} has no item scraper", site.name);
            return false;
        };
        let page_url = match Url::parse(url) {
            Ok(u) => u,
            Err(e) => {
                tracing::warn!("Invalid item URL {}: {}", url, e);
                return false;
            }
        };

        let body = match self.session.fetch_document(url, &self.headers, site.use_browser).await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!("Failed to fetch {}: {}", url, e);
                return false;
            }
        };

        let targets = {
            let doc = Html::parse_document(&body);
            frame_targets(doc.root_element(), &scraper.fields, &page_url)
        };
        let mut frames = FrameDocuments::new();
        for target in &targets {
            tracing::debug!("Fetching frame {} ({})", target.url, target.frame_selector);
            match self.session.fetch_document(&target.url, &self.headers, site.use_browser).await {
                Ok(frame_body) => frames.insert(&target.frame_selector, frame_body),
                Err(e) => tracing::warn!("Failed to fetch frame {} of {}: {}", target.url, url, e),
            }
        }

        let mut headers = self.headers.clone();
        let mut stream_url = None;
        if site.stream_discovery {
            let source = targets.first().map_or(url, |t| t.url.as_str());
            match self.session.fetch_rendered(source, &headers).await {
                Ok(page) => match pick_best_manifest(&page.network_urls) {
                    Some(manifest) => {
                        tracing::info!("Discovered stream {}", manifest);
                        stream_url = Some(manifest.to_string());
                        headers.insert("Referer".to_string(), source.to_string());
                        if let Some(cookies) = page.cookies.filter(|c| !c.is_empty()) {
                            headers.insert("Cookie".to_string(), cookies);
                        }
                    }
                    None => tracing::warn!("No stream manifest seen while loading {}", source),
                },
                Err(e) => tracing::warn!("Stream discovery failed for {}: {}", source, e),
            }
        }

        let mut raw = {
            let doc = Html::parse_document(&body);
            extract_record(doc.root_element(), &scraper.fields, &frames)
        };
        if let Some(seed) = seed {
            raw.fill_from(seed);
        }

        let record = self.finalizer.finalize(&raw, url);
        if let Some(term) = self.ignore.matched_term(&record) {
            tracing::info!("Ignoring '{}' ({}): mentions '{}'", record.title, url, term);
            return true;
        }

        let download_url = stream_url
            .or_else(|| raw.text("download_url").and_then(|href| resolve_link(href, &page_url)))
            .unwrap_or_else(|| url.to_string());
        let origin = site.download.origin.clone().or_else(|| origin_of(&download_url));
        let filename = self.naming.build(&record.title);

        let request = DownloadRequest {
            record: &record,
            download_url: &download_url,
            filename: &filename,
            method: site.download.method,
            headers: &headers,
            user_agent: &self.user_agent,
            origin: origin.as_deref(),
            overwrite: self.options.overwrite,
            refresh_sidecar: self.options.refresh_sidecar,
            sidecar: self.settings.make_sidecar && site.has_metadata_fields(),
        };

        match self.pipeline.deliver(&request).await {
            Ok(DeliveryOutcome::AlreadyPresent) => {
                if self.options.apply_state {
                    self.remember(url);
                }
                true
            }
            Ok(outcome) => {
                tracing::debug!("{} delivered ({:?})", filename, outcome);
                self.remember(url);
                true
            }
            Err(e) => {
                tracing::error!("Failed to deliver {} from {}: {}", filename, url, e);
                false
            }
        }
    }

    fn remember(&mut self, url: &str) {
        match self.store.record(url) {
            Ok(true) => tracing::debug!("Recorded {}", url),
            Ok(false) => {}
            Err(e) => tracing::error!("Failed to record {} in {}: {}", url, self.store.path().display(), e),
        }
    }
}

/// Locates the item container and items on a listing page
///
/// Returns None, after logging the selector involved, when the container or
/// its items cannot be found.
fn read_listing(body: &str, list: &ListScraper, site: &SiteDescription, page_url: &str) -> Option<ListingPage> {
    let doc = Html::parse_document(body);
    let root = doc.root_element();

    let Some(container) = list.container.select_first(root).into_iter().next() else {
        tracing::warn!("No item container ({}) on {}", list.container.describe(), page_url);
        return None;
    };
    let elements = list.item.select(container);
    if elements.is_empty() {
        tracing::warn!("No items ({}) in the container on {}", list.item.source(), page_url);
        return None;
    }

    let items = elements
        .into_iter()
        .map(|element| {
            let record = extract_record(element, &list.fields, &FrameDocuments::new());
            item_url(&record, site)
        })
        .collect();

    let next_link = list.pagination.next_page.as_ref().and_then(|next| {
        let base = Url::parse(page_url).ok()?;
        next.selector
            .select(root)
            .into_iter()
            .find_map(|el| el.value().attr(&next.attribute).map(str::to_string))
            .and_then(|href| resolve_link(&href, &base))
    });

    Some(ListingPage { items, next_link })
}

/// Derives an item's page URL from its link or its identifier
fn item_url(record: &RawRecord, site: &SiteDescription) -> Option<String> {
    if let Some(href) = record.text(ITEM_URL_FIELD) {
        return resolve_link(href, &site.base_url);
    }

    let key = record.text(ITEM_KEY_FIELD)?;
    let leaf = site.leaf_mode()?;
    let bindings = Bindings::new()
        .with(&leaf.name, key)
        .with(ITEM_KEY_FIELD, key);
    match build_url(&site.base_url, &leaf.url, &bindings, site.encoding_rules(leaf)) {
        Ok(url) => Some(url),
        Err(e) => {
            tracing::warn!("Cannot build item URL from key '{}': {}", key, e);
            None
        }
    }
}

/// `scheme://host[:port]` of a URL
fn origin_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    Some(match parsed.port() {
        Some(port) => format!("{}://{}:{}", parsed.scheme(), host, port),
        None => format!("{}://{}", parsed.scheme(), host),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SiteDescription;

    fn site() -> SiteDescription {
        SiteDescription::from_toml(
            r#"
name = "Example"
shortcode = "ex"
domain = "example.com"
base-url = "https://example.com"

[[modes]]
name = "video"
kind = "item"
url = "/watch/{video}"

[[modes]]
name = "search"
kind = "list"
url = "/search?q={search}"
url-paged = "/search?q={search}&page={page}"

[scrapers.item.fields]
title = "h1"

[scrapers.list]
container = ["div.missing", "ul.results"]
item = "li"

[scrapers.list.fields]
url = { selector = "a", attribute = "href" }
key = { selector = "span.key" }

[scrapers.list.pagination]
next-page = { selector = "a.next" }
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_read_listing_derives_item_urls() {
        let site = site();
        let list = site.scrapers.list.as_ref().unwrap();
        let body = r#"<html><body><ul class="results">
            <li><a href="/watch/1">One</a></li>
            <li><a href="https://cdn.example.com/watch/2">Two</a></li>
            <li><span class="key">abc</span></li>
            <li><b>nothing</b></li>
        </ul><a class="next" href="/search?q=x&page=2">Next</a></body></html>"#;

        let listing = read_listing(body, list, &site, "https://example.com/search?q=x").unwrap();
        assert_eq!(
            listing.items,
            vec![
                Some("https://example.com/watch/1".to_string()),
                Some("https://cdn.example.com/watch/2".to_string()),
                Some("https://example.com/watch/abc".to_string()),
                None,
            ]
        );
        assert_eq!(
            listing.next_link.as_deref(),
            Some("https://example.com/search?q=x&page=2")
        );
    }

    #[test]
    fn test_read_listing_without_container() {
        let site = site();
        let list = site.scrapers.list.as_ref().unwrap();
        let body = "<html><body><div>empty</div></body></html>";
        assert!(read_listing(body, list, &site, "https://example.com/").is_none());
    }

    #[test]
    fn test_origin_of() {
        assert_eq!(
            origin_of("https://cdn.example.com/v/1.m3u8?x=1").as_deref(),
            Some("https://cdn.example.com")
        );
        assert_eq!(
            origin_of("http://localhost:8080/a").as_deref(),
            Some("http://localhost:8080")
        );
        assert_eq!(origin_of("not a url"), None);
    }

    #[test]
    fn test_extra_bindings() {
        let options = CrawlOptions {
            sort: Some("newest".to_string()),
            ..Default::default()
        };
        let bindings = options.extra_bindings();
        assert_eq!(bindings.get("sort"), Some("newest"));
        assert_eq!(bindings.get("min_duration"), None);
    }
}
