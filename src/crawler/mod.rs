//! Crawler module for fetching and traversing site pages
//!
//! This module contains the core crawling logic, including:
//! - The fetch session (static HTTP and optional rendered fetches)
//! - Syndication feed parsing
//! - The crawl driver: mode resolution, list traversal, item processing
//! - The fallback handler for unmatched targets

mod driver;
mod fallback;
mod feed;
mod fetcher;

pub use driver::{CrawlOptions, Crawler};
pub use fallback::{FallbackHandler, YtDlpFallback};
pub use feed::{extract_entry, parse_feed, FeedEntry};
pub use fetcher::{
    build_http_client, BrowserLauncher, BrowserSession, FetchError, FetchSession, Headers,
    RenderedPage,
};
