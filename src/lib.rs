//! Trawl: a configuration-driven site crawler
//!
//! This crate turns declarative site descriptions (URL templates, field
//! selectors, pagination rules) into a route matcher, a traversal driver,
//! an extraction pipeline and a download/commit pipeline. One engine, many
//! data-only site descriptions.

pub mod config;
pub mod crawler;
pub mod download;
pub mod extract;
pub mod output;
pub mod state;
pub mod url;

use thiserror::Error;

/// Main error type for Trawl operations
#[derive(Debug, Error)]
pub enum TrawlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Site '{site}' has no mode named '{mode}'")]
    UnknownMode { site: String, mode: String },

    #[error("No site description matches '{0}'")]
    NoSite(String),

    #[error("URL build error: {0}")]
    Build(#[from] BuildError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] crawler::FetchError),

    #[error("Download error: {0}")]
    Download(#[from] download::DownloadError),

    #[error("Sink error: {0}")]
    Sink(#[from] output::SinkError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid URL template: {0}")]
    InvalidTemplate(String),

    #[error("Invalid selector: {0}")]
    InvalidSelector(String),

    #[error("Invalid regex: {0}")]
    InvalidRegex(String),
}

/// URL template rendering errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("Template references unbound field '{0}'")]
    Unbound(String),

    #[error("Malformed template: {0}")]
    InvalidTemplate(String),

    #[error("Cannot resolve '{path}' against base URL: {message}")]
    Join { path: String, message: String },
}

/// Result type alias for Trawl operations
pub type Result<T> = std::result::Result<T, TrawlError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL template rendering
pub type BuildResult<T> = std::result::Result<T, BuildError>;

// Re-export commonly used types
pub use config::{Settings, SiteDescription};
pub use crawler::{CrawlOptions, Crawler, FetchSession};
pub use state::{DedupStore, PaginationCursor};
