//! Configuration module for Trawl
//!
//! This module handles loading, parsing, and validating the TOML settings
//! file and the per-site description files.
//!
//! # Example
//!
//! ```no_run
//! use trawl::config::{load_settings, SiteRegistry};
//! use std::path::Path;
//!
//! let settings = load_settings(Path::new("trawl.toml")).unwrap();
//! let sites = SiteRegistry::load_dir(&settings.site_dir).unwrap();
//! println!("{} sites available", sites.sites().len());
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    DestinationConfig, DownloadConfig, DownloadMethod, FileNamingConfig, HttpConfig,
    ItemScraper, ListScraper, ModeConfig, ModeKind, NextPageConfig, PaginationConfig,
    PermissionPolicy, Scrapers, Settings, SiteDescription, SleepConfig, ValidationConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_settings, load_site, SiteRegistry};
pub use validation::parse_mode;
