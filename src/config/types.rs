use crate::extract::{FieldMap, SelectorList, SelectorPath};
use crate::url::{EncodingRule, UrlTemplate};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Global settings shared by every site
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Settings {
    /// Pool of user agents; one is picked at random per target
    pub user_agents: Vec<String>,

    /// Extra request headers sent with every fetch and download
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Newline-delimited file of item URLs already handled
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,

    /// Directory holding one TOML description per site
    #[serde(default = "default_site_dir")]
    pub site_dir: PathBuf,

    /// Write a metadata sidecar next to each artifact
    #[serde(default)]
    pub make_sidecar: bool,

    /// Exact-case renderings applied to titles, actors, studios and tags
    #[serde(default)]
    pub case_overrides: Vec<String>,

    /// Exact-case renderings applied to tags only
    #[serde(default)]
    pub tag_case_overrides: Vec<String>,

    /// Items mentioning any of these terms are skipped
    #[serde(default)]
    pub ignored: Vec<String>,

    #[serde(default)]
    pub sleep: SleepConfig,

    #[serde(default)]
    pub file_naming: FileNamingConfig,

    pub destination: DestinationConfig,

    #[serde(default)]
    pub validation: ValidationConfig,

    #[serde(default)]
    pub http: HttpConfig,
}

fn default_state_file() -> PathBuf {
    PathBuf::from(".state")
}

fn default_site_dir() -> PathBuf {
    PathBuf::from("sites")
}

/// Politeness delays, in seconds
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SleepConfig {
    #[serde(default = "default_page_delay")]
    pub between_pages: f64,
    #[serde(default = "default_item_delay")]
    pub between_items: f64,
}

fn default_page_delay() -> f64 {
    2.0
}

fn default_item_delay() -> f64 {
    1.0
}

impl Default for SleepConfig {
    fn default() -> Self {
        Self {
            between_pages: default_page_delay(),
            between_items: default_item_delay(),
        }
    }
}

impl SleepConfig {
    pub fn page_delay(&self) -> Duration {
        Duration::from_secs_f64(self.between_pages.max(0.0))
    }

    pub fn item_delay(&self) -> Duration {
        Duration::from_secs_f64(self.between_items.max(0.0))
    }
}

/// Output filename rules
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FileNamingConfig {
    #[serde(default = "default_extension")]
    pub extension: String,

    #[serde(default = "default_invalid_chars")]
    pub invalid_chars: Vec<char>,

    /// Character budget for the whole filename (capped at 255)
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,

    /// Append a random `_xxxxxx` suffix to every filename
    #[serde(default)]
    pub unique_suffix: bool,
}

fn default_extension() -> String {
    ".mp4".to_string()
}

fn default_invalid_chars() -> Vec<char> {
    vec!['/', '\\', ':', '*', '?', '"', '<', '>', '|']
}

fn default_max_chars() -> usize {
    255
}

impl Default for FileNamingConfig {
    fn default() -> Self {
        Self {
            extension: default_extension(),
            invalid_chars: default_invalid_chars(),
            max_chars: default_max_chars(),
            unique_suffix: false,
        }
    }
}

/// Local destination for finished artifacts
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DestinationConfig {
    pub path: PathBuf,

    /// Where downloads land before being moved into `path`
    #[serde(default)]
    pub staging: Option<PathBuf>,

    #[serde(default)]
    pub permissions: Option<PermissionPolicy>,
}

/// Ownership and mode applied to committed files
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PermissionPolicy {
    #[serde(default)]
    pub uid: Option<u32>,
    #[serde(default)]
    pub gid: Option<u32>,
    /// Octal mode string such as "644"
    #[serde(default)]
    pub mode: Option<String>,
}

/// Artifact sanity checks
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ValidationConfig {
    #[serde(default = "default_min_bytes_per_second")]
    pub min_bytes_per_second: u64,
}

fn default_min_bytes_per_second() -> u64 {
    10 * 1024
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_bytes_per_second: default_min_bytes_per_second(),
        }
    }
}

/// HTTP client timeouts, in seconds
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HttpConfig {
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

/// Declarative description of one site
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SiteDescription {
    pub name: String,

    /// Short identifier usable on the command line
    pub shortcode: String,

    /// Host without a leading "www."
    pub domain: String,

    pub base_url: Url,

    /// Fetch pages with the rendering capability
    #[serde(default)]
    pub use_browser: bool,

    /// Discover streaming manifests from rendered network traffic
    #[serde(default)]
    pub stream_discovery: bool,

    #[serde(default)]
    pub name_prefix: String,

    #[serde(default)]
    pub name_suffix: String,

    /// Append a random `_xxxxxx` suffix to this site's filenames
    #[serde(default)]
    pub unique_name: bool,

    /// Site-wide encoding rules, used when a mode declares none
    #[serde(default)]
    pub url_encoding_rules: Vec<EncodingRule>,

    #[serde(default)]
    pub download: DownloadConfig,

    /// Routes, in declaration order
    pub modes: Vec<ModeConfig>,

    #[serde(default)]
    pub scrapers: Scrapers,
}

/// What a mode's pages contain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModeKind {
    /// A single item page
    Item,
    /// A syndication feed
    Feed,
    /// A paginated listing of items
    #[default]
    List,
}

/// A named route
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ModeConfig {
    pub name: String,

    #[serde(default)]
    pub kind: ModeKind,

    /// Template for the first page
    pub url: UrlTemplate,

    /// Template for page two onward
    #[serde(default)]
    pub url_paged: Option<UrlTemplate>,

    #[serde(default)]
    pub max_pages: Option<u32>,

    #[serde(default)]
    pub url_encoding_rules: Option<Vec<EncodingRule>>,
}

/// How item artifacts are retrieved
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DownloadMethod {
    /// Streaming HTTP fetch
    #[serde(alias = "requests")]
    Http,
    #[default]
    Curl,
    Wget,
    YtDlp,
    /// Segmented stream remux
    Ffmpeg,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DownloadConfig {
    #[serde(default)]
    pub method: DownloadMethod,

    /// `Origin` header for segmented-stream fetches
    #[serde(default)]
    pub origin: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Scrapers {
    #[serde(default)]
    pub item: Option<ItemScraper>,
    #[serde(default)]
    pub feed: Option<ItemScraper>,
    #[serde(default)]
    pub list: Option<ListScraper>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemScraper {
    #[serde(default)]
    pub fields: FieldMap,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ListScraper {
    /// Candidate container selectors; the first that matches wins
    pub container: SelectorList,

    /// Item elements inside the container
    pub item: SelectorPath,

    #[serde(default)]
    pub fields: FieldMap,

    #[serde(default)]
    pub pagination: PaginationConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PaginationConfig {
    #[serde(default)]
    pub next_page: Option<NextPageConfig>,

    /// Page cap for modes that declare none
    #[serde(default)]
    pub max_pages: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NextPageConfig {
    pub selector: SelectorPath,
    #[serde(default = "default_next_attribute")]
    pub attribute: String,
}

fn default_next_attribute() -> String {
    "href".to_string()
}

/// Item fields that do not count as metadata for sidecar purposes
const NON_METADATA_FIELDS: [&str; 3] = ["title", "download_url", "image"];

impl SiteDescription {
    pub fn mode(&self, name: &str) -> Option<&ModeConfig> {
        self.modes.iter().find(|m| m.name.eq_ignore_ascii_case(name))
    }

    /// The designated single-item mode
    pub fn leaf_mode(&self) -> Option<&ModeConfig> {
        self.modes.iter().find(|m| m.kind == ModeKind::Item)
    }

    /// The mode's encoding rules, or the site-wide ones
    pub fn encoding_rules<'s>(&'s self, mode: &'s ModeConfig) -> &'s [EncodingRule] {
        mode.url_encoding_rules
            .as_deref()
            .unwrap_or(self.url_encoding_rules.as_slice())
    }

    /// Page cap for a mode: the mode's own, else the list pagination cap
    pub fn max_pages(&self, mode: &ModeConfig) -> Option<u32> {
        mode.max_pages.or_else(|| {
            self.scrapers
                .list
                .as_ref()
                .and_then(|l| l.pagination.max_pages)
        })
    }

    /// True if the item scraper extracts anything worth a sidecar
    pub fn has_metadata_fields(&self) -> bool {
        self.scrapers.item.as_ref().map_or(false, |item| {
            item.fields
                .keys()
                .any(|k| !NON_METADATA_FIELDS.contains(&k.as_str()))
        })
    }

    /// Matches a command-line identifier against shortcode, name or domain
    pub fn matches_identifier(&self, identifier: &str) -> bool {
        let id = identifier.trim();
        self.shortcode.eq_ignore_ascii_case(id)
            || self.name.eq_ignore_ascii_case(id)
            || self.domain.eq_ignore_ascii_case(id)
    }
}
