use crate::config::types::{Settings, SiteDescription};
use crate::config::validation::{validate_settings, validate_site};
use crate::url::{is_url, site_domain};
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use url::Url;

impl Settings {
    /// Parses and validates settings from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(content)?;
        validate_settings(&settings)?;
        Ok(settings)
    }
}

impl SiteDescription {
    /// Parses and validates a site description from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let site: SiteDescription = toml::from_str(content)?;
        validate_site(&site)?;
        Ok(site)
    }
}

/// Loads the settings file
///
/// Relative `state-file`, `site-dir` and destination paths are resolved
/// against the directory holding the settings file.
///
/// # Arguments
///
/// * `path` - Path to the TOML settings file
///
/// # Returns
///
/// * `Ok(Settings)` - Successfully loaded and validated settings
/// * `Err(ConfigError)` - Failed to load, parse, or validate the settings
pub fn load_settings(path: &Path) -> Result<Settings, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut settings = Settings::from_toml(&content)?;

    let root = path.parent().unwrap_or_else(|| Path::new("."));
    settings.state_file = anchor(root, &settings.state_file);
    settings.site_dir = anchor(root, &settings.site_dir);
    settings.destination.path = anchor(root, &settings.destination.path);
    settings.destination.staging = settings
        .destination
        .staging
        .as_ref()
        .map(|p| anchor(root, p));

    Ok(settings)
}

fn anchor(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

/// Loads one site description file
pub fn load_site(path: &Path) -> Result<SiteDescription, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    SiteDescription::from_toml(&content)
        .map_err(|e| ConfigError::Validation(format!("{}: {}", path.display(), e)))
}

/// Computes a SHA-256 hash of a configuration file's content
///
/// Logged next to each site description so a changed file is easy to spot
/// when diagnosing a broken crawl.
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let result = hasher.finalize();
    Ok(hex::encode(result))
}

/// Every site description found in the site directory
#[derive(Debug, Clone, Default)]
pub struct SiteRegistry {
    sites: Vec<SiteDescription>,
}

impl SiteRegistry {
    pub fn new(sites: Vec<SiteDescription>) -> Self {
        Self { sites }
    }

    /// Loads every `*.toml` file in `dir`, in filename order
    ///
    /// A malformed description is a fatal error: it would otherwise surface
    /// mid-run as a silently skipped site.
    pub fn load_dir(dir: &Path) -> Result<Self, ConfigError> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().map_or(false, |ext| ext == "toml"))
            .collect();
        paths.sort();

        let mut sites = Vec::with_capacity(paths.len());
        for path in paths {
            let site = load_site(&path)?;
            let hash = compute_config_hash(&path)?;
            tracing::debug!(
                "Loaded site '{}' from {} (hash: {})",
                site.name,
                path.display(),
                hash
            );
            sites.push(site);
        }

        tracing::info!("Loaded {} site descriptions from {}", sites.len(), dir.display());
        Ok(Self { sites })
    }

    pub fn sites(&self) -> &[SiteDescription] {
        &self.sites
    }

    /// Finds the site whose domain matches the URL's host
    pub fn find_by_url(&self, url: &str) -> Option<&SiteDescription> {
        let parsed = Url::parse(url).ok()?;
        let domain = site_domain(&parsed)?;
        self.sites
            .iter()
            .find(|s| s.domain.trim_start_matches("www.").eq_ignore_ascii_case(&domain))
    }

    /// Finds a site by shortcode, name or domain
    pub fn find_by_identifier(&self, identifier: &str) -> Option<&SiteDescription> {
        self.sites.iter().find(|s| s.matches_identifier(identifier))
    }

    /// Resolves a command-line target: URLs by host, anything else by identifier
    pub fn resolve(&self, target: &str) -> Option<&SiteDescription> {
        if is_url(target) {
            self.find_by_url(target)
        } else {
            self.find_by_identifier(target)
        }
    }
}
