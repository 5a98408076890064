use crate::config::types::{
    FileNamingConfig, ModeKind, PermissionPolicy, Settings, SiteDescription,
};
use crate::ConfigError;
use std::collections::HashSet;

/// Validates the global settings
pub fn validate_settings(settings: &Settings) -> Result<(), ConfigError> {
    validate_user_agents(&settings.user_agents)?;
    validate_file_naming(&settings.file_naming)?;

    if settings.destination.path.as_os_str().is_empty() {
        return Err(ConfigError::Validation(
            "destination path cannot be empty".to_string(),
        ));
    }

    if let Some(policy) = &settings.destination.permissions {
        validate_permissions(policy)?;
    }

    if settings.sleep.between_pages < 0.0 || settings.sleep.between_items < 0.0 {
        return Err(ConfigError::Validation(format!(
            "sleep delays must be >= 0, got {} / {}",
            settings.sleep.between_pages, settings.sleep.between_items
        )));
    }

    Ok(())
}

fn validate_user_agents(agents: &[String]) -> Result<(), ConfigError> {
    if agents.is_empty() || agents.iter().any(|ua| ua.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "user-agents must list at least one non-empty user agent".to_string(),
        ));
    }
    Ok(())
}

fn validate_file_naming(naming: &FileNamingConfig) -> Result<(), ConfigError> {
    if naming.max_chars < 1 {
        return Err(ConfigError::Validation(format!(
            "file-naming max-chars must be >= 1, got {}",
            naming.max_chars
        )));
    }

    if naming.extension.contains('/') {
        return Err(ConfigError::Validation(format!(
            "file-naming extension cannot contain '/', got '{}'",
            naming.extension
        )));
    }

    Ok(())
}

/// Parses an octal mode string such as "644" or "0o755"
pub fn parse_mode(mode: &str) -> Result<u32, ConfigError> {
    let digits = mode.trim().trim_start_matches("0o");
    u32::from_str_radix(digits, 8)
        .ok()
        .filter(|m| *m <= 0o7777)
        .ok_or_else(|| ConfigError::Validation(format!("invalid octal mode '{}'", mode)))
}

fn validate_permissions(policy: &PermissionPolicy) -> Result<(), ConfigError> {
    if let Some(mode) = &policy.mode {
        parse_mode(mode)?;
    }
    Ok(())
}

/// Validates a site description
pub fn validate_site(site: &SiteDescription) -> Result<(), ConfigError> {
    if site.name.trim().is_empty() {
        return Err(ConfigError::Validation(
            "site name cannot be empty".to_string(),
        ));
    }

    if site.domain.trim().is_empty() {
        return Err(ConfigError::Validation(format!(
            "site '{}' must declare a domain",
            site.name
        )));
    }

    if !matches!(site.base_url.scheme(), "http" | "https") || site.base_url.host_str().is_none() {
        return Err(ConfigError::InvalidUrl(format!(
            "site '{}' base-url must be an http(s) URL with a host, got '{}'",
            site.name, site.base_url
        )));
    }

    validate_modes(site)
}

fn validate_modes(site: &SiteDescription) -> Result<(), ConfigError> {
    if site.modes.is_empty() {
        return Err(ConfigError::Validation(format!(
            "site '{}' must declare at least one mode",
            site.name
        )));
    }

    let mut names = HashSet::new();
    let mut item_modes = 0;

    for mode in &site.modes {
        if !names.insert(mode.name.to_lowercase()) {
            return Err(ConfigError::Validation(format!(
                "site '{}' declares mode '{}' twice",
                site.name, mode.name
            )));
        }

        if mode.max_pages == Some(0) {
            return Err(ConfigError::Validation(format!(
                "mode '{}' max-pages must be >= 1",
                mode.name
            )));
        }

        let scraper_present = match mode.kind {
            ModeKind::Item => {
                item_modes += 1;
                site.scrapers.item.is_some()
            }
            ModeKind::Feed => site.scrapers.feed.is_some(),
            ModeKind::List => site.scrapers.list.is_some(),
        };

        if !scraper_present {
            return Err(ConfigError::Validation(format!(
                "mode '{}' of site '{}' has no {:?} scraper",
                mode.name, site.name, mode.kind
            )));
        }
    }

    if item_modes > 1 {
        return Err(ConfigError::Validation(format!(
            "site '{}' declares {} item modes, at most one is allowed",
            site.name, item_modes
        )));
    }

    if let Some(list) = &site.scrapers.list {
        if list.container.is_empty() {
            return Err(ConfigError::Validation(format!(
                "site '{}' list scraper needs at least one container selector",
                site.name
            )));
        }
        if list.pagination.max_pages == Some(0) {
            return Err(ConfigError::Validation(format!(
                "site '{}' pagination max-pages must be >= 1",
                site.name
            )));
        }
    }

    Ok(())
}
