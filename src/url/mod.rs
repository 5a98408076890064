//! URL handling module for Trawl
//!
//! This module provides URL template compilation and rendering, route
//! matching against a site's modes, and small link helpers shared by the
//! crawler and the extraction pipeline.

mod domain;
mod matcher;
mod template;

use url::Url;

// Re-export main types
pub use domain::{site_domain, strip_www};
pub use matcher::{RouteMatch, RouteMatcher, Specificity};
pub use template::{
    apply_rules, build_url, Bindings, EncodingRule, Segment, UrlTemplate, PAGE_FIELD,
};

/// Returns true if `input` is an absolute HTTP(S) URL with a host
///
/// # Examples
///
/// ```
/// use trawl::url::is_url;
///
/// assert!(is_url("https://example.com/a"));
/// assert!(!is_url("example"));
/// assert!(!is_url("ftp://example.com/file"));
/// ```
pub fn is_url(input: &str) -> bool {
    Url::parse(input)
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
        .unwrap_or(false)
}

/// Resolves an href found on a page to an absolute URL
///
/// Returns None for empty hrefs and for `javascript:`, `mailto:`, `tel:`
/// and `data:` links. Protocol-relative hrefs (`//host/path`) get `http:`.
pub fn resolve_link(href: &str, base_url: &Url) -> Option<String> {
    let href = href.trim();

    if href.is_empty() {
        return None;
    }

    if href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with("data:")
    {
        return None;
    }

    if href.starts_with("//") {
        return Some(format!("http:{}", href));
    }

    if href.starts_with("http://") || href.starts_with("https://") {
        return Some(href.to_string());
    }

    base_url.join(href).ok().map(|u| u.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://example.com/videos/list").unwrap()
    }

    #[test]
    fn test_resolve_relative() {
        assert_eq!(
            resolve_link("/watch/1", &base()),
            Some("https://example.com/watch/1".to_string())
        );
        assert_eq!(
            resolve_link("next", &base()),
            Some("https://example.com/videos/next".to_string())
        );
    }

    #[test]
    fn test_resolve_protocol_relative() {
        assert_eq!(
            resolve_link("//cdn.example.com/a.mp4", &base()),
            Some("http://cdn.example.com/a.mp4".to_string())
        );
    }

    #[test]
    fn test_resolve_absolute_untouched() {
        assert_eq!(
            resolve_link(" https://other.com/x ", &base()),
            Some("https://other.com/x".to_string())
        );
    }

    #[test]
    fn test_resolve_rejects_special_schemes() {
        assert_eq!(resolve_link("javascript:void(0)", &base()), None);
        assert_eq!(resolve_link("mailto:a@b.c", &base()), None);
        assert_eq!(resolve_link("", &base()), None);
    }
}
