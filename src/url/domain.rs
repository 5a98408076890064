use url::Url;

/// Strips a single leading "www." from a host
pub fn strip_www(host: &str) -> &str {
    host.strip_prefix("www.").unwrap_or(host)
}

/// Extracts the site domain from a URL
///
/// The host is lowercased and a leading "www." removed, which is the form
/// site descriptions declare their `domain` in.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use trawl::url::site_domain;
///
/// let url = Url::parse("https://WWW.Example.com/path").unwrap();
/// assert_eq!(site_domain(&url), Some("example.com".to_string()));
/// ```
pub fn site_domain(url: &Url) -> Option<String> {
    url.host_str()
        .map(|h| h.to_lowercase())
        .map(|h| strip_www(&h).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_site_domain_simple() {
        let url = Url::parse("https://example.com/").unwrap();
        assert_eq!(site_domain(&url), Some("example.com".to_string()));
    }

    #[test]
    fn test_site_domain_strips_www_only_once() {
        let url = Url::parse("https://www.www.example.com/").unwrap();
        assert_eq!(site_domain(&url), Some("www.example.com".to_string()));
    }

    #[test]
    fn test_site_domain_keeps_other_subdomains() {
        let url = Url::parse("https://cdn.example.com/").unwrap();
        assert_eq!(site_domain(&url), Some("cdn.example.com".to_string()));
    }

    #[test]
    fn test_site_domain_ignores_port() {
        let url = Url::parse("http://example.com:8080/").unwrap();
        assert_eq!(site_domain(&url), Some("example.com".to_string()));
    }

    #[test]
    fn test_strip_www() {
        assert_eq!(strip_www("www.example.com"), "example.com");
        assert_eq!(strip_www("example.com"), "example.com");
    }
}
