//! Route matching: picks the site mode whose URL template best fits a URL
//!
//! Every non-item mode's primary and paged templates are compiled into an
//! anchored, case-insensitive regex. When several match, the one with more
//! literal segments wins, then the one with more literal characters, much
//! like longest-prefix routing. The item mode is only consulted when no
//! other mode matched.

use crate::config::{ModeKind, SiteDescription};
use crate::url::template::{Bindings, Segment, UrlTemplate, PAGE_FIELD};
use crate::url::strip_www;
use crate::{ConfigError, ConfigResult};
use regex::Regex;
use url::Url;

/// Ranking of a compiled route; higher wins
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Specificity {
    /// Number of literal segments in the template
    pub literal_segments: usize,
    /// Total number of literal characters in the template
    pub literal_chars: usize,
}

/// Result of a successful route match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
    pub mode: String,
    pub bindings: Bindings,
    pub specificity: Specificity,
}

#[derive(Debug)]
struct CompiledRoute {
    mode: String,
    regex: Regex,
    names: Vec<String>,
    specificity: Specificity,
}

impl CompiledRoute {
    fn compile(mode: &str, template: &UrlTemplate) -> ConfigResult<Self> {
        let raw = template.raw();
        let trimmed = UrlTemplate::parse(raw.trim_end_matches('/'))
            .map_err(|e| ConfigError::InvalidTemplate(e.to_string()))?;

        let mut pattern = String::from("(?i)^");
        let mut names = Vec::new();
        let mut specificity = Specificity {
            literal_segments: 0,
            literal_chars: 0,
        };

        for segment in trimmed.segments() {
            match segment {
                Segment::Literal(text) => {
                    specificity.literal_segments += 1;
                    specificity.literal_chars += text.chars().count();
                    pattern.push_str(&regex::escape(text));
                }
                Segment::Placeholder(name) if name == PAGE_FIELD => {
                    pattern.push_str(r"(\d+)");
                    names.push(name.clone());
                }
                Segment::Offset { name, .. } => {
                    pattern.push_str(r"(\d+)");
                    names.push(name.clone());
                }
                Segment::Placeholder(name) => {
                    pattern.push_str(r"([^/?&#]+)");
                    names.push(name.clone());
                }
            }
        }

        if raw.contains('?') || raw.contains('&') {
            pattern.push_str("(?:$|&.*)");
        } else {
            pattern.push('$');
        }

        let regex = Regex::new(&pattern).map_err(|e| {
            ConfigError::InvalidTemplate(format!("'{}' for mode '{}': {}", raw, mode, e))
        })?;

        Ok(Self {
            mode: mode.to_string(),
            regex,
            names,
            specificity,
        })
    }

    fn capture(&self, target: &str) -> Option<Bindings> {
        let caps = self.regex.captures(target)?;
        let mut bindings = Bindings::new();
        for (i, name) in self.names.iter().enumerate() {
            if let Some(m) = caps.get(i + 1) {
                if bindings.get(name).is_none() {
                    let value = urlencoding::decode(m.as_str())
                        .map(|v| v.into_owned())
                        .unwrap_or_else(|_| m.as_str().to_string());
                    bindings.set(name, value);
                }
            }
        }
        Some(bindings)
    }
}

/// Compiled route table for one site
#[derive(Debug)]
pub struct RouteMatcher {
    host: String,
    routes: Vec<CompiledRoute>,
    leaf: Vec<CompiledRoute>,
}

impl RouteMatcher {
    /// Compiles every mode template of a site
    pub fn new(site: &SiteDescription) -> ConfigResult<Self> {
        let host = site
            .base_url
            .host_str()
            .map(|h| strip_www(&h.to_lowercase()).to_string())
            .ok_or_else(|| ConfigError::InvalidUrl(format!("{} has no host", site.base_url)))?;

        let mut routes = Vec::new();
        let mut leaf = Vec::new();

        for mode in &site.modes {
            let target = if mode.kind == ModeKind::Item {
                &mut leaf
            } else {
                &mut routes
            };
            target.push(CompiledRoute::compile(&mode.name, &mode.url)?);
            if let Some(paged) = &mode.url_paged {
                target.push(CompiledRoute::compile(&mode.name, paged)?);
            }
        }

        Ok(Self { host, routes, leaf })
    }

    /// Finds the most specific mode for a URL
    ///
    /// Returns `None` when the URL is unparseable, belongs to another host,
    /// or fits no template.
    pub fn match_url(&self, url: &str) -> Option<RouteMatch> {
        let parsed = Url::parse(url).ok()?;
        let host = parsed.host_str()?.to_lowercase();
        if strip_www(&host) != self.host {
            tracing::debug!("Host {} does not belong to {}", host, self.host);
            return None;
        }

        // Literals match case-insensitively through the regex; captures keep the path's case
        let mut target = parsed.path().trim_end_matches('/').to_string();
        if let Some(query) = parsed.query().filter(|q| !q.is_empty()) {
            target.push('?');
            target.push_str(&query.to_lowercase());
        }

        best_match(&self.routes, &target).or_else(|| best_match(&self.leaf, &target))
    }
}

fn best_match(routes: &[CompiledRoute], target: &str) -> Option<RouteMatch> {
    let mut best: Option<RouteMatch> = None;

    for route in routes {
        let Some(bindings) = route.capture(target) else {
            continue;
        };
        tracing::trace!(
            "Route '{}' matched {} ({:?})",
            route.mode,
            target,
            route.specificity
        );
        let better = best
            .as_ref()
            .map_or(true, |b| route.specificity > b.specificity);
        if better {
            best = Some(RouteMatch {
                mode: route.mode.clone(),
                bindings,
                specificity: route.specificity,
            });
        }
    }

    best
}
