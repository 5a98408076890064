//! URL template grammar and rendering
//!
//! A template such as `/search/{query}/{page}` is compiled once into a
//! sequence of literal and placeholder segments. The pagination field may
//! also appear with an integer offset (`{page - 1}`, `{page + 2}`).

use crate::{BuildError, BuildResult};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use url::Url;

/// Name of the reserved pagination field
pub const PAGE_FIELD: &str = "page";

/// One piece of a compiled template
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Text copied verbatim
    Literal(String),
    /// A named placeholder, e.g. `{query}`
    Placeholder(String),
    /// The pagination field shifted by a constant, e.g. `{page - 1}`
    Offset { name: String, delta: i64 },
}

/// An ordered string substitution applied to bound values before rendering
///
/// Deserializes from a two-element array: `[" ", "+"]`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EncodingRule(pub String, pub String);

impl EncodingRule {
    pub fn new(from: &str, to: &str) -> Self {
        Self(from.to_string(), to.to_string())
    }
}

/// Applies encoding rules to a value in declaration order
pub fn apply_rules(value: &str, rules: &[EncodingRule]) -> String {
    rules
        .iter()
        .fold(value.to_string(), |acc, EncodingRule(from, to)| {
            if from.is_empty() {
                acc
            } else {
                acc.replace(from.as_str(), to)
            }
        })
}

/// Field name to value map used when rendering templates
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bindings(HashMap<String, String>);

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.0.insert(name.to_string(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.0.remove(name)
    }

    /// The bound page number, if any
    pub fn page(&self) -> Option<u32> {
        self.get(PAGE_FIELD).and_then(|p| p.trim().parse().ok())
    }

    pub fn set_page(&mut self, page: u32) {
        self.set(PAGE_FIELD, page.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Copies every binding from `other` that is not already set here
    pub fn extend_missing(&mut self, other: &Bindings) {
        for (name, value) in &other.0 {
            self.0.entry(name.clone()).or_insert_with(|| value.clone());
        }
    }
}

/// A compiled URL template
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct UrlTemplate {
    raw: String,
    segments: Vec<Segment>,
}

impl UrlTemplate {
    /// Compiles a template string
    ///
    /// # Errors
    ///
    /// Returns `BuildError::InvalidTemplate` for an unclosed or empty placeholder.
    ///
    /// # Examples
    ///
    /// ```
    /// use trawl::url::{Segment, UrlTemplate};
    ///
    /// let template = UrlTemplate::parse("/page/{page - 1}").unwrap();
    /// assert_eq!(
    ///     template.segments()[1],
    ///     Segment::Offset { name: "page".to_string(), delta: -1 }
    /// );
    /// ```
    pub fn parse(raw: &str) -> BuildResult<Self> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = raw.chars();

        while let Some(c) = chars.next() {
            if c != '{' {
                literal.push(c);
                continue;
            }

            let mut inner = String::new();
            let mut closed = false;
            for c in chars.by_ref() {
                if c == '}' {
                    closed = true;
                    break;
                }
                inner.push(c);
            }
            if !closed {
                return Err(BuildError::InvalidTemplate(format!(
                    "unclosed placeholder in '{}'",
                    raw
                )));
            }

            let inner = inner.trim();
            if inner.is_empty() {
                return Err(BuildError::InvalidTemplate(format!(
                    "empty placeholder in '{}'",
                    raw
                )));
            }

            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(parse_placeholder(inner));
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Returns true if any segment refers to the pagination field
    pub fn is_paged(&self) -> bool {
        self.segments.iter().any(|s| match s {
            Segment::Placeholder(name) => name == PAGE_FIELD,
            Segment::Offset { .. } => true,
            Segment::Literal(_) => false,
        })
    }

    /// Renders the template against a binding map
    ///
    /// Offset placeholders evaluate to the shifted page number, or vanish
    /// when the page is unbound. Every other placeholder must be bound; its
    /// value passes through `rules` first (the page number never does).
    pub fn render(&self, bindings: &Bindings, rules: &[EncodingRule]) -> BuildResult<String> {
        let mut out = String::with_capacity(self.raw.len());

        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Offset { name, delta } => {
                    if let Some(value) = bindings.get(name) {
                        match value.trim().parse::<i64>().ok().and_then(|n| n.checked_add(*delta)) {
                            Some(n) => out.push_str(&n.to_string()),
                            None => out.push_str(value),
                        }
                    }
                }
                Segment::Placeholder(name) => {
                    let value = bindings
                        .get(name)
                        .ok_or_else(|| BuildError::Unbound(name.clone()))?;
                    if name == PAGE_FIELD {
                        out.push_str(value);
                    } else {
                        out.push_str(&apply_rules(value, rules));
                    }
                }
            }
        }

        Ok(out)
    }
}

impl TryFrom<String> for UrlTemplate {
    type Error = BuildError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        UrlTemplate::parse(&raw)
    }
}

impl fmt::Display for UrlTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn parse_placeholder(inner: &str) -> Segment {
    if let Some(pos) = inner.find(&['+', '-'][..]) {
        let name = inner[..pos].trim();
        let sign = if &inner[pos..pos + 1] == "-" { -1 } else { 1 };
        if name == PAGE_FIELD {
            if let Ok(n) = inner[pos + 1..].trim().parse::<i64>() {
                return Segment::Offset {
                    name: name.to_string(),
                    delta: sign * n,
                };
            }
        }
    }
    Segment::Placeholder(inner.to_string())
}

/// Renders a template and resolves the result against the site's base URL
pub fn build_url(
    base: &Url,
    template: &UrlTemplate,
    bindings: &Bindings,
    rules: &[EncodingRule],
) -> BuildResult<String> {
    let path = template.render(bindings, rules)?;
    base.join(&path)
        .map(|u| u.to_string())
        .map_err(|e| BuildError::Join {
            path,
            message: e.to_string(),
        })
}
