//! Declarative field selectors
//!
//! Site descriptions write selectors in a few shorthand shapes (a CSS path,
//! a list of candidate paths, or a table with `attribute`, `iframe` and
//! `postprocess` keys). They are normalized into the closed [`FieldSelector`]
//! variant at load time, with CSS selectors and regexes already compiled.

use crate::{ConfigError, ConfigResult};
use regex::Regex;
use scraper::{ElementRef, Selector};
use serde::Deserialize;
use std::collections::BTreeMap;

/// Field name to selector map for one scraper
pub type FieldMap = BTreeMap<String, FieldSpec>;

/// One compiled selector path
#[derive(Debug, Clone)]
pub enum SelectorPath {
    /// A regular CSS selector
    Css { source: String, selector: Selector },
    /// A namespaced tag written `ns|tag`, matched by its qualified name `ns:tag`
    Qualified { source: String, tag: String },
}

impl SelectorPath {
    /// Compiles a selector path
    ///
    /// `content|encoded` becomes a qualified-name match on `content:encoded`;
    /// anything else must be valid CSS.
    pub fn parse(source: &str) -> ConfigResult<Self> {
        let source = source.trim();
        if source.is_empty() {
            return Err(ConfigError::InvalidSelector("empty selector".to_string()));
        }

        if let Some((ns, tag)) = source.split_once('|') {
            let simple = |s: &str| {
                !s.is_empty()
                    && s.chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            };
            if simple(ns) && simple(tag) {
                return Ok(Self::Qualified {
                    source: source.to_string(),
                    tag: format!("{}:{}", ns, tag).to_lowercase(),
                });
            }
        }

        let selector = Selector::parse(source)
            .map_err(|e| ConfigError::InvalidSelector(format!("'{}': {:?}", source, e)))?;
        Ok(Self::Css {
            source: source.to_string(),
            selector,
        })
    }

    pub fn source(&self) -> &str {
        match self {
            Self::Css { source, .. } | Self::Qualified { source, .. } => source,
        }
    }

    /// Selects matching descendants of `scope` in document order
    pub fn select<'a>(&self, scope: ElementRef<'a>) -> Vec<ElementRef<'a>> {
        match self {
            Self::Css { selector, .. } => scope.select(selector).collect(),
            Self::Qualified { tag, .. } => scope
                .descendants()
                .skip(1)
                .filter_map(ElementRef::wrap)
                .filter(|el| el.value().name().eq_ignore_ascii_case(tag))
                .collect(),
        }
    }
}

impl TryFrom<String> for SelectorPath {
    type Error = ConfigError;

    fn try_from(source: String) -> Result<Self, Self::Error> {
        SelectorPath::parse(&source)
    }
}

impl<'de> Deserialize<'de> for SelectorPath {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let source = String::deserialize(deserializer)?;
        SelectorPath::parse(&source).map_err(serde::de::Error::custom)
    }
}

/// Ordered candidate selectors; the first one that matches anything wins
#[derive(Debug, Clone)]
pub struct SelectorList(pub Vec<SelectorPath>);

impl SelectorList {
    /// Returns the elements of the first candidate that matches
    pub fn select_first<'a>(&self, scope: ElementRef<'a>) -> Vec<ElementRef<'a>> {
        for path in &self.0 {
            let found = path.select(scope);
            if !found.is_empty() {
                return found;
            }
        }
        Vec::new()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn describe(&self) -> String {
        self.0
            .iter()
            .map(SelectorPath::source)
            .collect::<Vec<_>>()
            .join(" | ")
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(s) => vec![s],
            Self::Many(v) => v,
        }
    }
}

fn compile_list(sources: Vec<String>) -> ConfigResult<SelectorList> {
    sources
        .iter()
        .map(|s| SelectorPath::parse(s))
        .collect::<ConfigResult<Vec<_>>>()
        .map(SelectorList)
}

impl<'de> Deserialize<'de> for SelectorList {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = OneOrMany::deserialize(deserializer)?;
        compile_list(raw.into_vec()).map_err(serde::de::Error::custom)
    }
}

/// Where a field's value comes from
#[derive(Debug, Clone)]
pub enum FieldSelector {
    /// Text content of the first candidate path that matches
    Css(SelectorList),
    /// Attribute values of the matched elements; with no paths, the scope
    /// element itself is inspected
    Attribute {
        paths: SelectorList,
        attribute: String,
    },
    /// Re-query inside the document of an iframe found by `frame`
    Iframe {
        frame: SelectorPath,
        inner: SelectorList,
        attribute: Option<String>,
    },
}

impl FieldSelector {
    /// The attribute read instead of text content, if any
    pub fn attribute(&self) -> Option<&str> {
        match self {
            Self::Css(_) => None,
            Self::Attribute { attribute, .. } => Some(attribute),
            Self::Iframe { attribute, .. } => attribute.as_deref(),
        }
    }
}

/// How attribute values compare in [`PostProcess::MaxAttribute`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeKind {
    Int,
    Float,
    #[default]
    #[serde(alias = "string")]
    Str,
}

/// A compiled regex and its replacement (`$1` style group references)
#[derive(Debug, Clone)]
pub struct Replacement {
    pub pattern: Regex,
    pub with: String,
}

/// Post-processing step run on an extracted value
#[derive(Debug, Clone)]
pub enum PostProcess {
    /// Regex replacements (dot matches newline) applied in order
    Replace(Vec<Replacement>),
    /// Keep the value whose element has the highest `attribute`
    MaxAttribute {
        attribute: String,
        kind: AttributeKind,
    },
    /// Collapse a list to its first element
    TakeFirst,
}

/// A field's selector and its post-processing steps
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawField")]
pub struct FieldSpec {
    pub selector: FieldSelector,
    pub steps: Vec<PostProcess>,
}

impl FieldSpec {
    /// A plain CSS field with no post-processing
    pub fn css(source: &str) -> ConfigResult<Self> {
        Ok(Self {
            selector: FieldSelector::Css(compile_list(vec![source.to_string()])?),
            steps: Vec::new(),
        })
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawField {
    Paths(OneOrMany),
    Table(RawFieldTable),
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RawFieldTable {
    selector: Option<OneOrMany>,
    attribute: Option<String>,
    iframe: Option<String>,
    #[serde(default)]
    postprocess: Vec<RawStep>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawStep {
    Replace {
        replace: Vec<RawReplacement>,
    },
    MaxAttribute {
        #[serde(rename = "max-attribute")]
        max_attribute: RawMaxAttribute,
    },
    First {
        first: bool,
    },
}

#[derive(Deserialize)]
struct RawReplacement {
    regex: String,
    #[serde(default)]
    with: String,
}

#[derive(Deserialize)]
struct RawMaxAttribute {
    attribute: String,
    #[serde(rename = "type", default)]
    kind: AttributeKind,
}

impl TryFrom<RawField> for FieldSpec {
    type Error = ConfigError;

    fn try_from(raw: RawField) -> Result<Self, Self::Error> {
        let table = match raw {
            RawField::Paths(paths) => {
                let list = compile_list(paths.into_vec())?;
                if list.is_empty() {
                    return Err(ConfigError::InvalidSelector(
                        "empty selector list".to_string(),
                    ));
                }
                return Ok(Self {
                    selector: FieldSelector::Css(list),
                    steps: Vec::new(),
                });
            }
            RawField::Table(table) => table,
        };

        let paths = compile_list(table.selector.map(OneOrMany::into_vec).unwrap_or_default())?;

        let selector = match (table.iframe, table.attribute) {
            (Some(frame), attribute) => {
                if paths.is_empty() {
                    return Err(ConfigError::InvalidSelector(format!(
                        "iframe field '{}' needs an inner selector",
                        frame
                    )));
                }
                FieldSelector::Iframe {
                    frame: SelectorPath::parse(&frame)?,
                    inner: paths,
                    attribute,
                }
            }
            (None, Some(attribute)) => FieldSelector::Attribute { paths, attribute },
            (None, None) => {
                if paths.is_empty() {
                    return Err(ConfigError::InvalidSelector(
                        "field table needs a selector, attribute or iframe".to_string(),
                    ));
                }
                FieldSelector::Css(paths)
            }
        };

        let steps = table
            .postprocess
            .into_iter()
            .filter_map(|step| match step {
                RawStep::Replace { replace } => Some(compile_replacements(replace)),
                RawStep::MaxAttribute { max_attribute } => Some(Ok(PostProcess::MaxAttribute {
                    attribute: max_attribute.attribute,
                    kind: max_attribute.kind,
                })),
                RawStep::First { first: true } => Some(Ok(PostProcess::TakeFirst)),
                RawStep::First { first: false } => None,
            })
            .collect::<ConfigResult<Vec<_>>>()?;

        Ok(Self { selector, steps })
    }
}

fn compile_replacements(raw: Vec<RawReplacement>) -> ConfigResult<PostProcess> {
    raw.into_iter()
        .map(|r| {
            Regex::new(&format!("(?s){}", r.regex))
                .map(|pattern| Replacement {
                    pattern,
                    with: r.with,
                })
                .map_err(|e| ConfigError::InvalidRegex(format!("'{}': {}", r.regex, e)))
        })
        .collect::<ConfigResult<Vec<_>>>()
        .map(PostProcess::Replace)
}
