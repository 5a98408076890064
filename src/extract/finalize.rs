//! Metadata finalization: cross-field dedup and case normalization

use crate::extract::record::{FieldValue, RawRecord};
use regex::Regex;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::warn;

/// A record ready for download and sidecar generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalRecord {
    pub title: String,
    pub url: String,
    pub actors: Vec<String>,
    pub studios: Vec<String>,
    pub tags: Vec<String>,
    /// Every other extracted field, untouched except `producers` and `studio`
    pub fields: BTreeMap<String, FieldValue>,
}

impl FinalRecord {
    pub fn text(&self, field: &str) -> Option<&str> {
        self.fields
            .get(field)
            .and_then(FieldValue::first)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Case-insensitive term to exact-case rendering
#[derive(Debug, Clone, Default)]
pub struct CaseOverrides(HashMap<String, String>);

impl CaseOverrides {
    pub fn new<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            terms
                .into_iter()
                .map(|t| (t.as_ref().to_lowercase(), t.as_ref().to_string()))
                .collect(),
        )
    }

    pub fn get(&self, term: &str) -> Option<&str> {
        self.0.get(&term.to_lowercase()).map(String::as_str)
    }

    fn merged(&self, other: &CaseOverrides) -> Self {
        let mut map = self.0.clone();
        map.extend(other.0.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self(map)
    }
}

/// Capitalizes the first letter of every alphabetic run, lowercasing the rest
fn title_word(word: &str) -> String {
    let mut out = String::with_capacity(word.len());
    let mut prev_alpha = false;
    for c in word.chars() {
        if c.is_alphabetic() {
            if prev_alpha {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_alpha = true;
        } else {
            out.push(c);
            prev_alpha = false;
        }
    }
    out
}

/// A lowercase letter directly followed by an uppercase one ("McFly")
fn has_internal_capital(token: &str) -> bool {
    let chars: Vec<char> = token.chars().collect();
    chars
        .windows(2)
        .any(|w| w[0].is_lowercase() && w[1].is_uppercase())
}

/// Title-cases `text` with an override list
///
/// An exact (case-insensitive) override match on the whole text or on a
/// word wins. With `preserve_mixed_case`, a single token that already has
/// an internal capital is returned untouched.
///
/// # Examples
///
/// ```
/// use trawl::extract::{custom_title_case, CaseOverrides};
///
/// let overrides = CaseOverrides::new(["BrandX"]);
/// assert_eq!(custom_title_case("the brandx show", &overrides, false), "The BrandX Show");
/// assert_eq!(custom_title_case("McFly", &overrides, true), "McFly");
/// assert_eq!(custom_title_case("McFly", &overrides, false), "Mcfly");
/// ```
pub fn custom_title_case(text: &str, overrides: &CaseOverrides, preserve_mixed_case: bool) -> String {
    let text = text.trim();
    if let Some(exact) = overrides.get(text) {
        return exact.to_string();
    }

    let words: Vec<&str> = text.split_whitespace().collect();
    if preserve_mixed_case && words.len() == 1 && has_internal_capital(text) {
        return text.to_string();
    }

    words
        .iter()
        .map(|w| match overrides.get(w) {
            Some(exact) => exact.to_string(),
            None => title_word(w),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn strip_markers(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .map(|v| v.trim_start_matches('#').trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

/// Normalizes raw records into final records
#[derive(Debug, Clone, Default)]
pub struct Finalizer {
    overrides: CaseOverrides,
    tag_overrides: CaseOverrides,
}

impl Finalizer {
    /// `case_overrides` apply everywhere; `tag_case_overrides` only to tags
    pub fn new(case_overrides: &[String], tag_case_overrides: &[String]) -> Self {
        let overrides = CaseOverrides::new(case_overrides);
        let tag_overrides = overrides.merged(&CaseOverrides::new(tag_case_overrides));
        Self {
            overrides,
            tag_overrides,
        }
    }

    /// Produces the final record for an item at `url`
    ///
    /// Studios drop entries equal (ignoring case) to an actor; tags drop
    /// entries equal to an actor or a surviving studio.
    pub fn finalize(&self, raw: &RawRecord, url: &str) -> FinalRecord {
        let actors = strip_markers(raw.list("actors"));
        let studios = strip_markers(raw.list("studios"));
        let tags = strip_markers(raw.list("tags"));

        let actor_keys: HashSet<String> = actors.iter().map(|a| a.to_lowercase()).collect();
        let studios: Vec<String> = studios
            .into_iter()
            .filter(|s| !actor_keys.contains(&s.to_lowercase()))
            .collect();
        let studio_keys: HashSet<String> = studios.iter().map(|s| s.to_lowercase()).collect();
        let tags: Vec<String> = tags
            .into_iter()
            .filter(|t| {
                let key = t.to_lowercase();
                !actor_keys.contains(&key) && !studio_keys.contains(&key)
            })
            .collect();

        let mut fields = BTreeMap::new();
        for (name, value) in raw.iter() {
            match name.as_str() {
                "actors" | "studios" | "tags" | "title" => {}
                "producers" => {
                    fields.insert(name.clone(), FieldValue::List(strip_markers(value.to_list())));
                }
                "studio" => {
                    let studio = value.first().unwrap_or_default().trim_start_matches('#');
                    fields.insert(
                        name.clone(),
                        FieldValue::Text(custom_title_case(studio, &self.overrides, true)),
                    );
                }
                _ => {
                    fields.insert(name.clone(), value.clone());
                }
            }
        }

        let title = raw
            .text("title")
            .map(|t| custom_title_case(t, &self.overrides, false))
            .unwrap_or_else(|| "Untitled".to_string());

        FinalRecord {
            title,
            url: url.to_string(),
            actors: actors
                .iter()
                .map(|a| custom_title_case(a, &self.overrides, true))
                .collect(),
            studios: studios
                .iter()
                .map(|s| custom_title_case(s, &self.overrides, true))
                .collect(),
            tags: tags
                .iter()
                .map(|t| custom_title_case(t, &self.tag_overrides, false))
                .collect(),
            fields,
        }
    }
}

/// Skips items whose metadata mentions an ignored term
#[derive(Debug, Clone, Default)]
pub struct IgnoreFilter {
    terms: Vec<(String, Regex, Regex)>,
}

impl IgnoreFilter {
    /// Each term matches as a whole word, or in its hyphenated form
    pub fn new(terms: &[String]) -> Self {
        let terms = terms
            .iter()
            .filter(|t| !t.trim().is_empty())
            .filter_map(|t| {
                let lower = t.trim().to_lowercase();
                let plain = Regex::new(&format!(r"\b{}\b", regex::escape(&lower))).ok()?;
                let hyphen = Regex::new(&format!(
                    r"\b{}\b",
                    regex::escape(&lower.replace(' ', "-"))
                ))
                .ok()?;
                Some((lower, plain, hyphen))
            })
            .collect();
        Self { terms }
    }

    /// Returns the first ignored term found in the record, if any
    pub fn matched_term(&self, record: &FinalRecord) -> Option<&str> {
        if self.terms.is_empty() {
            return None;
        }

        let mut values: Vec<(&str, String)> = vec![
            ("title", record.title.clone()),
            ("url", record.url.clone()),
        ];
        values.extend(record.actors.iter().map(|v| ("actors", v.clone())));
        values.extend(record.studios.iter().map(|v| ("studios", v.clone())));
        values.extend(record.tags.iter().map(|v| ("tags", v.clone())));
        for (name, value) in &record.fields {
            values.extend(value.to_list().into_iter().map(|v| (name.as_str(), v)));
        }

        for (field, value) in values {
            let lower = value.to_lowercase();
            for (term, plain, hyphen) in &self.terms {
                if plain.is_match(&lower) || hyphen.is_match(&lower) {
                    warn!("Ignoring item due to term '{}' in {}: '{}'", term, field, value);
                    return Some(term);
                }
            }
        }
        None
    }
}
