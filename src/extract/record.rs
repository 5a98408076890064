//! Extracted records and their values

use std::collections::{BTreeMap, HashSet};

/// Fields that always hold an ordered list of distinct values
pub const MULTI_VALUE_FIELDS: [&str; 4] = ["tags", "actors", "producers", "studios"];

/// Returns true for one of the designated multi-value fields
pub fn is_multi_value(field: &str) -> bool {
    MULTI_VALUE_FIELDS.contains(&field)
}

/// A field value: a scalar string or an ordered list of strings
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    List(Vec<String>),
}

impl FieldValue {
    pub fn empty() -> Self {
        Self::Text(String::new())
    }

    /// True for the empty string and the empty list
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(s) => s.is_empty(),
            Self::List(v) => v.is_empty(),
        }
    }

    /// The scalar value, or the first list entry
    pub fn first(&self) -> Option<&str> {
        match self {
            Self::Text(s) if !s.is_empty() => Some(s),
            Self::Text(_) => None,
            Self::List(v) => v.first().map(String::as_str),
        }
    }

    /// Collapses a list to its first entry
    pub fn into_first(self) -> Self {
        match self {
            Self::List(v) => Self::Text(v.into_iter().next().unwrap_or_default()),
            text => text,
        }
    }

    /// Every value as a list (a non-empty scalar becomes a single entry)
    pub fn to_list(&self) -> Vec<String> {
        match self {
            Self::Text(s) if s.is_empty() => Vec::new(),
            Self::Text(s) => vec![s.clone()],
            Self::List(v) => v.clone(),
        }
    }

    pub fn map(self, f: impl Fn(&str) -> String) -> Self {
        match self {
            Self::Text(s) => Self::Text(f(&s)),
            Self::List(v) => Self::List(v.iter().map(|s| f(s)).collect()),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

/// Field name to value mapping produced per item
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRecord {
    fields: BTreeMap<String, FieldValue>,
}

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: &str, value: FieldValue) {
        self.fields.insert(field.to_string(), value);
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    /// The first non-empty value of a field, trimmed
    pub fn text(&self, field: &str) -> Option<&str> {
        self.get(field)
            .and_then(FieldValue::first)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn list(&self, field: &str) -> Vec<String> {
        self.get(field).map(FieldValue::to_list).unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.fields.iter()
    }

    /// Fills every empty or missing field from `fallback`
    pub fn fill_from(&mut self, fallback: &RawRecord) {
        for (field, value) in &fallback.fields {
            let missing = self.fields.get(field).map_or(true, FieldValue::is_empty);
            if missing && !value.is_empty() {
                self.fields.insert(field.clone(), value.clone());
            }
        }
    }
}

/// Removes case-insensitive duplicates, keeping the first casing and order
///
/// # Examples
///
/// ```
/// use trawl::extract::dedup_case_insensitive;
///
/// let values = vec!["Jane".to_string(), "jane".to_string(), "Bob".to_string()];
/// assert_eq!(dedup_case_insensitive(values), vec!["Jane", "Bob"]);
/// ```
pub fn dedup_case_insensitive(values: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    values
        .into_iter()
        .filter(|v| seen.insert(v.to_lowercase()))
        .collect()
}
