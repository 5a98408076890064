//! Field extraction over a parsed document or document fragment

use crate::extract::record::{dedup_case_insensitive, is_multi_value, FieldValue, RawRecord};
use crate::extract::selector::{AttributeKind, FieldMap, FieldSelector, FieldSpec, PostProcess};
use crate::url::resolve_link;
use scraper::{ElementRef, Html};
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::{debug, trace};
use url::Url;

/// Bodies of iframe documents, keyed by the frame selector's source text
#[derive(Debug, Clone, Default)]
pub struct FrameDocuments {
    bodies: HashMap<String, String>,
}

impl FrameDocuments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, frame_selector: &str, body: String) {
        self.bodies.insert(frame_selector.to_string(), body);
    }

    pub fn get(&self, frame_selector: &str) -> Option<&str> {
        self.bodies.get(frame_selector).map(String::as_str)
    }
}

/// An iframe that must be fetched before extraction can query inside it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameTarget {
    pub frame_selector: String,
    pub url: String,
}

/// Finds the iframe sources referenced by the iframe fields of a map
///
/// Each frame selector is resolved once; frames without a usable `src` are
/// skipped and their fields later extract as empty.
pub fn frame_targets(scope: ElementRef<'_>, fields: &FieldMap, page_url: &Url) -> Vec<FrameTarget> {
    let mut targets: Vec<FrameTarget> = Vec::new();

    for spec in fields.values() {
        let FieldSelector::Iframe { frame, .. } = &spec.selector else {
            continue;
        };
        if targets.iter().any(|t| t.frame_selector == frame.source()) {
            continue;
        }
        let src = frame
            .select(scope)
            .into_iter()
            .find_map(|el| el.value().attr("src").map(str::to_string));
        match src.and_then(|s| resolve_link(&s, page_url)) {
            Some(url) => targets.push(FrameTarget {
                frame_selector: frame.source().to_string(),
                url,
            }),
            None => debug!("No iframe found for selector '{}'", frame.source()),
        }
    }

    targets
}

/// Extracts every field of `fields` from `scope`
///
/// A field whose selector matches nothing is the empty string. Multi-value
/// fields collect trimmed text of every match, deduplicated ignoring case.
/// Other fields collapse to their first match unless post-processing is
/// declared, in which case the steps decide.
pub fn extract_record(scope: ElementRef<'_>, fields: &FieldMap, frames: &FrameDocuments) -> RawRecord {
    let mut record = RawRecord::new();

    for (name, spec) in fields {
        let value = match &spec.selector {
            FieldSelector::Iframe { frame, inner, .. } => match frames.get(frame.source()) {
                Some(body) => {
                    let doc = Html::parse_document(body);
                    let elements = inner.select_first(doc.root_element());
                    evaluate(name, spec, &elements)
                }
                None => FieldValue::empty(),
            },
            FieldSelector::Css(paths) => evaluate(name, spec, &paths.select_first(scope)),
            FieldSelector::Attribute { paths, .. } => {
                let elements = if paths.is_empty() {
                    vec![scope]
                } else {
                    paths.select_first(scope)
                };
                evaluate(name, spec, &elements)
            }
        };

        if value.is_empty() {
            trace!("Field '{}' matched nothing", name);
        }
        record.insert(name, value);
    }

    record
}

fn element_text(el: &ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

fn evaluate(field: &str, spec: &FieldSpec, elements: &[ElementRef<'_>]) -> FieldValue {
    if elements.is_empty() {
        return FieldValue::empty();
    }

    let multi = is_multi_value(field);

    // `sources[i]` is the element that produced the i-th list entry
    let (mut value, sources): (FieldValue, Vec<ElementRef<'_>>) = match spec.selector.attribute() {
        Some(attribute) => {
            let pairs: Vec<(String, ElementRef<'_>)> = elements
                .iter()
                .filter_map(|el| {
                    el.value()
                        .attr(attribute)
                        .map(str::trim)
                        .filter(|v| !v.is_empty())
                        .map(|v| (v.to_string(), *el))
                })
                .collect();
            match pairs.len() {
                0 => (FieldValue::empty(), Vec::new()),
                1 => (FieldValue::Text(pairs[0].0.clone()), vec![pairs[0].1]),
                _ => {
                    let (values, els) = pairs.into_iter().unzip();
                    (FieldValue::List(values), els)
                }
            }
        }
        None if multi => {
            let texts: Vec<(String, ElementRef<'_>)> = elements
                .iter()
                .map(|el| (element_text(el), *el))
                .filter(|(t, _)| !t.is_empty())
                .collect();
            let kept = dedup_case_insensitive(texts.iter().map(|(t, _)| t.clone()).collect());
            let mut els = Vec::with_capacity(kept.len());
            let mut remaining = kept.iter().peekable();
            for (text, el) in &texts {
                if remaining.peek().map_or(false, |k| *k == text) {
                    els.push(*el);
                    remaining.next();
                }
            }
            (FieldValue::List(kept), els)
        }
        None => (FieldValue::Text(element_text(&elements[0])), vec![elements[0]]),
    };

    for step in &spec.steps {
        value = apply_step(field, step, value, &sources);
    }

    if spec.steps.is_empty() && !multi {
        value = value.into_first();
    }

    value
}

fn apply_step(field: &str, step: &PostProcess, value: FieldValue, sources: &[ElementRef<'_>]) -> FieldValue {
    match step {
        PostProcess::Replace(replacements) => value.map(|s| {
            replacements.iter().fold(s.to_string(), |acc, r| {
                r.pattern.replace_all(&acc, r.with.as_str()).into_owned()
            })
        }),
        PostProcess::TakeFirst => value.into_first(),
        PostProcess::MaxAttribute { attribute, kind } => match value {
            FieldValue::List(values) => {
                FieldValue::Text(pick_by_max_attribute(field, values, sources, attribute, *kind))
            }
            scalar => scalar,
        },
    }
}

#[derive(Debug, PartialEq, PartialOrd)]
enum AttributeKey {
    Int(i64),
    Float(f64),
    Str(String),
}

fn parse_key(raw: &str, kind: AttributeKind) -> Option<AttributeKey> {
    let raw = raw.trim();
    match kind {
        AttributeKind::Int => raw.parse().ok().map(AttributeKey::Int),
        AttributeKind::Float => raw.parse().ok().map(AttributeKey::Float),
        AttributeKind::Str => Some(AttributeKey::Str(raw.to_string())),
    }
}

fn pick_by_max_attribute(
    field: &str,
    values: Vec<String>,
    sources: &[ElementRef<'_>],
    attribute: &str,
    kind: AttributeKind,
) -> String {
    let first = values.first().cloned().unwrap_or_default();

    let mut keyed = Vec::with_capacity(values.len());
    for (value, el) in values.into_iter().zip(sources) {
        let Some(raw) = el.value().attr(attribute) else {
            continue;
        };
        match parse_key(raw, kind) {
            Some(key) => keyed.push((key, value)),
            None => {
                debug!(
                    "Field '{}': attribute '{}' value '{}' is not a {:?}, keeping first value",
                    field, attribute, raw, kind
                );
                return first;
            }
        }
    }

    let mut best: Option<(AttributeKey, String)> = None;
    for (key, value) in keyed {
        let replace = match &best {
            None => true,
            Some((best_key, _)) => key.partial_cmp(best_key) == Some(Ordering::Greater),
        };
        if replace {
            best = Some((key, value));
        }
    }

    best.map(|(_, v)| v).unwrap_or(first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::selector::FieldMap;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Wrapper {
        fields: FieldMap,
    }

    fn fields(src: &str) -> FieldMap {
        toml::from_str::<Wrapper>(src).unwrap().fields
    }

    fn extract(html: &str, src: &str) -> RawRecord {
        let doc = Html::parse_document(html);
        extract_record(doc.root_element(), &fields(src), &FrameDocuments::new())
    }

    #[test]
    fn test_missing_field_is_empty_string() {
        let r = extract("<p>x</p>", "[fields]\ntitle = \"h1\"\n");
        assert_eq!(r.get("title"), Some(&FieldValue::empty()));
    }

    #[test]
    fn test_scalar_collapses_to_first_match() {
        let r = extract(
            "<h1> First </h1><h1>Second</h1>",
            "[fields]\ntitle = \"h1\"\n",
        );
        assert_eq!(r.get("title"), Some(&FieldValue::Text("First".into())));
    }

    #[test]
    fn test_candidate_selectors_in_order() {
        let r = extract(
            "<h2>Fallback</h2>",
            "[fields]\ntitle = [\"h1.title\", \"h2\"]\n",
        );
        assert_eq!(r.text("title"), Some("Fallback"));
    }

    #[test]
    fn test_multi_value_dedup_case_insensitive() {
        let r = extract(
            "<a class=t>Jane</a><a class=t>jane</a><a class=t> Bob </a><a class=t></a>",
            "[fields]\nactors = \"a.t\"\n",
        );
        assert_eq!(
            r.get("actors"),
            Some(&FieldValue::List(vec!["Jane".into(), "Bob".into()]))
        );
    }

    #[test]
    fn test_attribute_values() {
        let r = extract(
            r#"<img src="/a.jpg"><img><img src="/b.jpg">"#,
            "[fields]\nimage = { selector = \"img\", attribute = \"src\" }\n",
        );
        assert_eq!(r.text("image"), Some("/a.jpg"));
    }

    #[test]
    fn test_attribute_without_selector_reads_scope() {
        let doc = Html::parse_fragment(r#"<a href="/watch/1">Clip</a>"#);
        let a = doc
            .select(&scraper::Selector::parse("a").unwrap())
            .next()
            .unwrap();
        let r = extract_record(
            a,
            &fields("[fields]\nurl = { attribute = \"href\" }\n"),
            &FrameDocuments::new(),
        );
        assert_eq!(r.text("url"), Some("/watch/1"));
    }

    #[test]
    fn test_regex_replace_dotall() {
        let r = extract(
            "<div class=d>line one\nline two</div>",
            r#"
[fields.description]
selector = "div.d"
postprocess = [{ replace = [{ regex = "one.line", with = "1-2" }] }]
"#,
        );
        assert_eq!(r.text("description"), Some("line 1-2 two"));
    }

    #[test]
    fn test_replace_applies_to_every_list_entry() {
        let r = extract(
            "<a>#red</a><a>#blue</a>",
            r##"
[fields.tags]
selector = "a"
postprocess = [{ replace = [{ regex = "^#", with = "" }] }]
"##,
        );
        assert_eq!(r.list("tags"), vec!["red", "blue"]);
    }

    #[test]
    fn test_max_attribute_int() {
        let r = extract(
            r#"<source src="/480.mp4" data-res="480"><source src="/1080.mp4" data-res="1080"><source src="/720.mp4" data-res="720">"#,
            r#"
[fields.download_url]
selector = "source"
attribute = "src"
postprocess = [{ max-attribute = { attribute = "data-res", type = "int" } }]
"#,
        );
        assert_eq!(r.text("download_url"), Some("/1080.mp4"));
    }

    #[test]
    fn test_max_attribute_lexical() {
        let r = extract(
            r#"<source src="/a" data-q="b"><source src="/c" data-q="d">"#,
            r#"
[fields.download_url]
selector = "source"
attribute = "src"
postprocess = [{ max-attribute = { attribute = "data-q" } }]
"#,
        );
        assert_eq!(r.text("download_url"), Some("/c"));
    }

    #[test]
    fn test_max_attribute_unparseable_defaults_to_first() {
        let r = extract(
            r#"<source src="/a" data-res="hd"><source src="/b" data-res="1080">"#,
            r#"
[fields.download_url]
selector = "source"
attribute = "src"
postprocess = [{ max-attribute = { attribute = "data-res", type = "int" } }]
"#,
        );
        assert_eq!(r.text("download_url"), Some("/a"));
    }

    #[test]
    fn test_take_first_after_replace() {
        let r = extract(
            "<span>a-1</span><span>b-2</span>",
            r#"
[fields.code]
selector = "span"
attribute = "missing"
"#,
        );
        assert_eq!(r.get("code"), Some(&FieldValue::empty()));

        let r = extract(
            r#"<span data-c="a-1"></span><span data-c="b-2"></span>"#,
            r#"
[fields.code]
selector = "span"
attribute = "data-c"
postprocess = [{ replace = [{ regex = "-", with = "" }] }, { first = true }]
"#,
        );
        assert_eq!(r.get("code"), Some(&FieldValue::Text("a1".into())));
    }

    #[test]
    fn test_iframe_field_reads_frame_document() {
        let page = Html::parse_document(r#"<iframe id="player" src="/embed/9"></iframe>"#);
        let map = fields(
            "[fields]\ndownload_url = { iframe = \"iframe#player\", selector = \"video source\", attribute = \"src\" }\n",
        );
        let base = Url::parse("https://example.com/watch/9").unwrap();

        let targets = frame_targets(page.root_element(), &map, &base);
        assert_eq!(
            targets,
            vec![FrameTarget {
                frame_selector: "iframe#player".to_string(),
                url: "https://example.com/embed/9".to_string(),
            }]
        );

        let mut frames = FrameDocuments::new();
        frames.insert(
            "iframe#player",
            r#"<video><source src="https://cdn.example.com/9.mp4"></video>"#.to_string(),
        );
        let r = extract_record(page.root_element(), &map, &frames);
        assert_eq!(r.text("download_url"), Some("https://cdn.example.com/9.mp4"));

        let r = extract_record(page.root_element(), &map, &FrameDocuments::new());
        assert_eq!(r.text("download_url"), None);
    }
}
