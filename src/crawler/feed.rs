//! Syndication feed handling
//!
//! Feed entries are turned into a small synthetic item document so the
//! site's ordinary field selectors apply to them unchanged.

use crate::extract::{extract_record, FieldMap, FieldValue, FrameDocuments, RawRecord};
use feed_rs::model::Entry;
use scraper::Html;
use tracing::debug;

/// One feed entry, ready for extraction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    pub link: String,
    pub title: String,
    /// Synthetic `<item>` document built from the entry's fields
    pub document: String,
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn entry_document(entry: &Entry, link: &str, title: &str) -> String {
    let mut doc = String::from("<item>");
    doc.push_str(&format!("<title>{}</title>", escape(title)));
    doc.push_str(&format!(
        "<link href=\"{}\">{}</link>",
        escape(link),
        escape(link)
    ));
    if let Some(summary) = &entry.summary {
        doc.push_str(&format!(
            "<description>{}</description>",
            escape(&summary.content)
        ));
    }
    if let Some(body) = entry.content.as_ref().and_then(|c| c.body.as_deref()) {
        doc.push_str(&format!(
            "<content:encoded>{}</content:encoded>",
            escape(body)
        ));
    }
    for category in &entry.categories {
        doc.push_str(&format!("<category>{}</category>", escape(&category.term)));
    }
    doc.push_str("</item>");
    doc
}

/// Parses a feed and returns its entries oldest first
///
/// Feeds list newest first; entries without a link are dropped.
pub fn parse_feed(body: &str) -> Result<Vec<FeedEntry>, feed_rs::parser::ParseFeedError> {
    let feed = feed_rs::parser::parse(body.as_bytes())?;

    let entries: Vec<FeedEntry> = feed
        .entries
        .iter()
        .rev()
        .filter_map(|entry| {
            let link = entry.links.first().map(|l| l.href.trim().to_string())?;
            if link.is_empty() {
                debug!("Skipping feed entry '{}' without a link", entry.id);
                return None;
            }
            let title = entry
                .title
                .as_ref()
                .map(|t| t.content.trim().to_string())
                .unwrap_or_default();
            let document = entry_document(entry, &link, &title);
            Some(FeedEntry {
                link,
                title,
                document,
            })
        })
        .collect();

    Ok(entries)
}

/// Runs the feed field selectors over an entry's synthetic document
///
/// An empty title falls back to the entry's own title.
pub fn extract_entry(entry: &FeedEntry, fields: &FieldMap) -> RawRecord {
    let doc = Html::parse_document(&entry.document);
    let mut record = extract_record(doc.root_element(), fields, &FrameDocuments::new());

    if record.text("title").is_none() && !entry.title.is_empty() {
        record.insert("title", FieldValue::Text(entry.title.clone()));
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:content="http://purl.org/rss/1.0/modules/content/">
  <channel>
    <title>Example</title>
    <link>https://example.com/</link>
    <description>Latest</description>
    <item>
      <title>Newest &amp; Best</title>
      <link>https://example.com/watch/2</link>
      <guid>2</guid>
      <description>&lt;p&gt;Second&lt;/p&gt;</description>
      <category>Comedy</category>
      <category>comedy</category>
      <category>Drama</category>
    </item>
    <item>
      <title>Oldest</title>
      <link>https://example.com/watch/1</link>
      <guid>1</guid>
    </item>
  </channel>
</rss>"#;

    fn fields(toml_text: &str) -> FieldMap {
        toml::from_str(toml_text).unwrap()
    }

    #[test]
    fn test_parse_feed_oldest_first() {
        let entries = parse_feed(RSS).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].link, "https://example.com/watch/1");
        assert_eq!(entries[1].link, "https://example.com/watch/2");
        assert_eq!(entries[1].title, "Newest & Best");
    }

    #[test]
    fn test_parse_feed_rejects_garbage() {
        assert!(parse_feed("<html><body>nope</body></html>").is_err());
    }

    #[test]
    fn test_extract_entry_with_item_selectors() {
        let entries = parse_feed(RSS).unwrap();
        let fields = fields(
            r#"
title = "title"
link = { selector = "link", attribute = "href" }
description = "description"
tags = "category"
"#,
        );

        let record = extract_entry(&entries[1], &fields);
        assert_eq!(record.text("title"), Some("Newest & Best"));
        assert_eq!(record.text("link"), Some("https://example.com/watch/2"));
        assert_eq!(record.text("description"), Some("<p>Second</p>"));
        assert_eq!(record.list("tags"), vec!["Comedy", "Drama"]);
    }

    #[test]
    fn test_extract_entry_title_fallback() {
        let entries = parse_feed(RSS).unwrap();
        let fields = fields("title = \"h1.missing\"\n");

        let record = extract_entry(&entries[0], &fields);
        assert_eq!(record.text("title"), Some("Oldest"));
    }
}
