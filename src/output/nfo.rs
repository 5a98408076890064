//! `.nfo` sidecar generation
//!
//! The sidecar is a small XML `<movie>` document understood by common media
//! library managers. Only fields with a value are written.

use crate::extract::FinalRecord;
use crate::output::traits::{SidecarWriter, SinkError, SinkResult};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Escapes the five XML special characters
fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

fn element(out: &mut String, tag: &str, value: &str) {
    let _ = writeln!(out, "  <{tag}>{}</{tag}>", escape_xml(value.trim()));
}

/// Renders the sidecar document for a record
pub fn render_nfo(record: &FinalRecord) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n<movie>\n");

    if !record.title.is_empty() {
        element(&mut out, "title", &record.title);
    }
    if !record.url.is_empty() {
        element(&mut out, "url", &record.url);
    }
    if let Some(date) = record.text("date") {
        element(&mut out, "premiered", date);
    }
    if let Some(code) = record.text("code") {
        element(&mut out, "uniqueid", code);
    }
    for tag in &record.tags {
        element(&mut out, "tag", tag);
    }
    for (i, actor) in record.actors.iter().enumerate() {
        let _ = write!(
            out,
            "  <actor>\n    <name>{}</name>\n    <order>{}</order>\n  </actor>\n",
            escape_xml(actor),
            i + 1
        );
    }
    if let Some(image) = record.text("image") {
        let _ = writeln!(out, "  <thumb aspect=\"poster\">{}</thumb>", escape_xml(image));
    }
    if !record.studios.is_empty() {
        for studio in &record.studios {
            element(&mut out, "studio", studio);
        }
    } else if let Some(studio) = record.text("studio") {
        element(&mut out, "studio", studio);
    }
    if let Some(plot) = record.text("description") {
        element(&mut out, "plot", plot);
    }

    out.push_str("</movie>\n");
    out
}

/// Writes `<stem>.nfo` beside each artifact
#[derive(Debug, Clone, Copy, Default)]
pub struct NfoWriter;

impl SidecarWriter for NfoWriter {
    fn sidecar_path(&self, artifact: &Path) -> PathBuf {
        artifact.with_extension("nfo")
    }

    fn write(&self, record: &FinalRecord, artifact: &Path, overwrite: bool) -> SinkResult<Option<PathBuf>> {
        let path = self.sidecar_path(artifact);
        let existed = path.exists();
        if existed && !overwrite {
            debug!("Sidecar {} exists, skipping", path.display());
            return Ok(None);
        }

        std::fs::write(&path, render_nfo(record)).map_err(|e| SinkError::io(&path, e))?;
        info!(
            "{} sidecar {}",
            if existed { "Replaced" } else { "Generated" },
            path.display()
        );
        Ok(Some(path))
    }
}
