//! Human-readable text rendering of [`Document`]s, [`Item`]s and [`Report`]s.
//!
//! The output is stable plain text suitable for terminals or logs. It is not
//! a canonical format; only the JSON wire format is normative.

use crate::report::{Report, ReportEntry};
use crate::types::{Document, Item};

/// Render a whole document: a header, then one block per item.
///
/// ```text
/// My Blog  (1.0, 2 items)
/// ───────────────────────
/// by Alice  ed25519:q0W2...
/// https://example.com  feed: https://example.com/feed.ansybl
/// signed: yes
///
/// [https://example.com/p/1]  2026-01-01T00:00:00Z  signed
/// "Hello"
/// ```
pub fn render_document(doc: &Document) -> String {
    let version = doc
        .protocol_version()
        .map(|v| v.major_minor())
        .unwrap_or_else(|| doc.version.clone());
    let count = doc.items.len();
    let header = format!(
        "{}  ({}, {} item{})",
        doc.title,
        version,
        count,
        if count == 1 { "" } else { "s" }
    );
    let rule = "─".repeat(header.chars().count());
    let mut out = format!("{header}\n{rule}\n");

    out.push_str(&format!(
        "by {}  {}\n",
        doc.author.name,
        truncate(&doc.author.public_key, 20)
    ));
    out.push_str(&format!("{}  feed: {}\n", doc.home_page_url, doc.feed_url));
    if let Some(description) = &doc.description {
        out.push_str(&wrap(description, 80));
        out.push('\n');
    }
    if doc.expired == Some(true) {
        out.push_str("expired: yes\n");
    }
    out.push_str(&format!(
        "signed: {}\n",
        if doc.signature.is_some() { "yes" } else { "no" }
    ));

    if !doc.extensions.is_empty() {
        out.push_str("\nExtensions:\n");
        for (k, v) in &doc.extensions {
            out.push_str(&format!("  {k}: {v}\n"));
        }
    }

    for item in &doc.items {
        out.push('\n');
        out.push_str(&render_item(item));
    }
    out
}

/// Render one item.
pub fn render_item(item: &Item) -> String {
    let mut out = format!(
        "[{}]  {}  {}\n",
        item.id,
        item.date_published,
        if item.signature.is_some() { "signed" } else { "unsigned" }
    );
    if let Some(author) = &item.author {
        out.push_str(&format!("by {}\n", author.name));
    }
    if let Some(title) = &item.title {
        out.push_str(&format!("{title}\n"));
    }

    // text first, then markdown, then the raw html
    let body = item
        .content_text
        .as_deref()
        .or(item.content_markdown.as_deref())
        .or(item.content_html.as_deref())
        .or(item.summary.as_deref())
        .unwrap_or("");
    out.push_str(&format!("\"{}\"\n", truncate(body, 240)));

    if let Some(parent) = &item.in_reply_to {
        out.push_str(&format!("in reply to {parent}\n"));
    }
    if let Some(tags) = item.tags.as_ref().filter(|t| !t.is_empty()) {
        out.push_str(&format!("tags: {}\n", tags.join(", ")));
    }
    if let Some(attachments) = &item.attachments {
        for a in attachments {
            out.push_str(&format!("  + {} ({})\n", a.url, a.mime_type));
        }
    }
    if let Some(i) = &item.interactions {
        let counts: Vec<String> = [
            (i.replies_count, "replies"),
            (i.likes_count, "likes"),
            (i.shares_count, "shares"),
        ]
        .into_iter()
        .filter_map(|(n, label)| n.map(|n| format!("{n} {label}")))
        .collect();
        if !counts.is_empty() {
            out.push_str(&format!("  {}\n", counts.join("  ")));
        }
    }
    out
}

/// Render a report as two sections, errors then warnings.
///
/// ```text
/// 1 error, 1 warning
///
/// Errors:
///   [INVALID_MIME_TYPE] "not-a-mime" is not a MIME type (at items[0].attachments[0].mime_type)
///     hint: Use a type/subtype value such as image/png.
///
/// Warnings:
///   [SIGNATURE_MISSING] item is not signed (at items[1].signature)
/// ```
pub fn render_report(report: &Report) -> String {
    let (e, w) = (report.errors.len(), report.warnings.len());
    if e == 0 && w == 0 {
        return "no problems found\n".to_string();
    }
    let mut out = format!(
        "{e} error{}, {w} warning{}\n",
        if e == 1 { "" } else { "s" },
        if w == 1 { "" } else { "s" }
    );
    for (label, entries) in [("Errors", &report.errors), ("Warnings", &report.warnings)] {
        if entries.is_empty() {
            continue;
        }
        out.push_str(&format!("\n{label}:\n"));
        for entry in entries {
            push_entry(&mut out, entry);
        }
    }
    out
}

// --- helpers -----------------------------------------------------------------

fn push_entry(out: &mut String, entry: &ReportEntry) {
    out.push_str(&format!("  {entry}"));
    if !entry.recoverable {
        out.push_str("  [fatal]");
    }
    out.push('\n');
    for hint in &entry.suggestions {
        out.push_str(&format!("    hint: {hint}\n"));
    }
}

fn wrap(content: &str, width: usize) -> String {
    let mut result = String::new();
    let mut line_len = 0usize;
    for word in content.split_whitespace() {
        if line_len > 0 && line_len + word.len() + 1 > width {
            result.push('\n');
            line_len = 0;
        } else if line_len > 0 {
            result.push(' ');
            line_len += 1;
        }
        result.push_str(word);
        line_len += word.len();
    }
    result
}

fn truncate(s: &str, max: usize) -> String {
    let s = s.trim();
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max - 1).collect();
        format!("{cut}…")
    }
}

// --- tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::ErrorCode;
    use crate::types::{Attachment, Author, Interactions};

    fn doc() -> Document {
        let mut d = Document::new(
            "My Blog",
            "https://example.com",
            "https://example.com/feed.ansybl",
            Author::new("Alice", "ed25519:AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA="),
        );
        let mut item = Item::new("https://example.com/p/1", "https://example.com/p/1", "2026-01-01T00:00:00Z");
        item.content_text = Some("Hello".into());
        item.attachments = Some(vec![Attachment::new("https://example.com/a.png", "image/png")]);
        d.items.push(item);
        d
    }

    #[test]
    fn render_document_contains_key_fields() {
        let rendered = render_document(&doc());
        assert!(rendered.starts_with("My Blog  (1.0, 1 item)\n"));
        assert!(rendered.contains("by Alice"));
        assert!(rendered.contains("signed: no"));
        assert!(rendered.contains("[https://example.com/p/1]"));
        assert!(rendered.contains("\"Hello\""));
        assert!(rendered.contains("image/png"));
    }

    #[test]
    fn only_present_counters_are_rendered() {
        let mut d = doc();
        d.items[0].interactions = Some(Interactions {
            likes_count: Some(3),
            ..Interactions::default()
        });
        let rendered = render_document(&d);
        assert!(rendered.contains("  3 likes\n"));
        assert!(!rendered.contains("replies"));
    }

    #[test]
    fn render_report_lists_errors_then_warnings() {
        let mut report = Report::new();
        report.warning(ReportEntry::new(ErrorCode::SignatureMissing, "item is not signed"));
        report.error(
            ReportEntry::new(ErrorCode::InvalidMimeType, "bad").at("items[0].attachments[0].mime_type"),
        );
        let rendered = render_report(&report);
        assert!(rendered.starts_with("1 error, 1 warning\n"));
        let errors = rendered.find("Errors:").unwrap();
        let warnings = rendered.find("Warnings:").unwrap();
        assert!(errors < warnings);
        assert!(rendered.contains("(at items[0].attachments[0].mime_type)"));
    }

    #[test]
    fn clean_report() {
        assert_eq!(render_report(&Report::new()), "no problems found\n");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo wörld", 6), "héllo…");
        assert_eq!(truncate("short", 10), "short");
    }

    #[test]
    fn wrap_breaks_long_lines() {
        let wrapped = wrap(&"word ".repeat(40), 20);
        assert!(wrapped.lines().all(|l| l.len() <= 20));
    }
}
