//! Note → printable HTML.
//!
//! Output depends only on the note and the generation time, so two renders
//! of the same snapshot are byte-identical.

use chrono::{DateTime, Utc};
use std::fmt::Write;

use crate::models::Note;

const STYLE: &str = "\
body { font-family: Helvetica, Arial, sans-serif; margin: 48px; color: #222; }
h1 { font-size: 26px; margin-bottom: 8px; }
.meta { color: #666; font-size: 12px; margin-bottom: 24px; }
.tags { margin-bottom: 24px; }
.tag { display: inline-block; background: #eef; border-radius: 4px; padding: 2px 8px; margin-right: 6px; font-size: 12px; }
.content { white-space: pre-wrap; line-height: 1.5; font-size: 14px; }
footer { margin-top: 48px; color: #999; font-size: 10px; }";

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format("%B %-d, %Y, %I:%M %p UTC").to_string()
}

pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

pub fn render_note_html(note: &Note, generated_at: DateTime<Utc>) -> String {
    let title = escape_html(&note.title);
    let mut html = String::new();

    // writing into a String cannot fail
    let _ = write!(
        html,
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n<style>\n{}\n</style>\n</head>\n<body>\n",
        title, STYLE
    );
    let _ = writeln!(html, "<h1>{}</h1>", title);
    let _ = writeln!(
        html,
        "<div class=\"meta\">Created {} &middot; Updated {}</div>",
        format_timestamp(&note.created_at),
        format_timestamp(&note.updated_at)
    );

    if let Some(tags) = note.tags.as_ref().filter(|t| !t.is_empty()) {
        html.push_str("<div class=\"tags\">");
        for tag in tags {
            let _ = write!(html, "<span class=\"tag\">{}</span>", escape_html(tag));
        }
        html.push_str("</div>\n");
    }

    let _ = writeln!(html, "<div class=\"content\">{}</div>", escape_html(&note.content));
    let _ = writeln!(
        html,
        "<footer>Note {} &middot; Generated {}</footer>",
        escape_html(&note.id),
        format_timestamp(&generated_at)
    );
    html.push_str("</body>\n</html>\n");
    html
}
