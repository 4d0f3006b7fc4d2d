//! Text canonicalization and display helpers for post content.
//!
//! Stored content may contain any of the line-break representations a
//! browser, a legacy import, or an over-eager escaping layer produces. Every
//! one of them is folded into a single `\n` before content is stored and
//! again before it is shown.

use chrono::FixedOffset;
use lazy_static::lazy_static;
use regex::Regex;

use crate::db::parse_timestamp;

const WORDS_PER_MINUTE: usize = 200;

/// Line-break spellings, longest first. The escaped forms are literal
/// backslash text that ended up in stored content.
const LINE_BREAKS: &[&str] = &[
    "\\\\r\\\\n",
    "\\\\n",
    "\\r\\n",
    "\\n\\r",
    "\\r",
    "\\n",
    "\r\n",
    "\r",
    "\n",
];

lazy_static! {
    static ref TAG_REGEX: Regex = Regex::new(r"<[^>]*>").unwrap();
    static ref WHITESPACE_REGEX: Regex = Regex::new(r"\s+").unwrap();
}

/// Collapse every line-break representation into `\n`. Idempotent.
pub fn normalize_line_endings(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;

    'scan: while !rest.is_empty() {
        for pattern in LINE_BREAKS {
            if let Some(tail) = rest.strip_prefix(pattern) {
                out.push('\n');
                rest = tail;
                continue 'scan;
            }
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            out.push(c);
        }
        rest = chars.as_str();
    }

    out
}

pub fn strip_tags(text: &str) -> String {
    TAG_REGEX.replace_all(text, "").into_owned()
}

/// Single-line preview: markup removed, line breaks and runs of whitespace
/// collapsed to one space, cut to `limit` characters.
pub fn excerpt(content: &str, limit: usize) -> String {
    let normalized = normalize_line_endings(content);
    let stripped = strip_tags(&normalized);
    let collapsed = WHITESPACE_REGEX.replace_all(stripped.trim(), " ");

    if collapsed.chars().count() <= limit {
        return collapsed.into_owned();
    }

    let mut cut: String = collapsed.chars().take(limit).collect();
    cut.truncate(cut.trim_end().len());
    cut.push('…');
    cut
}

pub fn word_count(content: &str) -> usize {
    strip_tags(&normalize_line_endings(content))
        .split_whitespace()
        .filter(|word| word.chars().any(char::is_alphanumeric))
        .count()
}

/// `max(1, ceil(words / 200))`
pub fn estimated_reading_minutes(content: &str) -> usize {
    word_count(content).div_ceil(WORDS_PER_MINUTE).max(1)
}

/// Render a stored timestamp as e.g. `January 05, 2025`, on the calendar of
/// the site's `offset`. Unparseable input is returned as-is.
pub fn format_date(timestamp: &str, offset: &FixedOffset) -> String {
    parse_timestamp(timestamp)
        .map(|dt| dt.with_timezone(offset).format("%B %d, %Y").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}
