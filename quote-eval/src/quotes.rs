//! Quote span parsing and format validation
//!
//! Quotes are delimited by `##begin_quote##` / `##end_quote##` markers. Every
//! other component reads quote sets through [`parse_quotes`].

use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

/// Opening delimiter of a quote block
pub const BEGIN_MARKER: &str = "##begin_quote##";
/// Closing delimiter of a quote block
pub const END_MARKER: &str = "##end_quote##";

const BYTE_ORDER_MARK: char = '\u{feff}';

static QUOTE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)##begin_quote##\s*(.*?)\s*##end_quote##")
        .expect("quote pattern is a valid regex")
});

/// Extract the block contents between every marker pair, untrimmed beyond
/// the whitespace the pattern itself absorbs.
fn quote_blocks(text: &str) -> Vec<&str> {
    QUOTE_PATTERN
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
        .collect()
}

/// Parse all quote spans from `text`, in order.
///
/// Absent or malformed delimiters yield an empty list. Blocks that are empty
/// after trimming are dropped; duplicates are kept.
pub fn parse_quotes(text: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }

    quote_blocks(text)
        .into_iter()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .map(str::to_string)
        .collect()
}

/// Count the quotes in `text` without allocating them.
pub fn count_quotes(text: &str) -> usize {
    quote_blocks(text)
        .into_iter()
        .filter(|q| !q.trim().is_empty())
        .count()
}

fn strip_whitespace(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Binary format score: `1.0` when `text` is nothing but quote blocks
/// (whitespace allowed anywhere), `0.0` otherwise.
pub fn format_score(text: &str) -> f64 {
    let text = text.trim().trim_matches(BYTE_ORDER_MARK);
    let compact = strip_whitespace(text);
    if compact.is_empty() {
        return 0.0;
    }

    let blocks = quote_blocks(text);
    if blocks.is_empty() {
        return 0.0;
    }

    let reconstructed: String = blocks
        .iter()
        .map(|block| format!("{BEGIN_MARKER}{block}{END_MARKER}"))
        .collect();
    let reconstructed = strip_whitespace(&reconstructed);

    if reconstructed == compact {
        return 1.0;
    }

    // Visually identical text can differ in composed vs decomposed form.
    let nfc_text: String = compact.nfc().collect();
    let nfc_reconstructed: String = reconstructed.nfc().collect();
    if nfc_text == nfc_reconstructed {
        1.0
    } else {
        0.0
    }
}

/// Wrap plain strings into a quote block text, one block per line.
pub fn render_quotes<S: AsRef<str>>(quotes: &[S]) -> String {
    quotes
        .iter()
        .map(|q| format!("{BEGIN_MARKER} {} {END_MARKER}", q.as_ref()))
        .collect::<Vec<_>>()
        .join("\n")
}
