//! Unwrap-then-parse: free-text model reply → `serde_json::Value`.
//!
//! Models are told to answer with bare JSON and regularly ignore it:
//!
//! - the whole reply wrapped in ```` ```json … ``` ```` fences
//! - a sentence of preamble before a fenced block
//! - an opening fence that is never closed (missing trailer, cut-off reply)
//! - CRLF line endings, a BOM, zero-width spaces
//!
//! [`parse_structured`] is the single entry point. It strips those wrappers,
//! parses what is left, and returns [`AdvocateError::MalformedResponse`]
//! with a truncated raw excerpt when the result is not JSON.
//!
//! Unwrapping is idempotent: `unwrap_response(unwrap_response(s)) ==
//! unwrap_response(s)` for any `s`, so callers never need to track whether
//! text was already unwrapped.

use crate::error::AdvocateError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// First fenced block, with an optional info string (`json`, `JSON`, …).
/// An unclosed fence runs to the end of the text.
static RE_FENCED_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)(?:```|\z)").expect("valid regex")
});

/// Strip formatting wrappers from a model reply.
///
/// Returns the contents of the first fenced block if there is one (up to
/// the end of the text when the fence is never closed), the trimmed text
/// otherwise. Invisible characters are removed first so a
/// leading BOM cannot hide a fence.
pub fn unwrap_response(text: &str) -> String {
    let cleaned = remove_invisible_chars(text);
    let inner = match RE_FENCED_BLOCK.captures(&cleaned) {
        Some(caps) => caps.get(1).map_or("", |m| m.as_str()).to_string(),
        None => cleaned,
    };
    inner.trim().to_string()
}

/// Unwrap `text` and parse it as JSON.
///
/// `excerpt_chars` bounds the raw excerpt kept in the error.
pub fn parse_structured(text: &str, excerpt_chars: usize) -> Result<Value, AdvocateError> {
    let unwrapped = unwrap_response(text);
    if unwrapped.is_empty() {
        return Err(AdvocateError::MalformedResponse {
            details: "model returned an empty response".into(),
            raw_excerpt: excerpt(text, excerpt_chars),
        });
    }

    serde_json::from_str(&unwrapped).map_err(|e| AdvocateError::MalformedResponse {
        details: e.to_string(),
        raw_excerpt: excerpt(text, excerpt_chars),
    })
}

/// The first `max_chars` characters of `text`, cut on a char boundary.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}
