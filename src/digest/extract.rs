//! Recovery of JSON payloads from free-text model output.
//!
//! Models asked for "JSON only" still wrap answers in prose or markdown
//! fences. Three strategies run in order and the first parse that succeeds
//! wins: the whole trimmed text, the first fenced block, then the first
//! balanced `[...]` or `{...}` span.

use crate::digest::util::truncate_with_ellipsis;
use crate::error::ParseError;
use serde::de::DeserializeOwned;
use serde_json::Value;

const SNIPPET_CHARS: usize = 120;

pub fn extract(text: &str) -> Result<Value, ParseError> {
    let trimmed = text.trim();

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }

    if let Some(inner) = first_fenced_block(trimmed)
        && let Ok(value) = serde_json::from_str::<Value>(inner.trim())
    {
        return Ok(value);
    }

    for (open, close) in [('[', ']'), ('{', '}')] {
        if let Some(span) = balanced_span(trimmed, open, close)
            && let Ok(value) = serde_json::from_str::<Value>(span)
        {
            return Ok(value);
        }
    }

    Err(ParseError {
        snippet: truncate_with_ellipsis(trimmed, SNIPPET_CHARS),
    })
}

/// Like [`extract`], for callers that asked for a single object. When the
/// usual strategies land on an array (often a nested `tags` list inside
/// prose), the first balanced `{...}` span is tried before giving up.
/// Anything that is still not an object is a [`ParseError`].
pub fn extract_object<T: DeserializeOwned>(text: &str) -> Result<T, ParseError> {
    let value = match extract(text)? {
        Value::Object(map) => Value::Object(map),
        other => balanced_span(text.trim(), '{', '}')
            .and_then(|span| serde_json::from_str::<Value>(span).ok())
            .filter(Value::is_object)
            .ok_or_else(|| ParseError {
                snippet: format!(
                    "expected a JSON object, got {}",
                    truncate_with_ellipsis(&other.to_string(), SNIPPET_CHARS)
                ),
            })?,
    };
    serde_json::from_value(value).map_err(|err| ParseError {
        snippet: format!("unexpected shape: {err}"),
    })
}

/// Interior of the first triple-backtick fence, minus an optional `json` tag.
fn first_fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after_open = &text[start + 3..];
    let close = after_open.find("```")?;
    let body = &after_open[..close];

    match body.get(..4) {
        Some(tag) if tag.eq_ignore_ascii_case("json") => Some(&body[4..]),
        _ => Some(body),
    }
}

/// Span from the first `open` to the point its nesting depth returns to zero.
/// Only `open`/`close` characters are counted, as in a plain depth walk.
fn balanced_span(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let mut depth = 0usize;
    for (offset, ch) in text[start..].char_indices() {
        if ch == open {
            depth += 1;
        } else if ch == close {
            depth = depth.saturating_sub(1);
            if depth == 0 {
                let end = start + offset + ch.len_utf8();
                return Some(&text[start..end]);
            }
        }
    }
    None
}
