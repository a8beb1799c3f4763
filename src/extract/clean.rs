//! Removal of non-content wrapping around model output.
use std::borrow::Cow;
use std::sync::LazyLock;

use regex_lite::Regex;

use crate::util::contains_ascii_case_insensitive;

static THINK_SPAN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<think>.*?</think>").unwrap_or_else(|e| panic!("invalid think regex: {e}"))
});

static OPEN_THINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<think>").unwrap_or_else(|e| panic!("invalid think regex: {e}"))
});

static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"```[A-Za-z0-9_+.-]*[ \t]*").unwrap_or_else(|e| panic!("invalid fence regex: {e}"))
});

static PREVIEW_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)"preview"\s*:\s*"((?:[^"\\]|\\.)*?)""#)
        .unwrap_or_else(|e| panic!("invalid preview regex: {e}"))
});

/// Remove `<think>…</think>` spans, contents included.
///
/// An opening delimiter without its close (reasoning still streaming)
/// hides everything after it.
#[must_use]
pub fn strip_thinking(text: &str) -> Cow<'_, str> {
    let stripped = THINK_SPAN.replace_all(text, "");
    match OPEN_THINK.find(&stripped) {
        Some(open) => Cow::Owned(stripped[..open.start()].to_owned()),
        None => stripped,
    }
}

/// Strip reasoning spans and fenced code markers, whatever the language tag.
#[must_use]
pub fn strip_wrapping(text: &str) -> String {
    let without_thinking = strip_thinking(text);
    CODE_FENCE.replace_all(&without_thinking, "").into_owned()
}

/// Pull a page out of a `"preview": "..."` JSON envelope.
///
/// The match is a best-effort scan, not a JSON parse: it only succeeds on a
/// closed string field, and the unescaped value is used only when it holds a
/// document marker. Otherwise the input is returned unchanged.
#[must_use]
pub fn unwrap_preview_envelope(text: &str) -> Cow<'_, str> {
    let Some(captures) = PREVIEW_FIELD.captures(text) else {
        return Cow::Borrowed(text);
    };
    let Some(raw) = captures.get(1) else {
        return Cow::Borrowed(text);
    };
    let unescaped = unescape_json_string(raw.as_str());
    if has_document_marker(&unescaped) {
        Cow::Owned(unescaped)
    } else {
        Cow::Borrowed(text)
    }
}

/// Undo the conventional JSON string escapes.
///
/// Unknown escapes are kept verbatim.
#[must_use]
pub fn unescape_json_string(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some('/') => out.push('/'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(decoded) if hex.len() == 4 => out.push(decoded),
                    _ => {
                        out.push_str("\\u");
                        out.push_str(&hex);
                    }
                }
            }
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Whether `text` contains a doctype or an `<html` start tag.
#[must_use]
pub fn has_document_marker(text: &str) -> bool {
    contains_ascii_case_insensitive(text.as_bytes(), b"<!doctype html")
        || contains_ascii_case_insensitive(text.as_bytes(), b"<html")
}
