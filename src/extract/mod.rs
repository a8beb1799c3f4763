//! Recovery of an HTML document from streamed model output.
//!
//! Extraction is an ordered list of named, pure strategies tried in turn on
//! the cleaned text; the first hit wins. [`finalize`] adds the end-of-stream
//! fallbacks so the caller always receives a renderable page.
pub mod clean;

use std::sync::LazyLock;

use regex_lite::Regex;
use serde::Serialize;

use crate::util::contains_ascii_case_insensitive;

pub use clean::{strip_thinking, strip_wrapping, unwrap_preview_envelope};

/// How much of a page a [`Document`] holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Completeness {
    /// A closed `<html>` element, optionally with doctype.
    Complete,
    /// Opened but not yet closed; provisional.
    Partial,
    /// Built at end of stream from a partial or marker-free answer.
    Repaired,
}

/// A recovered HTML document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub html: String,
    pub completeness: Completeness,
}

impl Document {
    fn new(html: String, completeness: Completeness) -> Self {
        Self { html, completeness }
    }
}

/// A single extraction rule over cleaned text.
pub type Strategy = fn(&str) -> Option<Document>;

/// Strategies in priority order.
pub const STRATEGIES: [(&str, Strategy); 3] = [
    ("doctype_document", doctype_document),
    ("root_element_document", root_element_document),
    ("partial_document", partial_document),
];

static DOCTYPE_DOCUMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<!DOCTYPE\s+html.*</html\s*>")
        .unwrap_or_else(|e| panic!("invalid doctype regex: {e}"))
});

static ROOT_ELEMENT_DOCUMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<html[\s>].*</html\s*>").unwrap_or_else(|e| panic!("invalid root regex: {e}"))
});

static DOCUMENT_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<!DOCTYPE\s+html|<html[\s>]")
        .unwrap_or_else(|e| panic!("invalid start regex: {e}"))
});

static BODY_OPEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<body[\s>]").unwrap_or_else(|e| panic!("invalid body regex: {e}"))
});

const DOCTYPE_PREAMBLE: &str = "<!DOCTYPE html>\n";

/// A doctype declaration through the last closing `</html>`, verbatim.
#[must_use]
pub fn doctype_document(text: &str) -> Option<Document> {
    DOCTYPE_DOCUMENT
        .find(text)
        .map(|m| Document::new(m.as_str().to_owned(), Completeness::Complete))
}

/// An `<html>` element without doctype; a doctype preamble is synthesized.
#[must_use]
pub fn root_element_document(text: &str) -> Option<Document> {
    ROOT_ELEMENT_DOCUMENT.find(text).map(|m| {
        let mut html = String::with_capacity(DOCTYPE_PREAMBLE.len() + m.len());
        html.push_str(DOCTYPE_PREAMBLE);
        html.push_str(m.as_str());
        Document::new(html, Completeness::Complete)
    })
}

/// Everything from the first document start marker onward.
#[must_use]
pub fn partial_document(text: &str) -> Option<Document> {
    DOCUMENT_START
        .find(text)
        .map(|m| Document::new(text[m.start()..].to_owned(), Completeness::Partial))
}

/// Clean `text` the way every strategy expects it.
#[must_use]
pub fn prepare(text: &str) -> String {
    let stripped = strip_wrapping(text);
    let working = unwrap_preview_envelope(&stripped);
    working.trim().to_owned()
}

/// Best-available document for the text so far, or `None` when no
/// document marker exists yet.
#[must_use]
pub fn extract(text: &str) -> Option<Document> {
    let working = prepare(text);
    STRATEGIES.iter().find_map(|(name, strategy)| {
        let doc = strategy(&working)?;
        tracing::trace!(strategy = *name, bytes = doc.html.len(), "extraction matched");
        Some(doc)
    })
}

/// End-of-stream extraction; never returns an empty document.
///
/// A partial page gets its missing `</body>`/`</html>` appended; text with
/// no document markers at all is wrapped in a minimal page.
#[must_use]
pub fn finalize(text: &str) -> Document {
    match extract(text) {
        Some(doc) if doc.completeness == Completeness::Complete => doc,
        Some(doc) => close_partial(&doc.html),
        None => wrap_fallback(strip_wrapping(text).trim()),
    }
}

/// Append the closing tags a partial page is missing.
#[must_use]
pub fn close_partial(html: &str) -> Document {
    let mut closed = html.trim_end().to_owned();
    if BODY_OPEN.is_match(&closed)
        && !contains_ascii_case_insensitive(closed.as_bytes(), b"</body")
    {
        closed.push_str("\n</body>");
    }
    if !contains_ascii_case_insensitive(closed.as_bytes(), b"</html") {
        closed.push_str("\n</html>");
    }
    Document::new(closed, Completeness::Repaired)
}

/// Wrap raw model text in a minimal renderable page.
#[must_use]
pub fn wrap_fallback(raw: &str) -> Document {
    let mut html = String::with_capacity(WRAP_HEAD.len() + raw.len() + WRAP_TAIL.len());
    html.push_str(WRAP_HEAD);
    html.push_str(raw);
    html.push_str(WRAP_TAIL);
    Document::new(html, Completeness::Repaired)
}

const WRAP_HEAD: &str = "<!DOCTYPE html>
<html lang=\"en\">
<head>
  <meta charset=\"UTF-8\">
  <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">
  <title>Generated Page</title>
  <script src=\"https://cdn.tailwindcss.com\"></script>
</head>
<body>
  <div class=\"container mx-auto p-4\">
";

const WRAP_TAIL: &str = "
  </div>
</body>
</html>";
