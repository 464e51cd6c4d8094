//! Best-effort structuring of free-text citations.

use std::sync::LazyLock;

use regex::Regex;

use super::document::{Reference, collapse_whitespace};
use crate::identifier::{compile_static_regex, normalize_doi};

static YEAR: LazyLock<Regex> = LazyLock::new(|| compile_static_regex(r"\b(19|20)\d{2}\b"));
static DOI_IN_TEXT: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r#"10\.\d{4,9}/[^\s"<>]+"#));
/// Start of a numbered entry: `[12]`, `12.` or `12)`.
static ENTRY_MARKER: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"^\s*(?:\[\d+\]|\d+[.)])\s+"));

impl Reference {
    /// Builds a reference from citation text, pulling out year and DOI.
    #[must_use]
    pub fn from_raw(raw: &str) -> Self {
        let raw = collapse_whitespace(ENTRY_MARKER.replace(raw, "").as_ref());
        let year = YEAR.find(&raw).map(|m| m.as_str().to_string());
        let doi = DOI_IN_TEXT
            .find(&raw)
            .and_then(|m| normalize_doi(m.as_str()));
        Self {
            raw,
            year,
            doi,
            ..Self::default()
        }
    }
}

/// Splits a plain-text reference list into one string per entry.
///
/// Numbered lists split on their markers; otherwise blank lines separate
/// entries, and without either every non-empty line is one entry.
#[must_use]
pub fn split_reference_block(block: &str) -> Vec<String> {
    let numbered = block.lines().any(|l| ENTRY_MARKER.is_match(l));
    let mut entries: Vec<String> = Vec::new();

    if numbered {
        for line in block.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match entries.last_mut() {
                Some(last) if !ENTRY_MARKER.is_match(line) => {
                    last.push(' ');
                    last.push_str(line);
                }
                _ => entries.push(line.to_string()),
            }
        }
    } else if block.contains("\n\n") {
        entries = block.split("\n\n").map(collapse_whitespace).collect();
    } else {
        entries = block.lines().map(collapse_whitespace).collect();
    }

    entries.retain(|e| !e.trim().is_empty());
    entries
}

/// [`split_reference_block`] followed by [`Reference::from_raw`].
#[must_use]
pub fn parse_reference_block(block: &str) -> Vec<Reference> {
    split_reference_block(block)
        .iter()
        .map(|entry| Reference::from_raw(entry))
        .collect()
}
