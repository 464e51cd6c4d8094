//! Section classification and plain-text section splitting.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::document::{Section, collapse_whitespace};
use crate::identifier::compile_static_regex;

/// Semantic role of a section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionType {
    Abstract,
    Introduction,
    Methods,
    Results,
    Discussion,
    Conclusion,
    References,
    Unknown,
}

/// Leading numbering such as `1.`, `2.3 `, `IV.` or `A)`.
static HEADING_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"^(?:\d+(?:\.\d+)*\.?|[IVXLC]+\.|[A-Z]\))\s*"));

/// Longest line (in chars) treated as a heading in plain text.
const MAX_HEADING_CHARS: usize = 60;

impl SectionType {
    /// Infers the section type from a heading.
    #[must_use]
    pub fn from_heading(heading: &str) -> Self {
        let h = strip_numbering(heading).to_lowercase();
        if h.contains("abstract") || h == "summary" {
            Self::Abstract
        } else if h.contains("introduction") || h.starts_with("background") {
            Self::Introduction
        } else if h.contains("method") || h.contains("material") || h.contains("experimental") {
            Self::Methods
        } else if h.contains("result") {
            Self::Results
        } else if h.contains("discussion") {
            Self::Discussion
        } else if h.contains("conclusion") || h.contains("concluding") {
            Self::Conclusion
        } else if h.contains("reference") || h.contains("bibliography") || h == "literature cited" {
            Self::References
        } else {
            Self::Unknown
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Abstract => "abstract",
            Self::Introduction => "introduction",
            Self::Methods => "methods",
            Self::Results => "results",
            Self::Discussion => "discussion",
            Self::Conclusion => "conclusion",
            Self::References => "references",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for SectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn strip_numbering(heading: &str) -> &str {
    let trimmed = heading.trim();
    HEADING_NUMBER
        .find(trimmed)
        .map_or(trimmed, |m| &trimmed[m.end()..])
        .trim()
}

/// Recognizes a standalone plain-text line as a known section heading.
///
/// Only short lines of at most five words whose type is not `Unknown`
/// qualify, so sentences that merely mention "results" are not split on.
#[must_use]
pub fn heading_line(line: &str) -> Option<SectionType> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.chars().count() > MAX_HEADING_CHARS {
        return None;
    }
    let words = strip_numbering(trimmed).split_whitespace().count();
    if words == 0
        || words > 5
        || trimmed.ends_with(',')
        || trimmed.ends_with(';')
        || (trimmed.ends_with('.') && words > 2)
    {
        return None;
    }
    match SectionType::from_heading(trimmed) {
        SectionType::Unknown => None,
        found => Some(found),
    }
}

/// Plain text split into sections plus the raw reference block, if any.
#[derive(Debug, Default)]
pub struct SplitText {
    /// Text before the first recognized heading.
    pub preamble: String,
    pub sections: Vec<Section>,
    pub references: Option<String>,
}

/// Splits text at recognized heading lines.
///
/// The references section is returned separately and not listed as a
/// section; its lines are parsed into citations by the caller.
#[must_use]
pub fn split_sections(text: &str, confidence: f64) -> SplitText {
    let mut split = SplitText::default();
    let mut current: Option<OpenSection<'_>> = None;
    let mut preamble: Vec<&str> = Vec::new();

    for line in text.lines() {
        if let Some(section_type) = heading_line(line) {
            close_section(&mut split, current.take(), confidence);
            current = Some((collapse_whitespace(line), section_type, Vec::new()));
        } else if let Some((_, _, lines)) = current.as_mut() {
            lines.push(line);
        } else {
            preamble.push(line);
        }
    }
    close_section(&mut split, current.take(), confidence);
    split.preamble = preamble.join("\n");
    split
}

type OpenSection<'a> = (String, SectionType, Vec<&'a str>);

fn close_section(split: &mut SplitText, done: Option<OpenSection<'_>>, confidence: f64) {
    let Some((heading, section_type, lines)) = done else {
        return;
    };
    if section_type == SectionType::References {
        split.references = Some(lines.join("\n"));
        return;
    }
    split.sections.push(Section {
        heading: Some(heading),
        section_type,
        text: collapse_whitespace(&lines.join("\n")),
        confidence,
    });
}
