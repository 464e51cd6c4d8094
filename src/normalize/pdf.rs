//! PDF text extraction plus layout heuristics.
//!
//! pdf-extract gives a flat text stream; sections, tables, figures and the
//! reference list are recovered from line patterns, so their confidence is
//! lower than for markup-based formats.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use super::Converter;
use super::citations::parse_reference_block;
use super::document::{Bibliographic, DocumentContent, Extraction, Figure, Table, collapse_whitespace};
use super::error::ParseError;
use super::sections::split_sections;
use crate::identifier::compile_static_regex;
use crate::source::SourceFormat;

pub const PDF_SECTION_CONFIDENCE: f64 = 0.75;
pub const PDF_TABLE_CONFIDENCE: f64 = 0.6;

static TABLE_CAPTION: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r"^\s*(?i:table)\s+(\d+|[IVX]+)\s*[.:|]\s*(.*)$")
});
static FIGURE_CAPTION: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r"^\s*(?i:figure|fig\.)\s*(\d+)\s*[.:|]\s*(.*)$")
});
/// Column gap in extracted table rows.
static COLUMN_GAP: LazyLock<Regex> = LazyLock::new(|| compile_static_regex(r"\s{2,}|\t"));

/// Shortest first line accepted as a title.
const MIN_TITLE_CHARS: usize = 10;

#[derive(Debug, Default, Clone, Copy)]
pub struct PdfConverter;

impl Converter for PdfConverter {
    fn format(&self) -> SourceFormat {
        SourceFormat::Pdf
    }

    fn convert(&self, bytes: &[u8]) -> Result<Extraction, ParseError> {
        let text = extract_text(bytes)?;
        extract_from_text(&text)
    }
}

/// Runs pdf-extract, which panics on some malformed inputs.
fn extract_text(bytes: &[u8]) -> Result<String, ParseError> {
    match catch_unwind(AssertUnwindSafe(|| pdf_extract::extract_text_from_mem(bytes))) {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(ParseError::extraction(SourceFormat::Pdf, e.to_string())),
        Err(_) => Err(ParseError::extraction(
            SourceFormat::Pdf,
            "extractor panicked on malformed input",
        )),
    }
}

/// Structures already-extracted PDF text.
pub(crate) fn extract_from_text(text: &str) -> Result<Extraction, ParseError> {
    let text = text.replace("\r\n", "\n").replace('\u{c}', "\n");
    if text.trim().is_empty() {
        return Err(ParseError::empty(SourceFormat::Pdf));
    }

    let split = split_sections(&text, PDF_SECTION_CONFIDENCE);
    let title = split
        .preamble
        .lines()
        .map(str::trim)
        .find(|l| l.chars().count() > MIN_TITLE_CHARS)
        .map(collapse_whitespace);
    let references = split
        .references
        .as_deref()
        .map(parse_reference_block)
        .unwrap_or_default();
    let (tables, figures) = captions(&text);

    debug!(
        sections = split.sections.len(),
        tables = tables.len(),
        figures = figures.len(),
        references = references.len(),
        "pdf heuristics applied"
    );

    Ok(Extraction {
        bibliographic: Bibliographic {
            title,
            ..Bibliographic::default()
        },
        content: DocumentContent {
            full_text: paragraphs(&text),
            sections: split.sections,
            tables,
            figures,
            references,
            equations: Vec::new(),
        },
        warnings: Vec::new(),
    })
}

/// Paragraphs separated by blank lines, each whitespace-collapsed.
fn paragraphs(text: &str) -> String {
    text.split("\n\n")
        .map(collapse_whitespace)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Table and figure captions, with table rows read from the lines below.
fn captions(text: &str) -> (Vec<Table>, Vec<Figure>) {
    let lines: Vec<&str> = text.lines().collect();
    let mut tables = Vec::new();
    let mut figures = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        if let Some(caps) = TABLE_CAPTION.captures(line) {
            let (headers, rows) = table_rows(&lines[i + 1..]);
            tables.push(Table {
                label: Some(format!("Table {}", &caps[1])),
                caption: Some(collapse_whitespace(&caps[2])).filter(|c| !c.is_empty()),
                headers,
                rows,
                confidence: PDF_TABLE_CONFIDENCE,
            });
        } else if let Some(caps) = FIGURE_CAPTION.captures(line) {
            figures.push(Figure {
                label: Some(format!("Figure {}", &caps[1])),
                caption: Some(collapse_whitespace(&caps[2])).filter(|c| !c.is_empty()),
                file_ref: None,
            });
        }
    }
    (tables, figures)
}

/// Reads gap-separated rows until the first line that is not one.
fn table_rows(lines: &[&str]) -> (Vec<String>, Vec<Vec<String>>) {
    let mut rows: Vec<Vec<String>> = Vec::new();
    for line in lines.iter().skip_while(|l| l.trim().is_empty()) {
        let cells: Vec<String> = COLUMN_GAP
            .split(line.trim())
            .map(str::to_string)
            .filter(|c| !c.is_empty())
            .collect();
        if cells.len() < 2 {
            break;
        }
        rows.push(cells);
    }
    if rows.is_empty() {
        return (Vec::new(), Vec::new());
    }
    let headers = rows.remove(0);
    (headers, rows)
}
