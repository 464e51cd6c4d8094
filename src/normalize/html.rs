//! Publisher landing pages saved as HTML.
//!
//! Bibliographic fields come from Highwire `citation_*` meta tags when
//! present; body structure from `h2`/`h3` headings and paragraphs.

use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};

use super::Converter;
use super::citations::parse_reference_block;
use super::document::{
    Bibliographic, DocumentContent, Extraction, Figure, Reference, Section, Table,
    collapse_whitespace, non_empty,
};
use super::error::ParseError;
use super::sections::SectionType;
use crate::source::SourceFormat;

pub const HTML_CONFIDENCE: f64 = 0.8;

fn compile_static_selector(selector: &str) -> Selector {
    Selector::parse(selector).unwrap_or_else(|e| panic!("invalid static selector '{selector}': {e}"))
}

macro_rules! static_selector {
    ($name:ident, $selector:expr) => {
        static $name: LazyLock<Selector> = LazyLock::new(|| compile_static_selector($selector));
    };
}

static_selector!(META_TITLE, r#"meta[name="citation_title"], meta[property="og:title"]"#);
static_selector!(META_AUTHOR, r#"meta[name="citation_author"]"#);
static_selector!(META_JOURNAL, r#"meta[name="citation_journal_title"]"#);
static_selector!(
    META_DATE,
    r#"meta[name="citation_publication_date"], meta[name="citation_date"]"#
);
static_selector!(H1, "h1");
static_selector!(TITLE, "title");
static_selector!(ABSTRACT, "#abstract, .abstract, section[role=\"doc-abstract\"]");
static_selector!(FLOW, "h2, h3, p");
static_selector!(TABLE, "table");
static_selector!(CAPTION, "caption");
static_selector!(ROW, "tr");
static_selector!(HEADER_CELL, "th");
static_selector!(CELL, "td, th");
static_selector!(FIGURE, "figure");
static_selector!(FIGCAPTION, "figcaption");
static_selector!(IMG, "img");
static_selector!(REFERENCE_ITEM, "#references li, .references li, .ref-list li, li.citation");

/// Containers whose paragraphs are not body text.
const EXCLUDED_CONTAINERS: &[&str] = &["table", "figure", "nav", "header", "footer", "aside"];

#[derive(Debug, Default, Clone, Copy)]
pub struct HtmlConverter;

impl Converter for HtmlConverter {
    fn format(&self) -> SourceFormat {
        SourceFormat::Html
    }

    fn convert(&self, bytes: &[u8]) -> Result<Extraction, ParseError> {
        let html = Html::parse_document(&String::from_utf8_lossy(bytes));
        convert_html(&html)
    }
}

fn text_of(el: ElementRef<'_>) -> String {
    collapse_whitespace(&el.text().collect::<String>())
}

fn meta_content(html: &Html, selector: &Selector) -> Option<String> {
    html.select(selector)
        .find_map(|el| el.value().attr("content").and_then(non_empty))
}

fn has_class_containing(el: ElementRef<'_>, needle: &str) -> bool {
    el.value().classes().any(|c| c.contains(needle)) || el.value().id().is_some_and(|id| id.contains(needle))
}

/// Whether a paragraph sits in a float, navigation, abstract or reference list.
fn outside_body(el: ElementRef<'_>) -> bool {
    el.ancestors().filter_map(ElementRef::wrap).any(|a| {
        EXCLUDED_CONTAINERS.contains(&a.value().name())
            || has_class_containing(a, "abstract")
            || has_class_containing(a, "ref")
    })
}

fn convert_html(html: &Html) -> Result<Extraction, ParseError> {
    let title = meta_content(html, &META_TITLE)
        .or_else(|| html.select(&H1).next().map(text_of).filter(|t| !t.is_empty()))
        .or_else(|| html.select(&TITLE).next().map(text_of).filter(|t| !t.is_empty()));
    let authors: Vec<String> = html
        .select(&META_AUTHOR)
        .filter_map(|el| el.value().attr("content").and_then(non_empty))
        .collect();
    let bibliographic = Bibliographic {
        title,
        authors,
        venue: meta_content(html, &META_JOURNAL),
        date: meta_content(html, &META_DATE),
    };

    let mut sections = Vec::new();
    if let Some(text) = html.select(&ABSTRACT).next().map(text_of).and_then(|t| non_empty(&t)) {
        let text = text
            .strip_prefix("Abstract")
            .map_or(text.clone(), |rest| rest.trim().to_string());
        sections.push(Section {
            heading: Some("Abstract".to_string()),
            section_type: SectionType::Abstract,
            text,
            confidence: HTML_CONFIDENCE,
        });
    }

    let mut intro = Vec::new();
    let mut current: Option<(String, Vec<String>)> = None;
    let mut body_sections = Vec::new();
    let flush = |current: Option<(String, Vec<String>)>, out: &mut Vec<Section>| {
        if let Some((heading, paragraphs)) = current {
            let section_type = SectionType::from_heading(&heading);
            if section_type != SectionType::References && !paragraphs.is_empty() {
                out.push(Section {
                    heading: non_empty(&heading),
                    section_type,
                    text: paragraphs.join("\n\n"),
                    confidence: HTML_CONFIDENCE,
                });
            }
        }
    };
    for el in html.select(&FLOW) {
        if outside_body(el) {
            continue;
        }
        let text = text_of(el);
        if el.value().name() == "p" {
            if text.is_empty() {
                continue;
            }
            match current.as_mut() {
                Some((_, paragraphs)) => paragraphs.push(text),
                None => intro.push(text),
            }
        } else {
            flush(current.take(), &mut body_sections);
            current = Some((text, Vec::new()));
        }
    }
    flush(current.take(), &mut body_sections);

    let mut parts: Vec<String> = sections.iter().map(|s| s.text.clone()).collect();
    if !intro.is_empty() {
        parts.push(intro.join("\n\n"));
    }
    for section in body_sections {
        match &section.heading {
            Some(h) => parts.push(format!("{h}\n{}", section.text)),
            None => parts.push(section.text.clone()),
        }
        sections.push(section);
    }
    let full_text = parts.join("\n\n");

    if full_text.trim().is_empty() && bibliographic.title.is_none() {
        return Err(ParseError::empty(SourceFormat::Html));
    }

    Ok(Extraction {
        bibliographic,
        content: DocumentContent {
            full_text,
            sections,
            tables: html.select(&TABLE).map(parse_table).collect(),
            figures: html.select(&FIGURE).map(parse_figure).collect(),
            references: references(html),
            equations: Vec::new(),
        },
        warnings: Vec::new(),
    })
}

fn parse_table(table: ElementRef<'_>) -> Table {
    let mut headers = Vec::new();
    let mut rows = Vec::new();
    for row in table.select(&ROW) {
        let header_only = row.select(&CELL).all(|c| c.value().name() == "th");
        if header_only && headers.is_empty() && rows.is_empty() {
            headers = row.select(&HEADER_CELL).map(text_of).collect();
        } else {
            let cells: Vec<String> = row.select(&CELL).map(text_of).collect();
            if cells.iter().any(|c| !c.is_empty()) {
                rows.push(cells);
            }
        }
    }
    Table {
        label: None,
        caption: table.select(&CAPTION).next().map(text_of).filter(|c| !c.is_empty()),
        headers,
        rows,
        confidence: HTML_CONFIDENCE,
    }
}

fn parse_figure(figure: ElementRef<'_>) -> Figure {
    Figure {
        label: figure.value().id().map(str::to_string),
        caption: figure
            .select(&FIGCAPTION)
            .next()
            .map(text_of)
            .filter(|c| !c.is_empty()),
        file_ref: figure
            .select(&IMG)
            .next()
            .and_then(|img| img.value().attr("src"))
            .map(str::to_string),
    }
}

fn references(html: &Html) -> Vec<Reference> {
    let items: Vec<Reference> = html
        .select(&REFERENCE_ITEM)
        .map(text_of)
        .filter(|t| !t.is_empty())
        .map(|t| Reference::from_raw(&t))
        .collect();
    if !items.is_empty() {
        return items;
    }
    // Pages without list markup: paragraphs after a "References" heading.
    let mut in_references = false;
    let mut block = Vec::new();
    for el in html.select(&FLOW) {
        if el.value().name() == "p" {
            if in_references {
                block.push(text_of(el));
            }
        } else {
            in_references = SectionType::from_heading(&text_of(el)) == SectionType::References;
        }
    }
    parse_reference_block(&block.join("\n"))
}
