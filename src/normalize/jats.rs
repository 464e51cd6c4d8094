//! JATS / NLM article XML (PMC, Europe PMC `fullTextXML`).
//!
//! Streaming quick-xml pass with an element stack; text is routed to the
//! structure it belongs to (front matter, body section, table cell, figure
//! caption, citation, formula) by looking at the enclosing elements.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use super::Converter;
use super::document::{
    Bibliographic, DocumentContent, Equation, Extraction, Figure, Reference, Section, Table,
    collapse_whitespace, non_empty,
};
use super::error::ParseError;
use super::sections::SectionType;
use crate::identifier::normalize_doi;
use crate::source::SourceFormat;

/// Structural confidence for sections and tables taken from JATS markup.
pub const JATS_CONFIDENCE: f64 = 0.95;

/// Elements whose end separates words from what follows.
const BLOCK_ELEMENTS: &[&str] = &[
    "p",
    "title",
    "label",
    "caption",
    "list-item",
    "td",
    "th",
    "article-title",
    "source",
    "year",
    "surname",
    "given-names",
    "mixed-citation",
    "element-citation",
    "tex-math",
    "sec",
    "abstract",
];

#[derive(Debug, Default, Clone, Copy)]
pub struct JatsConverter;

impl Converter for JatsConverter {
    fn format(&self) -> SourceFormat {
        SourceFormat::Xml
    }

    fn convert(&self, bytes: &[u8]) -> Result<Extraction, ParseError> {
        let mut parser = JatsParser::default();
        parser.run(bytes)?;
        parser.finish()
    }
}

#[derive(Debug, Default)]
struct SectionDraft {
    heading: String,
    text: String,
    parent: Option<usize>,
}

#[derive(Debug, Default)]
struct TableDraft {
    label: String,
    caption: String,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    row: Vec<String>,
    row_has_th: bool,
    row_in_thead: bool,
    cell: String,
}

#[derive(Debug, Default)]
struct FigureDraft {
    label: String,
    caption: String,
    file_ref: Option<String>,
}

#[derive(Debug, Default)]
struct ReferenceDraft {
    raw: String,
    title: String,
    year: String,
    doi: String,
    authors: Vec<String>,
    surname: String,
    given: String,
}

#[derive(Debug, Default)]
struct EquationDraft {
    label: String,
    tex: String,
    other: String,
}

#[derive(Debug, Default)]
struct JatsParser {
    stack: Vec<String>,
    title: String,
    venue: String,
    authors: Vec<String>,
    surname: String,
    given: String,
    date: [String; 3],
    date_open: bool,
    date_done: bool,
    abstract_text: String,
    body_intro: String,
    sections: Vec<SectionDraft>,
    open_sections: Vec<usize>,
    table: Option<TableDraft>,
    tables: Vec<Table>,
    figure: Option<FigureDraft>,
    figures: Vec<Figure>,
    reference: Option<ReferenceDraft>,
    references: Vec<Reference>,
    doi_open: bool,
    equation: Option<EquationDraft>,
    equations: Vec<Equation>,
}

fn local_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).into_owned()
}

fn attribute(e: &BytesStart<'_>, key: &str) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == key.as_bytes())
        .and_then(|a| a.unescape_value().ok().map(std::borrow::Cow::into_owned))
}

impl JatsParser {
    fn run(&mut self, bytes: &[u8]) -> Result<(), ParseError> {
        let mut reader = Reader::from_reader(bytes);
        let mut buf = Vec::new();
        loop {
            let event = reader.read_event_into(&mut buf).map_err(|e| {
                ParseError::malformed(
                    SourceFormat::Xml,
                    format!("{e} at byte {}", reader.buffer_position()),
                )
            })?;
            match event {
                Event::Start(ref e) => {
                    let name = local_name(e.local_name().as_ref());
                    self.on_start(&name, e);
                    self.stack.push(name);
                }
                Event::Empty(ref e) => {
                    let name = local_name(e.local_name().as_ref());
                    self.on_empty(&name, e);
                }
                Event::Text(ref e) => {
                    // Undeclared entities (`&nbsp;` from a DTD) fall back to the raw text.
                    let text = e.unescape().map_or_else(
                        |_| String::from_utf8_lossy(e).into_owned(),
                        std::borrow::Cow::into_owned,
                    );
                    self.on_text(&text);
                }
                Event::CData(e) => {
                    let text = String::from_utf8_lossy(&e.into_inner()).into_owned();
                    self.on_text(&text);
                }
                Event::End(ref e) => {
                    let name = local_name(e.local_name().as_ref());
                    if BLOCK_ELEMENTS.contains(&name.as_str()) {
                        self.on_text(" ");
                    }
                    self.stack.pop();
                    self.on_end(&name);
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }
        Ok(())
    }

    fn inside(&self, name: &str) -> bool {
        self.stack.iter().any(|n| n == name)
    }

    fn section_title_open(&self) -> bool {
        self.stack
            .iter()
            .rposition(|n| n == "title")
            .is_some_and(|i| i > 0 && self.stack[i - 1] == "sec")
    }

    fn on_start(&mut self, name: &str, e: &BytesStart<'_>) {
        match name {
            "sec" if self.inside("body") && self.table.is_none() && self.figure.is_none() => {
                let parent = self.open_sections.last().copied();
                self.sections.push(SectionDraft {
                    parent,
                    ..SectionDraft::default()
                });
                self.open_sections.push(self.sections.len() - 1);
            }
            "table-wrap" => self.table = Some(TableDraft::default()),
            "tr" => {
                let in_thead = self.inside("thead");
                if let Some(table) = self.table.as_mut() {
                    table.row.clear();
                    table.row_has_th = false;
                    table.row_in_thead = in_thead;
                }
            }
            "th" | "td" => {
                if let Some(table) = self.table.as_mut() {
                    table.cell.clear();
                    table.row_has_th |= name == "th";
                }
            }
            "fig" if self.table.is_none() => self.figure = Some(FigureDraft::default()),
            "ref" if self.inside("ref-list") => self.reference = Some(ReferenceDraft::default()),
            "pub-id" | "ext-link" if self.reference.is_some() => {
                let kind = attribute(e, "pub-id-type").or_else(|| attribute(e, "ext-link-type"));
                self.doi_open = kind.as_deref() == Some("doi");
            }
            "disp-formula" => self.equation = Some(EquationDraft::default()),
            "name" => {
                if let Some(reference) = self.reference.as_mut() {
                    reference.surname.clear();
                    reference.given.clear();
                } else {
                    self.surname.clear();
                    self.given.clear();
                }
            }
            "pub-date" if self.inside("article-meta") => {
                self.date_open = !self.date_done;
            }
            "graphic" => self.on_empty(name, e),
            _ => {}
        }
    }

    fn on_empty(&mut self, name: &str, e: &BytesStart<'_>) {
        if name == "graphic" {
            if let Some(figure) = self.figure.as_mut() {
                if figure.file_ref.is_none() {
                    figure.file_ref = attribute(e, "href");
                }
            }
        }
    }

    fn on_text(&mut self, text: &str) {
        if self.table.is_some() {
            let in_cell = self.inside("th") || self.inside("td");
            let in_label = self.inside("label");
            let in_caption = self.inside("caption");
            if let Some(table) = self.table.as_mut() {
                if in_cell {
                    table.cell.push_str(text);
                } else if in_label {
                    table.label.push_str(text);
                } else if in_caption {
                    table.caption.push_str(text);
                }
            }
            return;
        }

        if self.figure.is_some() {
            let in_label = self.inside("label");
            let in_caption = self.inside("caption");
            if let Some(figure) = self.figure.as_mut() {
                if in_label {
                    figure.label.push_str(text);
                } else if in_caption {
                    figure.caption.push_str(text);
                }
            }
            return;
        }

        if self.reference.is_some() {
            let in_title = self.inside("article-title");
            let in_surname = self.inside("surname");
            let in_given = self.inside("given-names");
            let in_year = self.inside("year");
            let doi_open = self.doi_open;
            if let Some(reference) = self.reference.as_mut() {
                reference.raw.push_str(text);
                if in_title {
                    reference.title.push_str(text);
                } else if in_surname {
                    reference.surname.push_str(text);
                } else if in_given {
                    reference.given.push_str(text);
                } else if in_year {
                    reference.year.push_str(text);
                } else if doi_open {
                    reference.doi.push_str(text);
                }
            }
            return;
        }

        if self.equation.is_some() {
            let in_label = self.inside("label");
            let in_tex = self.inside("tex-math");
            if let Some(equation) = self.equation.as_mut() {
                if in_label {
                    equation.label.push_str(text);
                } else if in_tex {
                    equation.tex.push_str(text);
                } else {
                    equation.other.push_str(text);
                }
            }
            return;
        }

        if self.inside("front") || self.inside("article-meta") {
            if self.inside("journal-title") {
                self.venue.push_str(text);
            } else if self.inside("title-group") && self.inside("article-title") {
                self.title.push_str(text);
            } else if self.inside("contrib") && self.inside("surname") {
                self.surname.push_str(text);
            } else if self.inside("contrib") && self.inside("given-names") {
                self.given.push_str(text);
            } else if self.inside("abstract") {
                self.abstract_text.push_str(text);
            } else if self.date_open {
                let slot = match self.stack.last().map(String::as_str) {
                    Some("year") => Some(0),
                    Some("month") => Some(1),
                    Some("day") => Some(2),
                    _ => None,
                };
                if let Some(slot) = slot {
                    self.date[slot].push_str(text.trim());
                }
            }
            return;
        }

        if self.inside("body") {
            if self.section_title_open() {
                if let Some(&idx) = self.open_sections.last() {
                    self.sections[idx].heading.push_str(text);
                }
            } else if let Some(&idx) = self.open_sections.last() {
                self.sections[idx].text.push_str(text);
            } else {
                self.body_intro.push_str(text);
            }
        }
    }

    fn on_end(&mut self, name: &str) {
        match name {
            "sec" if self.inside("body") && self.table.is_none() && self.figure.is_none() => {
                self.open_sections.pop();
            }
            "th" | "td" => {
                if let Some(table) = self.table.as_mut() {
                    let cell = collapse_whitespace(&table.cell);
                    table.row.push(cell);
                    table.cell.clear();
                }
            }
            "tr" => {
                if let Some(table) = self.table.as_mut() {
                    let row = std::mem::take(&mut table.row);
                    let header_row = table.row_in_thead
                        || (table.row_has_th && table.headers.is_empty() && table.rows.is_empty());
                    if header_row && table.headers.is_empty() {
                        table.headers = row;
                    } else if !row.is_empty() {
                        table.rows.push(row);
                    }
                }
            }
            "table-wrap" => {
                if let Some(draft) = self.table.take() {
                    self.tables.push(Table {
                        label: non_empty(&draft.label),
                        caption: non_empty(&draft.caption),
                        headers: draft.headers,
                        rows: draft.rows,
                        confidence: JATS_CONFIDENCE,
                    });
                }
            }
            "fig" => {
                if let Some(draft) = self.figure.take() {
                    self.figures.push(Figure {
                        label: non_empty(&draft.label),
                        caption: non_empty(&draft.caption),
                        file_ref: draft.file_ref,
                    });
                }
            }
            "name" => {
                if let Some(reference) = self.reference.as_mut() {
                    if let Some(author) = join_name(&reference.given, &reference.surname) {
                        reference.authors.push(author);
                    }
                } else if self.inside("contrib") {
                    if let Some(author) = join_name(&self.given, &self.surname) {
                        self.authors.push(author);
                    }
                }
            }
            "pub-id" | "ext-link" => self.doi_open = false,
            "ref" => {
                if let Some(draft) = self.reference.take() {
                    if let Some(raw) = non_empty(&draft.raw) {
                        self.references.push(Reference {
                            raw,
                            title: non_empty(&draft.title),
                            authors: draft.authors,
                            year: non_empty(&draft.year),
                            doi: normalize_doi(draft.doi.trim()),
                        });
                    }
                }
            }
            "disp-formula" => {
                if let Some(draft) = self.equation.take() {
                    let tex = non_empty(&draft.tex).or_else(|| non_empty(&draft.other));
                    if let Some(tex) = tex {
                        self.equations.push(Equation {
                            label: non_empty(&draft.label),
                            tex,
                        });
                    }
                }
            }
            "pub-date" if self.date_open => {
                self.date_open = false;
                self.date_done = !self.date[0].is_empty();
            }
            _ => {}
        }
    }

    fn date(&self) -> Option<String> {
        let [year, month, day] = &self.date;
        if year.is_empty() {
            return None;
        }
        let pad = |s: &str| format!("{s:0>2}");
        Some(match (month.is_empty(), day.is_empty()) {
            (true, _) => year.clone(),
            (false, true) => format!("{year}-{}", pad(month)),
            (false, false) => format!("{year}-{}-{}", pad(month), pad(day)),
        })
    }

    fn finish(self) -> Result<Extraction, ParseError> {
        let bibliographic = Bibliographic {
            title: non_empty(&self.title),
            authors: self.authors.clone(),
            venue: non_empty(&self.venue),
            date: self.date(),
        };

        let mut sections = Vec::new();
        if let Some(text) = non_empty(&self.abstract_text) {
            sections.push(Section {
                heading: Some("Abstract".to_string()),
                section_type: SectionType::Abstract,
                text,
                confidence: JATS_CONFIDENCE,
            });
        }

        // Subsections without a recognizable heading inherit the parent's type.
        let mut types: Vec<SectionType> = Vec::with_capacity(self.sections.len());
        for draft in &self.sections {
            let own = SectionType::from_heading(&draft.heading);
            let resolved = match (own, draft.parent) {
                (SectionType::Unknown, Some(parent)) => types[parent],
                _ => own,
            };
            types.push(resolved);
        }

        let mut parts: Vec<String> = sections.iter().map(|s| s.text.clone()).collect();
        parts.extend(non_empty(&self.body_intro));

        for (draft, section_type) in self.sections.iter().zip(types) {
            let heading = non_empty(&draft.heading);
            let Some(text) = non_empty(&draft.text) else {
                parts.extend(heading);
                continue;
            };
            match &heading {
                Some(h) => parts.push(format!("{h}\n{text}")),
                None => parts.push(text.clone()),
            }
            sections.push(Section {
                heading,
                section_type,
                text,
                confidence: JATS_CONFIDENCE,
            });
        }

        let full_text = parts.join("\n\n");
        if full_text.trim().is_empty() && bibliographic.title.is_none() && self.tables.is_empty() {
            return Err(ParseError::empty(SourceFormat::Xml));
        }

        Ok(Extraction {
            bibliographic,
            content: DocumentContent {
                full_text,
                sections,
                tables: self.tables,
                figures: self.figures,
                references: self.references,
                equations: self.equations,
            },
            warnings: Vec::new(),
        })
    }
}

fn join_name(given: &str, surname: &str) -> Option<String> {
    non_empty(&format!("{given} {surname}"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<article xmlns:xlink="http://www.w3.org/1999/xlink">
  <front>
    <journal-meta><journal-title-group><journal-title>Journal of Tests</journal-title></journal-title-group></journal-meta>
    <article-meta>
      <article-id pub-id-type="pmcid">PMC999</article-id>
      <title-group><article-title>KRAS signalling in <italic>vitro</italic></article-title></title-group>
      <contrib-group>
        <contrib contrib-type="author"><name><surname>Doe</surname><given-names>Jane</given-names></name></contrib>
        <contrib contrib-type="author"><name><surname>Roe</surname><given-names>Rick</given-names></name></contrib>
      </contrib-group>
      <pub-date pub-type="epub"><day>7</day><month>3</month><year>2021</year></pub-date>
      <pub-date pub-type="ppub"><year>2022</year></pub-date>
      <abstract><p>We study KRAS &amp; friends.</p></abstract>
    </article-meta>
  </front>
  <body>
    <sec><title>1. Introduction</title><p>KRAS is a <italic>GTPase</italic>.</p><p>Second paragraph.</p></sec>
    <sec><title>Methods</title>
      <sec><title>Cell culture</title><p>Cells were grown.</p></sec>
      <disp-formula id="e1"><label>(1)</label><tex-math><![CDATA[E = mc^2]]></tex-math></disp-formula>
    </sec>
    <sec><title>Results</title><p>It worked.</p>
      <table-wrap id="t1"><label>Table 1</label><caption><p>Cell counts</p></caption>
        <table><thead><tr><th>Line</th><th>Count</th></tr></thead>
        <tbody><tr><td>A549</td><td>10</td></tr><tr><td>HeLa</td><td>12</td></tr></tbody></table>
      </table-wrap>
      <fig id="f1"><label>Figure 1</label><caption><p>A plot.</p></caption><graphic xlink:href="fig1.jpg"/></fig>
    </sec>
  </body>
  <back>
    <ref-list>
      <ref id="r1"><element-citation><person-group><name><surname>Smith</surname><given-names>A</given-names></name></person-group>
        <article-title>Old results</article-title><source>Nature</source><year>2001</year>
        <pub-id pub-id-type="doi">10.1038/OLD1</pub-id></element-citation></ref>
      <ref id="r2"><mixed-citation>Brown B. Another paper. Cell. 2005.</mixed-citation></ref>
    </ref-list>
  </back>
</article>"#;

    fn convert(xml: &str) -> Result<Extraction, ParseError> {
        JatsConverter.convert(xml.as_bytes())
    }

    #[test]
    fn test_front_matter() {
        let ex = convert(SAMPLE).unwrap();
        let bib = &ex.bibliographic;
        assert_eq!(bib.title.as_deref(), Some("KRAS signalling in vitro"));
        assert_eq!(bib.authors, vec!["Jane Doe", "Rick Roe"]);
        assert_eq!(bib.venue.as_deref(), Some("Journal of Tests"));
        assert_eq!(bib.date.as_deref(), Some("2021-03-07"));
    }

    #[test]
    fn test_sections_with_types() {
        let ex = convert(SAMPLE).unwrap();
        let sections: Vec<_> = ex
            .content
            .sections
            .iter()
            .map(|s| (s.heading.clone().unwrap_or_default(), s.section_type))
            .collect();
        assert_eq!(
            sections,
            vec![
                ("Abstract".to_string(), SectionType::Abstract),
                ("1. Introduction".to_string(), SectionType::Introduction),
                ("Cell culture".to_string(), SectionType::Methods),
                ("Results".to_string(), SectionType::Results),
            ]
        );
        assert_eq!(ex.content.sections[0].text, "We study KRAS & friends.");
        assert_eq!(ex.content.sections[1].text, "KRAS is a GTPase. Second paragraph.");
        assert!(ex.content.sections.iter().all(|s| (s.confidence - JATS_CONFIDENCE).abs() < f64::EPSILON));
        assert!(ex.content.full_text.contains("Cells were grown."));
    }

    #[test]
    fn test_tables_figures_equations() {
        let ex = convert(SAMPLE).unwrap();
        assert_eq!(ex.content.tables.len(), 1);
        let table = &ex.content.tables[0];
        assert_eq!(table.label.as_deref(), Some("Table 1"));
        assert_eq!(table.caption.as_deref(), Some("Cell counts"));
        assert_eq!(table.headers, vec!["Line", "Count"]);
        assert_eq!(table.rows, vec![vec!["A549", "10"], vec!["HeLa", "12"]]);

        assert_eq!(ex.content.figures.len(), 1);
        assert_eq!(ex.content.figures[0].file_ref.as_deref(), Some("fig1.jpg"));
        assert_eq!(ex.content.figures[0].caption.as_deref(), Some("A plot."));

        assert_eq!(ex.content.equations.len(), 1);
        assert_eq!(ex.content.equations[0].tex, "E = mc^2");
        assert_eq!(ex.content.equations[0].label.as_deref(), Some("(1)"));
    }

    #[test]
    fn test_references() {
        let ex = convert(SAMPLE).unwrap();
        let refs = &ex.content.references;
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].title.as_deref(), Some("Old results"));
        assert_eq!(refs[0].authors, vec!["A Smith"]);
        assert_eq!(refs[0].year.as_deref(), Some("2001"));
        assert_eq!(refs[0].doi.as_deref(), Some("10.1038/old1"));
        assert_eq!(refs[1].raw, "Brown B. Another paper. Cell. 2005.");
    }

    #[test]
    fn test_malformed_xml() {
        let err = convert("<article><body><p>unclosed</body></article>").unwrap_err();
        assert!(matches!(err, ParseError::Malformed { format: SourceFormat::Xml, .. }));
    }

    #[test]
    fn test_empty_article() {
        let err = convert("<article><front/></article>").unwrap_err();
        assert_eq!(err, ParseError::empty(SourceFormat::Xml));
    }
}
