//! LaTeX sources (arXiv e-prints).
//!
//! Regex-driven: commands with brace arguments are read with a balanced
//! brace scanner, floats and bibliography are lifted out of the body before
//! the remaining markup is stripped to text.

use std::sync::LazyLock;

use regex::Regex;

use super::Converter;
use super::document::{
    Bibliographic, DocumentContent, Equation, Extraction, Figure, Reference, Section, Table,
    collapse_whitespace, non_empty,
};
use super::error::ParseError;
use super::sections::SectionType;
use crate::identifier::compile_static_regex;
use crate::source::SourceFormat;

pub const LATEX_CONFIDENCE: f64 = 0.85;

macro_rules! static_regex {
    ($name:ident, $pattern:expr) => {
        static $name: LazyLock<Regex> = LazyLock::new(|| compile_static_regex($pattern));
    };
}

static_regex!(TITLE, r"\\title\s*(?:\[[^\]]*\])?\s*\{");
static_regex!(AUTHOR, r"\\author\s*(?:\[[^\]]*\])?\s*\{");
static_regex!(DATE, r"\\date\s*\{");
static_regex!(SECTION, r"\\section\*?\s*(?:\[[^\]]*\])?\s*\{");
static_regex!(CAPTION, r"\\caption\s*(?:\[[^\]]*\])?\s*\{");
static_regex!(LABEL, r"\\label\s*\{([^}]*)\}");
static_regex!(GRAPHIC, r"\\includegraphics\s*(?:\[[^\]]*\])?\s*\{([^}]*)\}");
static_regex!(ABSTRACT_ENV, r"(?s)\\begin\{abstract\}(.*?)\\end\{abstract\}");
static_regex!(TABLE_ENV, r"(?s)\\begin\{table\*?\}(.*?)\\end\{table\*?\}");
static_regex!(FIGURE_ENV, r"(?s)\\begin\{figure\*?\}(.*?)\\end\{figure\*?\}");
static_regex!(
    TABULAR,
    r"(?s)\\begin\{tabular\*?\}\s*(?:\{[^{}]*(?:\{[^{}]*\}[^{}]*)*\}\s*)+(.*?)\\end\{tabular\*?\}"
);
static_regex!(
    EQUATION_ENV,
    r"(?s)\\begin\{(?:equation|align|gather|multline|eqnarray|displaymath)\*?\}(.*?)\\end\{(?:equation|align|gather|multline|eqnarray|displaymath)\*?\}"
);
static_regex!(DISPLAY_MATH, r"(?s)\\\[(.*?)\\\]|\$\$(.*?)\$\$");
static_regex!(
    BIBLIOGRAPHY,
    r"(?s)\\begin\{thebibliography\}(?:\{[^}]*\})?(.*?)\\end\{thebibliography\}"
);
static_regex!(BIBITEM, r"\\bibitem\s*(?:\[[^\]]*\])?\s*\{[^}]*\}");
static_regex!(COMMENT, r"(?m)(^|[^\\])%.*$");
static_regex!(ROW_BREAK, r"\\\\(?:\[[^\]]*\])?");
static_regex!(RULE, r"\\(?:hline|toprule|midrule|bottomrule|cline\{[^}]*\})");
static_regex!(
    DROP_WITH_ARG,
    r"~?\\(?:cite[pt]?|ref|eqref|cref|Cref|autoref|label|footnote|thanks)\*?\s*(?:\[[^\]]*\])?\s*\{[^}]*\}"
);
static_regex!(COMMAND, r"\\[a-zA-Z@]+\*?(?:\[[^\]]*\])?");

#[derive(Debug, Default, Clone, Copy)]
pub struct LatexConverter;

impl Converter for LatexConverter {
    fn format(&self) -> SourceFormat {
        SourceFormat::Latex
    }

    fn convert(&self, bytes: &[u8]) -> Result<Extraction, ParseError> {
        convert_latex(&String::from_utf8_lossy(bytes))
    }
}

/// Contents of the brace group opening at `open` (which must index `{`),
/// plus the index just past its closing brace.
fn braced_arg(text: &str, open: usize) -> Option<(&str, usize)> {
    let mut depth = 0usize;
    let mut escaped = false;
    for (offset, ch) in text[open..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' => escaped = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    let end = open + offset;
                    return Some((&text[open + 1..end], end + 1));
                }
            }
            _ => {}
        }
    }
    None
}

/// First `\command{...}` argument matched by `re`.
fn command_arg<'a>(text: &'a str, re: &Regex, name: &str) -> Result<Option<&'a str>, ParseError> {
    let Some(m) = re.find(text) else {
        return Ok(None);
    };
    braced_arg(text, m.end() - 1)
        .map(|(arg, _)| Some(arg))
        .ok_or_else(|| ParseError::malformed(SourceFormat::Latex, format!("unbalanced braces in \\{name}")))
}

/// Strips markup to plain text, keeping paragraph breaks.
pub(crate) fn latex_to_text(fragment: &str) -> String {
    let text = EQUATION_ENV.replace_all(fragment, " ");
    let text = DISPLAY_MATH.replace_all(&text, " ");
    let text = DROP_WITH_ARG.replace_all(&text, "");
    let text = ROW_BREAK.replace_all(&text, " ");
    let text = text
        .replace("\\%", "%")
        .replace("\\&", "&")
        .replace("\\_", "_")
        .replace("\\#", "#")
        .replace('~', " ");
    let text = COMMAND.replace_all(&text, "");
    let text: String = text.chars().filter(|c| !matches!(c, '{' | '}' | '$')).collect();
    text.split("\n\n")
        .map(collapse_whitespace)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn document_body(text: &str) -> &str {
    let start = text
        .find("\\begin{document}")
        .map_or(0, |i| i + "\\begin{document}".len());
    let end = text[start..]
        .find("\\end{document}")
        .map_or(text.len(), |i| start + i);
    &text[start..end]
}

fn convert_latex(source: &str) -> Result<Extraction, ParseError> {
    let source = COMMENT.replace_all(source, "$1");
    let body = document_body(&source);

    let title = command_arg(&source, &TITLE, "title")?.and_then(|t| non_empty(&latex_to_text(t)));
    let authors = command_arg(&source, &AUTHOR, "author")?
        .map(parse_authors)
        .unwrap_or_default();
    let date = command_arg(&source, &DATE, "date")?
        .map(latex_to_text)
        .filter(|d| !d.is_empty());

    let tables = TABLE_ENV
        .captures_iter(body)
        .map(|c| parse_table(&c[1]))
        .collect::<Result<Vec<_>, _>>()?;
    let figures = FIGURE_ENV
        .captures_iter(body)
        .map(|c| parse_figure(&c[1]))
        .collect::<Result<Vec<_>, _>>()?;
    let equations = equations(body);
    let references = BIBLIOGRAPHY
        .captures(body)
        .map(|c| parse_bibliography(&c[1]))
        .unwrap_or_default();

    let mut sections = Vec::new();
    if let Some(text) = ABSTRACT_ENV.captures(body).and_then(|c| non_empty(&latex_to_text(&c[1]))) {
        sections.push(Section {
            heading: Some("Abstract".to_string()),
            section_type: SectionType::Abstract,
            text,
            confidence: LATEX_CONFIDENCE,
        });
    }

    let stripped = ABSTRACT_ENV.replace_all(body, " ");
    let stripped = BIBLIOGRAPHY.replace_all(&stripped, " ");
    let stripped = TABLE_ENV.replace_all(&stripped, " ");
    let stripped = FIGURE_ENV.replace_all(&stripped, " ");

    let mut parts: Vec<String> = sections.iter().map(|s| s.text.clone()).collect();
    let (intro, body_sections) = split_sections(&stripped)?;
    parts.extend(non_empty(&intro));
    for section in body_sections {
        match &section.heading {
            Some(h) => parts.push(format!("{h}\n{}", section.text)),
            None => parts.push(section.text.clone()),
        }
        sections.push(section);
    }

    let full_text = parts.join("\n\n");
    if full_text.trim().is_empty() && title.is_none() {
        return Err(ParseError::empty(SourceFormat::Latex));
    }

    Ok(Extraction {
        bibliographic: Bibliographic {
            title,
            authors,
            venue: None,
            date: date.filter(|d| !d.eq_ignore_ascii_case("today")),
        },
        content: DocumentContent {
            full_text,
            sections,
            tables,
            figures,
            references,
            equations,
        },
        warnings: Vec::new(),
    })
}

/// Body text before the first `\section` plus one [`Section`] per `\section`.
fn split_sections(body: &str) -> Result<(String, Vec<Section>), ParseError> {
    let mut headings: Vec<(usize, String, usize)> = Vec::new();
    for m in SECTION.find_iter(body) {
        let (heading, after) = braced_arg(body, m.end() - 1).ok_or_else(|| {
            ParseError::malformed(SourceFormat::Latex, "unbalanced braces in \\section")
        })?;
        headings.push((m.start(), latex_to_text(heading), after));
    }

    let intro_end = headings.first().map_or(body.len(), |(start, _, _)| *start);
    let intro = latex_to_text(&body[..intro_end]);

    let mut sections = Vec::with_capacity(headings.len());
    for (i, (_, heading, after)) in headings.iter().enumerate() {
        let end = headings.get(i + 1).map_or(body.len(), |(start, _, _)| *start);
        let text = latex_to_text(&body[*after..end.max(*after)]);
        if text.is_empty() {
            continue;
        }
        let heading = non_empty(heading);
        let section_type = heading
            .as_deref()
            .map_or(SectionType::Unknown, SectionType::from_heading);
        sections.push(Section {
            heading,
            section_type,
            text,
            confidence: LATEX_CONFIDENCE,
        });
    }
    Ok((intro, sections))
}

fn parse_authors(arg: &str) -> Vec<String> {
    arg.split("\\and")
        .filter_map(|chunk| {
            // Affiliations follow the name after a line break.
            let name = ROW_BREAK.split(chunk).next().unwrap_or_default();
            non_empty(&latex_to_text(name))
        })
        .collect()
}

fn parse_table(env: &str) -> Result<Table, ParseError> {
    let caption = command_arg(env, &CAPTION, "caption")?.and_then(|c| non_empty(&latex_to_text(c)));
    let label = LABEL.captures(env).map(|c| c[1].trim().to_string());

    let mut rows: Vec<Vec<String>> = TABULAR
        .captures(env)
        .map(|c| {
            ROW_BREAK
                .split(&c[1])
                .map(|row| {
                    let row = RULE.replace_all(row, "").replace("\\&", "\u{0}");
                    row.split('&')
                        .map(|cell| latex_to_text(&cell.replace('\u{0}', "\\&")))
                        .collect::<Vec<_>>()
                })
                .filter(|cells| cells.iter().any(|c| !c.is_empty()))
                .collect()
        })
        .unwrap_or_default();
    let headers = if rows.is_empty() { Vec::new() } else { rows.remove(0) };

    Ok(Table {
        label,
        caption,
        headers,
        rows,
        confidence: LATEX_CONFIDENCE,
    })
}

fn parse_figure(env: &str) -> Result<Figure, ParseError> {
    Ok(Figure {
        label: LABEL.captures(env).map(|c| c[1].trim().to_string()),
        caption: command_arg(env, &CAPTION, "caption")?.and_then(|c| non_empty(&latex_to_text(c))),
        file_ref: GRAPHIC.captures(env).map(|c| c[1].trim().to_string()),
    })
}

fn equations(body: &str) -> Vec<Equation> {
    let environments = EQUATION_ENV.captures_iter(body).map(|c| c[1].to_string());
    let display = DISPLAY_MATH.captures_iter(body).filter_map(|c| {
        c.get(1)
            .or_else(|| c.get(2))
            .map(|m| m.as_str().to_string())
    });
    environments
        .chain(display)
        .filter_map(|raw| {
            let label = LABEL.captures(&raw).map(|c| c[1].trim().to_string());
            let tex = collapse_whitespace(&LABEL.replace_all(&raw, ""));
            (!tex.is_empty()).then_some(Equation { label, tex })
        })
        .collect()
}

fn parse_bibliography(content: &str) -> Vec<Reference> {
    BIBITEM
        .split(content)
        .skip(1)
        .filter_map(|item| non_empty(&latex_to_text(item)))
        .map(|text| Reference::from_raw(&text))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const PAPER: &str = r"\documentclass{article}
\usepackage{graphicx}
\title{Sparse \emph{Attention} Models}
\author{Ada Lovelace \\ Analytical Engines Ltd \and Alan Turing}
\date{\today}
\begin{document}
\maketitle
\begin{abstract}
We make attention sparse. % a comment
\end{abstract}
\section{Introduction}
Attention is costly~\cite{vaswani}. We fix 50\% of it.
\section{Method}
\label{sec:method}
Our loss is
\begin{equation}
\label{eq:loss}
L = \sum_i x_i^2
\end{equation}
\begin{table}[t]
\caption{Results on \textbf{GLUE}}
\label{tab:glue}
\begin{tabular}{l|c}
\hline
Model & Score \\
\hline
Ours & 90.1 \\
Base & 85.0 \\
\hline
\end{tabular}
\end{table}
\begin{figure}
\includegraphics[width=0.5\linewidth]{figs/arch.pdf}
\caption{Architecture.}
\end{figure}
\section*{Conclusion}
Sparse is good.
\begin{thebibliography}{9}
\bibitem{vaswani} A. Vaswani et al. Attention is all you need. 2017.
\bibitem[Doe]{doe} J. Doe. Sparse things. 2020.
\end{thebibliography}
\end{document}
";

    #[test]
    fn test_front_matter() {
        let ex = LatexConverter.convert(PAPER.as_bytes()).unwrap();
        assert_eq!(ex.bibliographic.title.as_deref(), Some("Sparse Attention Models"));
        assert_eq!(ex.bibliographic.authors, vec!["Ada Lovelace", "Alan Turing"]);
        assert_eq!(ex.bibliographic.date, None);
    }

    #[test]
    fn test_sections() {
        let ex = LatexConverter.convert(PAPER.as_bytes()).unwrap();
        let sections: Vec<_> = ex
            .content
            .sections
            .iter()
            .map(|s| (s.section_type, s.text.as_str()))
            .collect();
        assert_eq!(sections[0], (SectionType::Abstract, "We make attention sparse."));
        assert_eq!(sections[1], (SectionType::Introduction, "Attention is costly. We fix 50% of it."));
        assert_eq!(sections[2], (SectionType::Methods, "Our loss is"));
        assert_eq!(sections[3], (SectionType::Conclusion, "Sparse is good."));
        assert!(!ex.content.full_text.contains("Vaswani"));
    }

    #[test]
    fn test_floats_and_math() {
        let ex = LatexConverter.convert(PAPER.as_bytes()).unwrap();
        let table = &ex.content.tables[0];
        assert_eq!(table.caption.as_deref(), Some("Results on GLUE"));
        assert_eq!(table.label.as_deref(), Some("tab:glue"));
        assert_eq!(table.headers, vec!["Model", "Score"]);
        assert_eq!(table.rows, vec![vec!["Ours", "90.1"], vec!["Base", "85.0"]]);

        assert_eq!(ex.content.figures[0].file_ref.as_deref(), Some("figs/arch.pdf"));
        assert_eq!(ex.content.figures[0].caption.as_deref(), Some("Architecture."));

        assert_eq!(ex.content.equations.len(), 1);
        assert_eq!(ex.content.equations[0].label.as_deref(), Some("eq:loss"));
        assert_eq!(ex.content.equations[0].tex, r"L = \sum_i x_i^2");
    }

    #[test]
    fn test_bibliography() {
        let ex = LatexConverter.convert(PAPER.as_bytes()).unwrap();
        let refs = &ex.content.references;
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].year.as_deref(), Some("2017"));
        assert_eq!(refs[1].raw, "J. Doe. Sparse things. 2020.");
    }

    #[test]
    fn test_unbalanced_title_is_malformed() {
        let err = LatexConverter
            .convert(br"\title{Broken \begin{document} text")
            .unwrap_err();
        assert!(matches!(err, ParseError::Malformed { format: SourceFormat::Latex, .. }));
    }

    #[test]
    fn test_braced_arg_nesting() {
        let text = r"\x{a{b}c\}d}rest";
        let (arg, after) = braced_arg(text, 2).unwrap();
        assert_eq!(arg, r"a{b}c\}d");
        assert_eq!(&text[after..], "rest");
    }
}
