//! Conversion of source files into [`NormalizedDocument`]s.
//!
//! Each source format has a [`Converter`]; the [`Normalizer`] dispatches on
//! the [`ParsedSource`] variant. Documents that are already canonical pass
//! through untouched, so normalizing twice is always safe. Older schema
//! versions are only rewritten through [`Normalizer::upgrade`].
//!
//! When a converter fails but text can still be recovered, a degraded
//! text-only document is produced (with a warning and a low quality score)
//! instead of an error.

mod citations;
mod document;
mod error;
mod html;
mod jats;
mod latex;
mod pdf;
mod quality;
mod sections;

use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;
use tracing::{debug, instrument, warn};

pub use citations::{parse_reference_block, split_reference_block};
pub use document::{
    Bibliographic, DocumentContent, DocumentMetadata, DocumentStatistics, Equation, Extraction,
    Figure, NormalizedDocument, Reference, Section, Table,
};
pub use error::ParseError;
pub use html::{HTML_CONFIDENCE, HtmlConverter};
pub use jats::{JATS_CONFIDENCE, JatsConverter};
pub use latex::{LATEX_CONFIDENCE, LatexConverter};
pub use pdf::{PDF_SECTION_CONFIDENCE, PDF_TABLE_CONFIDENCE, PdfConverter};
pub use quality::{
    FULL_TEXT_MIN_CHARS, WEIGHT_FIGURES, WEIGHT_FULL_TEXT, WEIGHT_REFERENCES, WEIGHT_SECTIONS,
    WEIGHT_TABLES, quality_score,
};
pub use sections::{SectionType, SplitText, heading_line, split_sections};

use crate::identifier::compile_static_regex;
use crate::source::{SourceFile, SourceFormat};

static MARKUP_TAG: LazyLock<Regex> = LazyLock::new(|| compile_static_regex(r"(?s)<[^>]*>"));
static SCRIPT_STYLE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r"(?is)<(script|style)\b[^>]*>.*?</(?:script|style)\s*>")
});

/// Shared contract for format converters.
pub trait Converter: Send + Sync {
    fn format(&self) -> SourceFormat;

    /// Extracts bibliographic data and structure from raw source bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] when minimum structure cannot be extracted.
    fn convert(&self, bytes: &[u8]) -> Result<Extraction, ParseError>;
}

/// A source ready for normalization, tagged by format.
#[derive(Debug, Clone)]
pub enum ParsedSource {
    Xml(Vec<u8>),
    Latex(Vec<u8>),
    Html(Vec<u8>),
    Pdf(Vec<u8>),
    /// Output of a previous normalization.
    Canonical(Box<NormalizedDocument>),
}

impl ParsedSource {
    #[must_use]
    pub fn from_bytes(format: SourceFormat, bytes: Vec<u8>) -> Self {
        match format {
            SourceFormat::Xml => Self::Xml(bytes),
            SourceFormat::Latex => Self::Latex(bytes),
            SourceFormat::Html => Self::Html(bytes),
            SourceFormat::Pdf => Self::Pdf(bytes),
        }
    }

    #[must_use]
    pub fn format(&self) -> SourceFormat {
        match self {
            Self::Xml(_) => SourceFormat::Xml,
            Self::Latex(_) => SourceFormat::Latex,
            Self::Html(_) => SourceFormat::Html,
            Self::Pdf(_) => SourceFormat::Pdf,
            Self::Canonical(doc) => doc.metadata.source_format,
        }
    }
}

/// Dispatches sources to their converter.
pub struct Normalizer {
    converters: Vec<Box<dyn Converter>>,
}

impl std::fmt::Debug for Normalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let formats: Vec<_> = self.converters.iter().map(|c| c.format()).collect();
        f.debug_struct("Normalizer").field("formats", &formats).finish()
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self {
            converters: vec![
                Box::new(JatsConverter),
                Box::new(LatexConverter),
                Box::new(HtmlConverter),
                Box::new(PdfConverter),
            ],
        }
    }
}

impl Normalizer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a converter, replacing any existing one for its format.
    #[must_use]
    pub fn with_converter(mut self, converter: Box<dyn Converter>) -> Self {
        let format = converter.format();
        self.converters.retain(|c| c.format() != format);
        self.converters.push(converter);
        self
    }

    fn converter_for(&self, format: SourceFormat) -> Option<&dyn Converter> {
        self.converters
            .iter()
            .find(|c| c.format() == format)
            .map(AsRef::as_ref)
    }

    /// Converts `source` (read from `file`) into a canonical document.
    ///
    /// A [`ParsedSource::Canonical`] input is returned exactly as given.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] only when the converter fails and no text at
    /// all can be recovered from the bytes.
    #[instrument(skip(self, source, file), fields(identifier = %file.identifier, format = %source.format()))]
    pub fn normalize(
        &self,
        source: ParsedSource,
        file: &SourceFile,
    ) -> Result<NormalizedDocument, ParseError> {
        let (format, bytes) = match source {
            ParsedSource::Canonical(doc) => {
                debug!(schema_version = doc.metadata.schema_version, "already normalized");
                return Ok(*doc);
            }
            ParsedSource::Xml(b) => (SourceFormat::Xml, b),
            ParsedSource::Latex(b) => (SourceFormat::Latex, b),
            ParsedSource::Html(b) => (SourceFormat::Html, b),
            ParsedSource::Pdf(b) => (SourceFormat::Pdf, b),
        };
        let converter = self
            .converter_for(format)
            .ok_or(ParseError::Unsupported(format))?;

        let now = Utc::now();
        match converter.convert(&bytes) {
            Ok(extraction) => {
                let doc = NormalizedDocument::assemble(file, extraction, now);
                debug!(
                    quality = doc.metadata.quality_score,
                    sections = doc.statistics.section_count,
                    tables = doc.statistics.table_count,
                    "normalized"
                );
                Ok(doc)
            }
            Err(error) => {
                let Some(text) = recover_text(format, &bytes) else {
                    warn!(%error, "conversion failed and no text could be recovered");
                    return Err(error);
                };
                warn!(%error, chars = text.len(), "conversion failed, keeping text only");
                let extraction = Extraction {
                    content: DocumentContent {
                        full_text: text,
                        ..DocumentContent::default()
                    },
                    warnings: vec![format!("{error}; degraded to text-only output")],
                    ..Extraction::default()
                };
                Ok(NormalizedDocument::assemble(file, extraction, now))
            }
        }
    }

    /// Rewrites a document from an older schema to the current one.
    ///
    /// Statistics and quality are recomputed from the content with today's
    /// rules; everything else is kept. Current-schema documents come back
    /// unchanged.
    ///
    /// # Errors
    ///
    /// [`ParseError::UnsupportedSchema`] for documents newer than this build.
    pub fn upgrade(&self, mut doc: NormalizedDocument) -> Result<NormalizedDocument, ParseError> {
        let found = doc.metadata.schema_version;
        if found == NormalizedDocument::SCHEMA_VERSION {
            return Ok(doc);
        }
        if found > NormalizedDocument::SCHEMA_VERSION {
            return Err(ParseError::UnsupportedSchema {
                found,
                supported: NormalizedDocument::SCHEMA_VERSION,
            });
        }
        debug!(from = found, to = NormalizedDocument::SCHEMA_VERSION, "upgrading document schema");
        doc.statistics = DocumentStatistics::of(&doc.content);
        doc.metadata.quality_score = quality_score(&doc.content);
        doc.metadata.schema_version = NormalizedDocument::SCHEMA_VERSION;
        Ok(doc)
    }
}

/// Plain text salvaged from a source whose converter failed.
fn recover_text(format: SourceFormat, bytes: &[u8]) -> Option<String> {
    let raw = String::from_utf8_lossy(bytes);
    let text = match format {
        SourceFormat::Xml | SourceFormat::Html => {
            let without_code = SCRIPT_STYLE.replace_all(&raw, " ");
            let stripped = MARKUP_TAG.replace_all(&without_code, " ");
            stripped
                .replace("&lt;", "<")
                .replace("&gt;", ">")
                .replace("&quot;", "\"")
                .replace("&nbsp;", " ")
                .replace("&amp;", "&")
        }
        SourceFormat::Latex => latex::latex_to_text(&raw),
        // Nothing trustworthy survives a failed PDF text extraction.
        SourceFormat::Pdf => return None,
    };
    document::non_empty(&text)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::source::Provider;
    use std::path::PathBuf;

    fn source_file(format: SourceFormat) -> SourceFile {
        let at = Utc::now();
        SourceFile {
            path: PathBuf::from(format!("/cache/sources/pmc/pmcid_PMC1.{}", format.extension())),
            identifier: "PMC1".to_string(),
            provider: Provider::Pmc,
            format,
            content_hash: "cd".repeat(32),
            size_bytes: 100,
            downloaded_at: at,
            modified_at: at,
        }
    }

    const ARTICLE: &[u8] = br"<article><front><article-meta><title-group><article-title>T</article-title></title-group></article-meta></front><body><sec><title>Introduction</title><p>Hello world.</p></sec></body></article>";

    #[test]
    fn test_normalize_xml() {
        let file = source_file(SourceFormat::Xml);
        let doc = Normalizer::new()
            .normalize(ParsedSource::from_bytes(SourceFormat::Xml, ARTICLE.to_vec()), &file)
            .unwrap();
        assert_eq!(doc.metadata.publication_id, "PMC1");
        assert_eq!(doc.metadata.source_format, SourceFormat::Xml);
        assert_eq!(doc.statistics.section_count, 1);
        assert!(doc.metadata.warnings.is_empty());
    }

    #[test]
    fn test_renormalizing_canonical_is_byte_identical() {
        let file = source_file(SourceFormat::Xml);
        let normalizer = Normalizer::new();
        let first = normalizer
            .normalize(ParsedSource::Xml(ARTICLE.to_vec()), &file)
            .unwrap();
        let first_json = serde_json::to_vec(&first).unwrap();

        let second = normalizer
            .normalize(ParsedSource::Canonical(Box::new(first.clone())), &file)
            .unwrap();
        assert_eq!(serde_json::to_vec(&second).unwrap(), first_json);
        assert_eq!(second, first);
    }

    #[test]
    fn test_malformed_xml_degrades_to_text() {
        let file = source_file(SourceFormat::Xml);
        let doc = Normalizer::new()
            .normalize(
                ParsedSource::Xml(b"<article><body><p>Some text survives</body>".to_vec()),
                &file,
            )
            .unwrap();
        assert_eq!(doc.content.full_text, "Some text survives");
        assert_eq!(doc.metadata.warnings.len(), 1);
        assert!(doc.is_degraded());
        assert!(doc.metadata.quality_score < 0.3);
    }

    #[test]
    fn test_unrecoverable_pdf_is_error() {
        let file = source_file(SourceFormat::Pdf);
        let err = Normalizer::new()
            .normalize(ParsedSource::Pdf(b"%PDF-1.4 garbage".to_vec()), &file)
            .unwrap_err();
        assert!(matches!(err, ParseError::Extraction { .. }));
    }

    #[test]
    fn test_upgrade_rewrites_old_schema_only() {
        let file = source_file(SourceFormat::Xml);
        let normalizer = Normalizer::new();
        let current = normalizer
            .normalize(ParsedSource::Xml(ARTICLE.to_vec()), &file)
            .unwrap();
        assert_eq!(normalizer.upgrade(current.clone()).unwrap(), current);

        let mut old = current.clone();
        old.metadata.schema_version = 0;
        old.statistics = DocumentStatistics::default();
        let upgraded = normalizer.upgrade(old).unwrap();
        assert_eq!(upgraded.metadata.schema_version, NormalizedDocument::SCHEMA_VERSION);
        assert_eq!(upgraded.statistics, current.statistics);

        let mut future = current;
        future.metadata.schema_version = NormalizedDocument::SCHEMA_VERSION + 1;
        assert!(matches!(
            normalizer.upgrade(future),
            Err(ParseError::UnsupportedSchema { .. })
        ));
    }

    struct RejectingConverter;

    impl Converter for RejectingConverter {
        fn format(&self) -> SourceFormat {
            SourceFormat::Html
        }
        fn convert(&self, _bytes: &[u8]) -> Result<Extraction, ParseError> {
            Err(ParseError::empty(SourceFormat::Html))
        }
    }

    #[test]
    fn test_with_converter_replaces_format() {
        let normalizer = Normalizer::new().with_converter(Box::new(RejectingConverter));
        let file = source_file(SourceFormat::Html);
        let doc = normalizer
            .normalize(
                ParsedSource::Html(b"<html><script>x()</script><p>kept</p></html>".to_vec()),
                &file,
            )
            .unwrap();
        assert_eq!(doc.content.full_text, "kept");
        assert!(format!("{normalizer:?}").contains("Html"));
    }
}
