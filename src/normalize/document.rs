//! Canonical document schema.
//!
//! Every converter produces an [`Extraction`]; [`NormalizedDocument::assemble`]
//! stamps it with provenance, statistics and the quality score. The JSON
//! form of this struct is what the parsed cache stores.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::quality::quality_score;
use super::sections::SectionType;
use crate::source::{Provider, SourceFile, SourceFormat};

/// Canonical representation of one publication's full text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedDocument {
    pub metadata: DocumentMetadata,
    pub bibliographic: Bibliographic,
    pub content: DocumentContent,
    pub statistics: DocumentStatistics,
}

/// Provenance and quality of a normalized document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Canonical key of the source file this was derived from.
    pub publication_id: String,
    pub provider: Provider,
    pub source_format: SourceFormat,
    pub schema_version: u32,
    pub normalized_at: DateTime<Utc>,
    pub quality_score: f64,
    pub source_content_hash: String,
    pub source_modified_at: DateTime<Utc>,
    /// Non-fatal problems hit while converting (degraded output, skipped tables).
    #[serde(default)]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bibliographic {
    pub title: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    pub venue: Option<String>,
    /// Publication date as found in the source (`YYYY`, `YYYY-MM` or `YYYY-MM-DD`).
    pub date: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentContent {
    pub full_text: String,
    #[serde(default)]
    pub sections: Vec<Section>,
    #[serde(default)]
    pub tables: Vec<Table>,
    #[serde(default)]
    pub figures: Vec<Figure>,
    #[serde(default)]
    pub references: Vec<Reference>,
    #[serde(default)]
    pub equations: Vec<Equation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub heading: Option<String>,
    pub section_type: SectionType,
    pub text: String,
    /// How sure the converter is about the section boundary and type.
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub label: Option<String>,
    pub caption: Option<String>,
    #[serde(default)]
    pub headers: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Vec<String>>,
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Figure {
    pub label: Option<String>,
    pub caption: Option<String>,
    /// Image file or URL referenced by the source.
    pub file_ref: Option<String>,
}

/// A structured citation. `raw` always holds the citation text as found.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub raw: String,
    pub title: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    pub year: Option<String>,
    pub doi: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Equation {
    pub label: Option<String>,
    pub tex: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentStatistics {
    pub word_count: usize,
    pub section_count: usize,
    pub table_count: usize,
    pub figure_count: usize,
    pub reference_count: usize,
    pub equation_count: usize,
}

impl DocumentStatistics {
    #[must_use]
    pub fn of(content: &DocumentContent) -> Self {
        Self {
            word_count: content.full_text.split_whitespace().count(),
            section_count: content.sections.len(),
            table_count: content.tables.len(),
            figure_count: content.figures.len(),
            reference_count: content.references.len(),
            equation_count: content.equations.len(),
        }
    }
}

/// Converter output before provenance is attached.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub bibliographic: Bibliographic,
    pub content: DocumentContent,
    pub warnings: Vec<String>,
}

impl NormalizedDocument {
    /// Current schema. Documents with another version are only rewritten by
    /// [`super::Normalizer::upgrade`].
    pub const SCHEMA_VERSION: u32 = 1;

    /// Attaches provenance, statistics and quality to converter output.
    #[must_use]
    pub fn assemble(source: &SourceFile, extraction: Extraction, normalized_at: DateTime<Utc>) -> Self {
        let statistics = DocumentStatistics::of(&extraction.content);
        Self {
            metadata: DocumentMetadata {
                publication_id: source.identifier.clone(),
                provider: source.provider.clone(),
                source_format: source.format,
                schema_version: Self::SCHEMA_VERSION,
                normalized_at,
                quality_score: quality_score(&extraction.content),
                source_content_hash: source.content_hash.clone(),
                source_modified_at: source.modified_at,
                warnings: extraction.warnings,
            },
            bibliographic: extraction.bibliographic,
            content: extraction.content,
            statistics,
        }
    }

    #[must_use]
    pub fn is_current_schema(&self) -> bool {
        self.metadata.schema_version == Self::SCHEMA_VERSION
    }

    /// Whether the converter had to fall back to text-only output.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        !self.metadata.warnings.is_empty() && self.content.sections.is_empty()
    }
}

/// Collapses runs of whitespace into single spaces and trims the ends.
pub(crate) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Trimmed, whitespace-collapsed text, or `None` when nothing is left.
pub(crate) fn non_empty(text: &str) -> Option<String> {
    let collapsed = collapse_whitespace(text);
    (!collapsed.is_empty()).then_some(collapsed)
}
