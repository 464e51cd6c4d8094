//! Index row types.

use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::FromRow;

use crate::identifier::{IdentifierKind, PublicationIdentifier};
use crate::normalize::NormalizedDocument;
use crate::source::{Provider, SourceFile, SourceFormat};

/// One physical cached document, as stored in `cache_entries`.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct CacheEntry {
    /// Canonical key of the owning identifier.
    pub identifier: String,
    pub identifier_kind: String,
    pub file_path: String,
    pub content_hash: String,
    pub provider: String,
    pub format: String,
    pub size_bytes: i64,
    pub title: Option<String>,
    pub section_count: i64,
    pub table_count: i64,
    pub figure_count: i64,
    pub reference_count: i64,
    /// `None` until the document has been normalized.
    pub quality_score: Option<f64>,
    pub downloaded_at: DateTime<Utc>,
    pub parsed_at: Option<DateTime<Utc>>,
    pub last_accessed_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Builds a fresh (unparsed) row for a stored source file.
    #[must_use]
    pub fn from_source(id: &PublicationIdentifier, source: &SourceFile) -> Self {
        Self {
            identifier: id.canonical_key.clone(),
            identifier_kind: id.kind.as_str().to_string(),
            file_path: source.path.display().to_string(),
            content_hash: source.content_hash.clone(),
            provider: source.provider.as_str().to_string(),
            format: source.format.as_str().to_string(),
            size_bytes: i64::try_from(source.size_bytes).unwrap_or(i64::MAX),
            title: None,
            section_count: 0,
            table_count: 0,
            figure_count: 0,
            reference_count: 0,
            quality_score: None,
            downloaded_at: source.downloaded_at,
            parsed_at: None,
            last_accessed_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> Option<IdentifierKind> {
        self.identifier_kind.parse().ok()
    }

    #[must_use]
    pub fn provider(&self) -> Provider {
        Provider::from_name(&self.provider)
    }

    #[must_use]
    pub fn source_format(&self) -> Option<SourceFormat> {
        self.format.parse().ok()
    }

    #[must_use]
    pub fn path(&self) -> PathBuf {
        PathBuf::from(&self.file_path)
    }

    /// Whether the parsed document behind this row is older than `ttl`.
    ///
    /// Rows that were never parsed are always stale.
    #[must_use]
    pub fn is_stale(&self, ttl: Duration) -> bool {
        self.is_stale_at(ttl, Utc::now())
    }

    #[must_use]
    pub fn is_stale_at(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        match self.parsed_at {
            Some(parsed_at) => now.signed_duration_since(parsed_at) > ttl,
            None => true,
        }
    }
}

/// Structural summary recorded after a successful normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseSummary {
    pub title: Option<String>,
    pub section_count: i64,
    pub table_count: i64,
    pub figure_count: i64,
    pub reference_count: i64,
    pub quality_score: f64,
    pub parsed_at: DateTime<Utc>,
}

impl From<&NormalizedDocument> for ParseSummary {
    fn from(doc: &NormalizedDocument) -> Self {
        let count = |n: usize| i64::try_from(n).unwrap_or(i64::MAX);
        Self {
            title: doc.bibliographic.title.clone(),
            section_count: count(doc.statistics.section_count),
            table_count: count(doc.statistics.table_count),
            figure_count: count(doc.statistics.figure_count),
            reference_count: count(doc.statistics.reference_count),
            quality_score: doc.metadata.quality_score,
            parsed_at: doc.metadata.normalized_at,
        }
    }
}

/// Result of [`super::MetadataIndex::upsert`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// A new row was created.
    Inserted,
    /// The identifier's existing row was updated.
    Updated,
    /// The content already belongs to another identifier; an alias was recorded.
    Merged {
        /// Identifier that owns the physical document.
        canonical: String,
    },
}

/// Per-provider aggregate over indexed documents.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct ProviderAggregate {
    pub provider: String,
    pub documents: i64,
    pub parsed_documents: i64,
    pub avg_quality: Option<f64>,
    pub total_tables: i64,
    pub total_figures: i64,
    pub total_bytes: i64,
}

/// A physical document reachable through more than one identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroup {
    pub identifier: String,
    pub content_hash: String,
    pub aliases: Vec<String>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn entry_parsed_days_ago(days: i64) -> CacheEntry {
        let now = Utc::now();
        CacheEntry {
            identifier: "PMC1".to_string(),
            identifier_kind: "pmcid".to_string(),
            file_path: "/tmp/pmc/pmcid_PMC1.xml".to_string(),
            content_hash: "abc".to_string(),
            provider: "pmc".to_string(),
            format: "xml".to_string(),
            size_bytes: 1,
            title: None,
            section_count: 0,
            table_count: 0,
            figure_count: 0,
            reference_count: 0,
            quality_score: Some(0.9),
            downloaded_at: now,
            parsed_at: Some(now - Duration::days(days)),
            last_accessed_at: now,
        }
    }

    #[test]
    fn test_is_stale_past_ttl() {
        let entry = entry_parsed_days_ago(91);
        assert!(entry.is_stale(Duration::days(90)));
    }

    #[test]
    fn test_is_not_stale_within_ttl() {
        let entry = entry_parsed_days_ago(10);
        assert!(!entry.is_stale(Duration::days(90)));
    }

    #[test]
    fn test_unparsed_is_stale() {
        let mut entry = entry_parsed_days_ago(0);
        entry.parsed_at = None;
        assert!(entry.is_stale(Duration::days(90)));
    }

    #[test]
    fn test_typed_accessors() {
        let entry = entry_parsed_days_ago(0);
        assert_eq!(entry.kind(), Some(IdentifierKind::Pmcid));
        assert_eq!(entry.provider(), Provider::Pmc);
        assert_eq!(entry.source_format(), Some(SourceFormat::Xml));
    }
}
