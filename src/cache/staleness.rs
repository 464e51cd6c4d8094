//! When a cached normalized document must be regenerated.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::normalize::NormalizedDocument;
use crate::source::SourceFile;

/// Default time-to-live of a normalized document.
pub const DEFAULT_TTL_DAYS: u32 = 90;

/// Default quality floor below which documents are re-normalized.
pub const DEFAULT_MIN_QUALITY: f64 = 0.2;

/// Why a cached document is stale.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StaleReason {
    /// Older than the TTL.
    Expired { age_days: i64 },
    /// The source file's bytes differ from the ones normalized.
    SourceChanged,
    /// The source file was rewritten since normalization.
    SourceModified,
    LowQuality { score: f64 },
    /// Written by an older schema.
    SchemaOutdated { found: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Freshness {
    Fresh,
    Stale(Vec<StaleReason>),
}

impl Freshness {
    #[must_use]
    pub fn is_fresh(&self) -> bool {
        matches!(self, Self::Fresh)
    }
}

/// TTL, source-change and quality rules.
#[derive(Debug, Clone, Copy)]
pub struct StalenessPolicy {
    ttl: Duration,
    min_quality: f64,
}

impl Default for StalenessPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_TTL_DAYS, DEFAULT_MIN_QUALITY)
    }
}

impl StalenessPolicy {
    #[must_use]
    pub fn new(ttl_days: u32, min_quality: f64) -> Self {
        Self {
            ttl: Duration::days(i64::from(ttl_days)),
            min_quality,
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    #[must_use]
    pub fn min_quality(&self) -> f64 {
        self.min_quality
    }

    #[must_use]
    pub fn evaluate(&self, doc: &NormalizedDocument, source: &SourceFile) -> Freshness {
        self.evaluate_at(doc, source, Utc::now())
    }

    /// All rules that fire for `doc` against the current `source`, at `now`.
    #[must_use]
    pub fn evaluate_at(
        &self,
        doc: &NormalizedDocument,
        source: &SourceFile,
        now: DateTime<Utc>,
    ) -> Freshness {
        let meta = &doc.metadata;
        let mut reasons = Vec::new();

        let age = now - meta.normalized_at;
        if age > self.ttl {
            reasons.push(StaleReason::Expired {
                age_days: age.num_days(),
            });
        }
        if meta.source_content_hash != source.content_hash {
            reasons.push(StaleReason::SourceChanged);
        } else if meta.source_modified_at != source.modified_at {
            reasons.push(StaleReason::SourceModified);
        }
        if meta.quality_score < self.min_quality {
            reasons.push(StaleReason::LowQuality {
                score: meta.quality_score,
            });
        }
        if !doc.is_current_schema() {
            reasons.push(StaleReason::SchemaOutdated {
                found: meta.schema_version,
            });
        }

        if reasons.is_empty() {
            Freshness::Fresh
        } else {
            Freshness::Stale(reasons)
        }
    }
}
