//! Filtered scans over the metadata index.

use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite};

use crate::source::SourceFormat;

/// Default row cap for unbounded queries.
pub const DEFAULT_QUERY_LIMIT: u32 = 1000;

/// Result ordering for [`IndexQuery`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexOrder {
    #[default]
    QualityDesc,
    RecentlyParsed,
    RecentlyAccessed,
    Identifier,
}

impl IndexOrder {
    fn sql(self) -> &'static str {
        match self {
            Self::QualityDesc => " ORDER BY quality_score DESC, identifier ASC",
            Self::RecentlyParsed => " ORDER BY parsed_at DESC, identifier ASC",
            Self::RecentlyAccessed => " ORDER BY last_accessed_at DESC, identifier ASC",
            Self::Identifier => " ORDER BY identifier ASC",
        }
    }
}

/// Filter over cache entries, e.g. "quality >= 0.9 and at least 5 tables".
///
/// All filters are conjunctive; unset filters match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexQuery {
    pub min_quality: Option<f64>,
    pub min_tables: Option<i64>,
    pub min_figures: Option<i64>,
    pub provider: Option<String>,
    pub format: Option<SourceFormat>,
    pub only_parsed: bool,
    pub limit: Option<u32>,
    pub order: IndexOrder,
}

impl IndexQuery {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn min_quality(mut self, value: f64) -> Self {
        self.min_quality = Some(value);
        self
    }

    #[must_use]
    pub fn min_tables(mut self, value: i64) -> Self {
        self.min_tables = Some(value);
        self
    }

    #[must_use]
    pub fn min_figures(mut self, value: i64) -> Self {
        self.min_figures = Some(value);
        self
    }

    #[must_use]
    pub fn provider(mut self, value: impl Into<String>) -> Self {
        self.provider = Some(value.into());
        self
    }

    #[must_use]
    pub fn format(mut self, value: SourceFormat) -> Self {
        self.format = Some(value);
        self
    }

    #[must_use]
    pub fn only_parsed(mut self) -> Self {
        self.only_parsed = true;
        self
    }

    #[must_use]
    pub fn limit(mut self, value: u32) -> Self {
        self.limit = Some(value);
        self
    }

    #[must_use]
    pub fn order(mut self, value: IndexOrder) -> Self {
        self.order = value;
        self
    }

    /// Builds the `SELECT` for this query.
    pub(crate) fn to_builder(&self) -> QueryBuilder<'_, Sqlite> {
        let mut builder = QueryBuilder::new("SELECT * FROM cache_entries WHERE 1 = 1");

        if let Some(min_quality) = self.min_quality {
            builder.push(" AND quality_score >= ").push_bind(min_quality);
        }
        if let Some(min_tables) = self.min_tables {
            builder.push(" AND table_count >= ").push_bind(min_tables);
        }
        if let Some(min_figures) = self.min_figures {
            builder.push(" AND figure_count >= ").push_bind(min_figures);
        }
        if let Some(provider) = &self.provider {
            builder
                .push(" AND provider = ")
                .push_bind(provider.to_ascii_lowercase());
        }
        if let Some(format) = self.format {
            builder.push(" AND format = ").push_bind(format.as_str());
        }
        if self.only_parsed {
            builder.push(" AND parsed_at IS NOT NULL");
        }

        builder.push(self.order.sql());
        builder
            .push(" LIMIT ")
            .push_bind(i64::from(self.limit.unwrap_or(DEFAULT_QUERY_LIMIT)));
        builder
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_query_sql() {
        let query = IndexQuery::new();
        let builder = query.to_builder();
        let sql = builder.sql();
        assert!(sql.starts_with("SELECT * FROM cache_entries WHERE 1 = 1 ORDER BY quality_score DESC"));
        assert!(sql.ends_with("LIMIT ?"));
    }

    #[test]
    fn test_filters_are_bound() {
        let query = IndexQuery::new()
            .min_quality(0.9)
            .min_tables(5)
            .provider("PMC")
            .format(SourceFormat::Xml)
            .only_parsed();
        let builder = query.to_builder();
        let sql = builder.sql();
        assert!(sql.contains("quality_score >= ?"));
        assert!(sql.contains("table_count >= ?"));
        assert!(sql.contains("provider = ?"));
        assert!(sql.contains("format = ?"));
        assert!(sql.contains("parsed_at IS NOT NULL"));
    }
}
