//! Metadata index over cached documents.
//!
//! A SQLite table of [`CacheEntry`] rows, one per physical document, plus an
//! alias table mapping further identifiers onto the same document. The index
//! answers filtered scans and per-provider aggregates without touching the
//! compressed document bodies.
//!
//! The index is a derived accelerator: callers treat write failures as
//! best-effort and log them instead of failing document retrieval.

mod entry;
mod error;
mod query;

pub use entry::{CacheEntry, DuplicateGroup, ParseSummary, ProviderAggregate, UpsertOutcome};
pub use error::{IndexDbErrorKind, IndexError};
pub use query::{DEFAULT_QUERY_LIMIT, IndexOrder, IndexQuery};

use chrono::Utc;
use sqlx::Row;
use tracing::{debug, instrument, warn};

use crate::db::Database;
use crate::identifier::PublicationIdentifier;

/// Result type for index operations.
pub type Result<T> = std::result::Result<T, IndexError>;

/// Queryable store over [`CacheEntry`] rows.
#[derive(Debug, Clone)]
pub struct MetadataIndex {
    db: Database,
}

impl MetadataIndex {
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[must_use]
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Inserts or updates the row for `entry.identifier`.
    ///
    /// When another identifier already owns `entry.content_hash`, no second
    /// row is written: the identifier becomes an alias of the owner and
    /// [`UpsertOutcome::Merged`] is returned.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Database`] if any statement fails; the
    /// transaction is rolled back.
    #[instrument(skip(self, entry), fields(identifier = %entry.identifier, hash = %entry.content_hash))]
    pub async fn upsert(&self, entry: &CacheEntry) -> Result<UpsertOutcome> {
        let mut tx = self.db.pool().begin().await?;

        let owner: Option<String> =
            sqlx::query_scalar(r"SELECT identifier FROM cache_entries WHERE content_hash = ?")
                .bind(&entry.content_hash)
                .fetch_optional(&mut *tx)
                .await?;

        if let Some(owner) = owner.filter(|o| o != &entry.identifier) {
            // The identifier's own row (if any) pointed at different bytes and is superseded.
            sqlx::query(r"UPDATE identifier_aliases SET identifier = ? WHERE identifier = ?")
                .bind(&owner)
                .bind(&entry.identifier)
                .execute(&mut *tx)
                .await?;
            sqlx::query(r"DELETE FROM cache_entries WHERE identifier = ?")
                .bind(&entry.identifier)
                .execute(&mut *tx)
                .await?;
            sqlx::query(
                r"INSERT INTO identifier_aliases (alias, alias_kind, identifier, created_at)
                  VALUES (?, ?, ?, ?)
                  ON CONFLICT(alias) DO UPDATE SET identifier = excluded.identifier",
            )
            .bind(&entry.identifier)
            .bind(&entry.identifier_kind)
            .bind(&owner)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;

            warn!(
                identifier = %entry.identifier,
                canonical = %owner,
                content_hash = %entry.content_hash,
                "identifier conflict: identical content already indexed, merged as alias"
            );
            return Ok(UpsertOutcome::Merged { canonical: owner });
        }

        let existed: Option<i64> =
            sqlx::query_scalar(r"SELECT 1 FROM cache_entries WHERE identifier = ?")
                .bind(&entry.identifier)
                .fetch_optional(&mut *tx)
                .await?;

        sqlx::query(r"DELETE FROM identifier_aliases WHERE alias = ?")
            .bind(&entry.identifier)
            .execute(&mut *tx)
            .await?;

        // Parse results survive only while the content hash is unchanged.
        sqlx::query(
            r"INSERT INTO cache_entries (
                  identifier, identifier_kind, file_path, content_hash, provider, format,
                  size_bytes, title, section_count, table_count, figure_count, reference_count,
                  quality_score, downloaded_at, parsed_at, last_accessed_at
              ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
              ON CONFLICT(identifier) DO UPDATE SET
                  identifier_kind = excluded.identifier_kind,
                  file_path = excluded.file_path,
                  provider = excluded.provider,
                  format = excluded.format,
                  size_bytes = excluded.size_bytes,
                  downloaded_at = excluded.downloaded_at,
                  last_accessed_at = excluded.last_accessed_at,
                  title = CASE WHEN cache_entries.content_hash = excluded.content_hash
                               THEN cache_entries.title ELSE excluded.title END,
                  section_count = CASE WHEN cache_entries.content_hash = excluded.content_hash
                               THEN cache_entries.section_count ELSE excluded.section_count END,
                  table_count = CASE WHEN cache_entries.content_hash = excluded.content_hash
                               THEN cache_entries.table_count ELSE excluded.table_count END,
                  figure_count = CASE WHEN cache_entries.content_hash = excluded.content_hash
                               THEN cache_entries.figure_count ELSE excluded.figure_count END,
                  reference_count = CASE WHEN cache_entries.content_hash = excluded.content_hash
                               THEN cache_entries.reference_count ELSE excluded.reference_count END,
                  quality_score = CASE WHEN cache_entries.content_hash = excluded.content_hash
                               THEN cache_entries.quality_score ELSE excluded.quality_score END,
                  parsed_at = CASE WHEN cache_entries.content_hash = excluded.content_hash
                               THEN cache_entries.parsed_at ELSE excluded.parsed_at END,
                  content_hash = excluded.content_hash",
        )
        .bind(&entry.identifier)
        .bind(&entry.identifier_kind)
        .bind(&entry.file_path)
        .bind(&entry.content_hash)
        .bind(&entry.provider)
        .bind(&entry.format)
        .bind(entry.size_bytes)
        .bind(&entry.title)
        .bind(entry.section_count)
        .bind(entry.table_count)
        .bind(entry.figure_count)
        .bind(entry.reference_count)
        .bind(entry.quality_score)
        .bind(entry.downloaded_at)
        .bind(entry.parsed_at)
        .bind(entry.last_accessed_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let outcome = if existed.is_some() {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Inserted
        };
        debug!(?outcome, "index entry upserted");
        Ok(outcome)
    }

    /// Records an additional identifier for an already-indexed document.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::NotFound`] when `canonical` has no row.
    #[instrument(skip(self, alias), fields(alias = %alias.canonical_key))]
    pub async fn add_alias(&self, alias: &PublicationIdentifier, canonical: &str) -> Result<()> {
        if alias.canonical_key == canonical {
            return Ok(());
        }
        let result = sqlx::query(
            r"INSERT INTO identifier_aliases (alias, alias_kind, identifier, created_at)
              SELECT ?, ?, identifier, ? FROM cache_entries WHERE identifier = ?
              ON CONFLICT(alias) DO UPDATE SET identifier = excluded.identifier",
        )
        .bind(&alias.canonical_key)
        .bind(alias.kind.as_str())
        .bind(Utc::now())
        .bind(canonical)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(IndexError::NotFound(canonical.to_string()));
        }
        Ok(())
    }

    /// Returns the row owned directly by `identifier`.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Database`] if the query fails.
    pub async fn get(&self, identifier: &str) -> Result<Option<CacheEntry>> {
        let entry = sqlx::query_as::<_, CacheEntry>(r"SELECT * FROM cache_entries WHERE identifier = ?")
            .bind(identifier)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(entry)
    }

    /// Returns the owning identifier for an alias, if one is recorded.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Database`] if the query fails.
    pub async fn resolve_alias(&self, alias: &str) -> Result<Option<String>> {
        let owner = sqlx::query_scalar(r"SELECT identifier FROM identifier_aliases WHERE alias = ?")
            .bind(alias)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(owner)
    }

    /// Looks `identifier` up directly, then through the alias table.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Database`] if a query fails.
    pub async fn lookup(&self, identifier: &str) -> Result<Option<CacheEntry>> {
        if let Some(entry) = self.get(identifier).await? {
            return Ok(Some(entry));
        }
        let entry = sqlx::query_as::<_, CacheEntry>(
            r"SELECT c.* FROM cache_entries c
              JOIN identifier_aliases a ON a.identifier = c.identifier
              WHERE a.alias = ?",
        )
        .bind(identifier)
        .fetch_optional(self.db.pool())
        .await?;
        Ok(entry)
    }

    /// Returns the row holding `content_hash`.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Database`] if the query fails.
    pub async fn find_by_hash(&self, content_hash: &str) -> Result<Option<CacheEntry>> {
        let entry =
            sqlx::query_as::<_, CacheEntry>(r"SELECT * FROM cache_entries WHERE content_hash = ?")
                .bind(content_hash)
                .fetch_optional(self.db.pool())
                .await?;
        Ok(entry)
    }

    /// Lists every alias pointing at `identifier`.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Database`] if the query fails.
    pub async fn aliases_of(&self, identifier: &str) -> Result<Vec<String>> {
        let aliases = sqlx::query_scalar(
            r"SELECT alias FROM identifier_aliases WHERE identifier = ? ORDER BY alias",
        )
        .bind(identifier)
        .fetch_all(self.db.pool())
        .await?;
        Ok(aliases)
    }

    /// Updates `last_accessed_at` to now.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::NotFound`] when no row exists.
    pub async fn touch(&self, identifier: &str) -> Result<()> {
        let result =
            sqlx::query(r"UPDATE cache_entries SET last_accessed_at = ? WHERE identifier = ?")
                .bind(Utc::now())
                .bind(identifier)
                .execute(self.db.pool())
                .await?;
        check_affected(identifier, result.rows_affected())
    }

    /// Stores the structural summary of a fresh normalization.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::NotFound`] when no row exists.
    #[instrument(skip(self, summary), fields(quality = summary.quality_score))]
    pub async fn record_parse(&self, identifier: &str, summary: &ParseSummary) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE cache_entries
              SET title = ?, section_count = ?, table_count = ?, figure_count = ?,
                  reference_count = ?, quality_score = ?, parsed_at = ?, last_accessed_at = ?
              WHERE identifier = ?",
        )
        .bind(&summary.title)
        .bind(summary.section_count)
        .bind(summary.table_count)
        .bind(summary.figure_count)
        .bind(summary.reference_count)
        .bind(summary.quality_score)
        .bind(summary.parsed_at)
        .bind(Utc::now())
        .bind(identifier)
        .execute(self.db.pool())
        .await?;
        check_affected(identifier, result.rows_affected())
    }

    /// Deletes the row for `identifier` (aliases cascade).
    ///
    /// Returns whether a row was removed.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Database`] if the delete fails.
    pub async fn remove(&self, identifier: &str) -> Result<bool> {
        let result = sqlx::query(r"DELETE FROM cache_entries WHERE identifier = ?")
            .bind(identifier)
            .execute(self.db.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Runs a filtered scan.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn query(&self, query: &IndexQuery) -> Result<Vec<CacheEntry>> {
        let mut builder = query.to_builder();
        let entries = builder
            .build_query_as::<CacheEntry>()
            .fetch_all(self.db.pool())
            .await?;
        Ok(entries)
    }

    /// Number of physical documents indexed.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Database`] if the query fails.
    pub async fn count(&self) -> Result<i64> {
        let row = sqlx::query(r"SELECT COUNT(*) AS count FROM cache_entries")
            .fetch_one(self.db.pool())
            .await?;
        Ok(row.get::<i64, _>("count"))
    }

    /// Document counts, mean quality and totals grouped by provider.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Database`] if the query fails.
    pub async fn provider_aggregates(&self) -> Result<Vec<ProviderAggregate>> {
        let rows = sqlx::query_as::<_, ProviderAggregate>(
            r"SELECT provider,
                     COUNT(*) AS documents,
                     COUNT(parsed_at) AS parsed_documents,
                     AVG(quality_score) AS avg_quality,
                     COALESCE(SUM(table_count), 0) AS total_tables,
                     COALESCE(SUM(figure_count), 0) AS total_figures,
                     COALESCE(SUM(size_bytes), 0) AS total_bytes
              FROM cache_entries
              GROUP BY provider
              ORDER BY provider",
        )
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows)
    }

    /// Documents reachable through more than one identifier.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Database`] if the query fails.
    pub async fn duplicates(&self) -> Result<Vec<DuplicateGroup>> {
        let rows = sqlx::query(
            r"SELECT c.identifier AS identifier, c.content_hash AS content_hash, a.alias AS alias
              FROM cache_entries c
              JOIN identifier_aliases a ON a.identifier = c.identifier
              ORDER BY c.identifier, a.alias",
        )
        .fetch_all(self.db.pool())
        .await?;

        let mut groups: Vec<DuplicateGroup> = Vec::new();
        for row in rows {
            let identifier: String = row.get("identifier");
            let alias: String = row.get("alias");
            match groups.last_mut() {
                Some(group) if group.identifier == identifier => group.aliases.push(alias),
                _ => groups.push(DuplicateGroup {
                    identifier,
                    content_hash: row.get("content_hash"),
                    aliases: vec![alias],
                }),
            }
        }
        Ok(groups)
    }
}

/// Returns `Ok(())` if at least one row was affected; otherwise [`IndexError::NotFound`].
fn check_affected(identifier: &str, rows_affected: u64) -> Result<()> {
    if rows_affected == 0 {
        Err(IndexError::NotFound(identifier.to_string()))
    } else {
        Ok(())
    }
}
