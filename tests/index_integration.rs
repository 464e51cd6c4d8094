//! Integration tests for the SQLite-backed metadata index.

use chrono::{Duration, Utc};
use fulltext_core::index::{IndexError, IndexOrder, ParseSummary, UpsertOutcome};
use fulltext_core::identifier::resolve;
use fulltext_core::{
    CacheEntry, Database, IdentifierSet, IndexQuery, MetadataIndex, PrecedencePolicy,
    SourceFormat,
};
use tempfile::TempDir;

fn entry(identifier: &str, provider: &str, format: SourceFormat, hash: &str) -> CacheEntry {
    let now = Utc::now();
    CacheEntry {
        identifier: identifier.to_string(),
        identifier_kind: "doi".to_string(),
        file_path: format!("/cache/sources/{provider}/{identifier}.{}", format.extension()),
        content_hash: hash.to_string(),
        provider: provider.to_string(),
        format: format.as_str().to_string(),
        size_bytes: 1000,
        title: None,
        section_count: 0,
        table_count: 0,
        figure_count: 0,
        reference_count: 0,
        quality_score: None,
        downloaded_at: now,
        parsed_at: None,
        last_accessed_at: now,
    }
}

fn summary(quality: f64, tables: i64, figures: i64) -> ParseSummary {
    ParseSummary {
        title: Some("A paper".to_string()),
        section_count: 5,
        table_count: tables,
        figure_count: figures,
        reference_count: 12,
        quality_score: quality,
        parsed_at: Utc::now(),
    }
}

async fn seeded(index: &MetadataIndex) {
    let rows = [
        ("10.1/a", "pmc", SourceFormat::Xml, "h1", 0.95, 6, 2),
        ("10.1/b", "pmc", SourceFormat::Xml, "h2", 0.75, 1, 0),
        ("10.1/c", "arxiv", SourceFormat::Pdf, "h3", 0.55, 7, 4),
    ];
    for (id, provider, format, hash, quality, tables, figures) in rows {
        index.upsert(&entry(id, provider, format, hash)).await.unwrap();
        index
            .record_parse(id, &summary(quality, tables, figures))
            .await
            .unwrap();
    }
    index
        .upsert(&entry("10.1/d", "unpaywall", SourceFormat::Pdf, "h4"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_index_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("index.db");
    {
        let index = MetadataIndex::new(Database::new(&path).await.unwrap());
        seeded(&index).await;
    }
    let index = MetadataIndex::new(Database::new(&path).await.unwrap());
    assert_eq!(index.count().await.unwrap(), 4);
    let a = index.get("10.1/a").await.unwrap().unwrap();
    assert_eq!(a.table_count, 6);
    assert_eq!(a.quality_score, Some(0.95));
}

#[tokio::test]
async fn test_quality_and_table_filters() {
    let index = MetadataIndex::new(Database::new_in_memory().await.unwrap());
    seeded(&index).await;

    let hits = index
        .query(&IndexQuery::new().min_quality(0.7).min_tables(5))
        .await
        .unwrap();
    let ids: Vec<_> = hits.iter().map(|e| e.identifier.as_str()).collect();
    assert_eq!(ids, vec!["10.1/a"]);

    let pdfs = index
        .query(&IndexQuery::new().format(SourceFormat::Pdf).order(IndexOrder::Identifier))
        .await
        .unwrap();
    let ids: Vec<_> = pdfs.iter().map(|e| e.identifier.as_str()).collect();
    assert_eq!(ids, vec!["10.1/c", "10.1/d"]);

    let parsed = index.query(&IndexQuery::new().only_parsed()).await.unwrap();
    assert_eq!(parsed.len(), 3);
    assert_eq!(parsed[0].identifier, "10.1/a");

    let limited = index.query(&IndexQuery::new().limit(2)).await.unwrap();
    assert_eq!(limited.len(), 2);
}

#[tokio::test]
async fn test_provider_aggregates() {
    let index = MetadataIndex::new(Database::new_in_memory().await.unwrap());
    seeded(&index).await;

    let aggregates = index.provider_aggregates().await.unwrap();
    let pmc = aggregates.iter().find(|a| a.provider == "pmc").unwrap();
    assert_eq!(pmc.documents, 2);
    assert_eq!(pmc.parsed_documents, 2);
    assert_eq!(pmc.total_tables, 7);
    assert!((pmc.avg_quality.unwrap() - 0.85).abs() < 1e-9);

    let unpaywall = aggregates.iter().find(|a| a.provider == "unpaywall").unwrap();
    assert_eq!(unpaywall.parsed_documents, 0);
    assert_eq!(unpaywall.avg_quality, None);
}

#[tokio::test]
async fn test_same_hash_merges_into_alias() {
    let index = MetadataIndex::new(Database::new_in_memory().await.unwrap());
    seeded(&index).await;

    let outcome = index
        .upsert(&entry("10.1/a-copy", "mirror", SourceFormat::Xml, "h1"))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        UpsertOutcome::Merged {
            canonical: "10.1/a".to_string()
        }
    );
    assert_eq!(index.count().await.unwrap(), 4);
    assert_eq!(index.resolve_alias("10.1/a-copy").await.unwrap().as_deref(), Some("10.1/a"));
    assert_eq!(
        index.lookup("10.1/a-copy").await.unwrap().unwrap().identifier,
        "10.1/a"
    );
}

#[tokio::test]
async fn test_add_alias_requires_existing_owner() {
    let index = MetadataIndex::new(Database::new_in_memory().await.unwrap());
    seeded(&index).await;
    let policy = PrecedencePolicy::default();
    let pmid = resolve(&IdentifierSet::default().with_pmid("42"), &policy).unwrap();

    index.add_alias(&pmid, "10.1/b").await.unwrap();
    assert_eq!(index.aliases_of("10.1/b").await.unwrap(), vec!["42".to_string()]);

    let err = index.add_alias(&pmid, "10.1/missing").await.unwrap_err();
    assert!(matches!(err, IndexError::NotFound(_)));
}

#[tokio::test]
async fn test_remove_drops_row_and_aliases() {
    let index = MetadataIndex::new(Database::new_in_memory().await.unwrap());
    seeded(&index).await;
    let policy = PrecedencePolicy::default();
    let pmid = resolve(&IdentifierSet::default().with_pmid("43"), &policy).unwrap();
    index.add_alias(&pmid, "10.1/c").await.unwrap();

    assert!(index.remove("10.1/c").await.unwrap());
    assert!(!index.remove("10.1/c").await.unwrap());
    assert!(index.resolve_alias("43").await.unwrap().is_none());
    assert!(index.duplicates().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_touch_and_staleness() {
    let index = MetadataIndex::new(Database::new_in_memory().await.unwrap());
    seeded(&index).await;

    assert!(matches!(
        index.touch("10.1/nope").await.unwrap_err(),
        IndexError::NotFound(_)
    ));
    index.touch("10.1/a").await.unwrap();

    let a = index.get("10.1/a").await.unwrap().unwrap();
    assert!(!a.is_stale(Duration::days(90)));
    let d = index.get("10.1/d").await.unwrap().unwrap();
    assert!(d.is_stale(Duration::days(90)), "never-parsed entries are stale");
}
