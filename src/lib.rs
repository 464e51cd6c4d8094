//! Full-text acquisition and caching for scientific publications.
//!
//! Given any mix of identifiers (PMCID, DOI, PMID, arXiv ID, title), the
//! library finds a local copy or downloads one through a tiered waterfall of
//! providers, converts it into a single canonical [`NormalizedDocument`], and
//! caches both the source file and the parsed result.
//!
//! # Architecture
//!
//! - [`identifier`] - identifier normalization and canonical key resolution
//! - [`source`] - on-disk store of downloaded source files
//! - [`locator`] - finds existing local sources
//! - [`download`] - HTTP client, provider adapters and the waterfall
//! - [`normalize`] - format converters (JATS, LaTeX, HTML, PDF)
//! - [`cache`] - compressed parsed-document cache and staleness rules
//! - [`index`] - SQLite metadata index over cached documents
//! - [`manager`] - the [`FullTextManager`] orchestrator

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod config;
pub mod db;
pub mod download;
pub mod error;
pub mod identifier;
pub mod index;
pub mod lease;
pub mod locator;
pub mod manager;
pub mod normalize;
pub mod source;

// Re-export commonly used types
pub use cache::{Freshness, ParsedCache, StaleReason, StalenessPolicy};
pub use config::{ConfigError, FullTextConfig, ProviderConfig};
pub use db::{Database, DatabaseOptions, DbError};
pub use download::{
    AttemptRecord, FailureReason, ProviderAdapter, RateLimiter, UnavailableReport,
    WaterfallDownloader,
};
pub use error::FullTextError;
pub use identifier::{IdentifierKind, IdentifierSet, PrecedencePolicy, PublicationIdentifier};
pub use index::{CacheEntry, IndexQuery, MetadataIndex};
pub use manager::{
    BatchItem, BatchOptions, CacheStatus, CandidateSources, DocumentOutcome, DocumentResponse,
    FetchState, FullTextManager, ManagerParts, ManagerStats,
};
pub use normalize::{NormalizedDocument, Normalizer, ParseError};
pub use source::{Provider, ProviderTier, SourceFile, SourceFormat};
