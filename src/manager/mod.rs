//! The retrieval orchestrator.
//!
//! [`FullTextManager::get_document`] resolves an identifier set, looks for a
//! local source file, serves or refreshes the parsed cache, and falls back to
//! the waterfall downloader. Concurrent requests for the same canonical key
//! share one in-flight retrieval through the [`LeaseTable`]; unrelated keys
//! run fully in parallel.

mod batch;
mod state;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

pub use batch::{BatchItem, BatchOptions};
pub use state::FetchState;
use state::StateTrail;

use crate::cache::{Freshness, ParsedCache, StaleReason, StalenessPolicy};
use crate::config::FullTextConfig;
use crate::db::Database;
use crate::download::{
    Acquisition, AttemptRecord, FailureReason, HttpFetcher, ProbeReport, UnavailableReport,
    WaterfallDownloader, WaterfallOutcome,
};
use crate::error::FullTextError;
use crate::identifier::{
    IdentifierSet, PrecedencePolicy, PublicationIdentifier, alternate_keys, resolve,
};
use crate::index::{
    CacheEntry, DuplicateGroup, IndexQuery, MetadataIndex, ParseSummary, ProviderAggregate,
    UpsertOutcome,
};
use crate::lease::LeaseTable;
use crate::locator::{LocalLocator, LocateOutcome};
use crate::normalize::{NormalizedDocument, Normalizer, ParsedSource};
use crate::source::{SourceError, SourceFile, SourceStore, content_hash};

/// How a normalized document was obtained.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CacheStatus {
    /// Served from the parsed cache.
    Hit,
    /// No cached document existed; freshly normalized.
    Miss,
    /// A cached document was stale and has been regenerated.
    Refreshed { reasons: Vec<StaleReason> },
}

/// Terminal result of one retrieval.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DocumentOutcome {
    Normalized {
        document: Arc<NormalizedDocument>,
        source: SourceFile,
        cache: CacheStatus,
    },
    /// No provider could supply the document.
    Unavailable { report: UnavailableReport },
    /// The source could not be converted; the last good document, if any,
    /// is served as `fallback`.
    NormalizationFailed {
        reason: String,
        source: SourceFile,
        fallback: Option<Arc<NormalizedDocument>>,
    },
}

impl DocumentOutcome {
    /// The document to hand to callers: the normalized one or the fallback.
    #[must_use]
    pub fn document(&self) -> Option<&NormalizedDocument> {
        match self {
            Self::Normalized { document, .. } => Some(document),
            Self::NormalizationFailed { fallback, .. } => fallback.as_deref(),
            Self::Unavailable { .. } => None,
        }
    }

    #[must_use]
    pub fn source(&self) -> Option<&SourceFile> {
        match self {
            Self::Normalized { source, .. } | Self::NormalizationFailed { source, .. } => {
                Some(source)
            }
            Self::Unavailable { .. } => None,
        }
    }

    #[must_use]
    pub fn state(&self) -> FetchState {
        match self {
            Self::Normalized { .. } => FetchState::Normalized,
            Self::Unavailable { .. } => FetchState::Unavailable,
            Self::NormalizationFailed { .. } => FetchState::NormalizationFailed,
        }
    }
}

/// Response of [`FullTextManager::get_document`].
#[derive(Debug, Clone, Serialize)]
pub struct DocumentResponse {
    pub identifier: PublicationIdentifier,
    /// States passed through, first to last.
    pub states: Vec<FetchState>,
    pub outcome: DocumentOutcome,
    /// `true` when this caller joined a retrieval started by another caller.
    pub coalesced: bool,
}

/// Local files and remote candidates for a publication.
#[derive(Debug, Clone, Serialize)]
pub struct CandidateSources {
    pub identifier: PublicationIdentifier,
    pub local: Vec<SourceFile>,
    pub remote: Vec<ProbeReport>,
}

/// Snapshot of the manager's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ManagerStats {
    pub downloads: u64,
    pub normalizations: u64,
    pub cache_hits: u64,
    /// Callers that joined another caller's in-flight retrieval.
    pub coalesced: u64,
    pub unavailable: u64,
    pub in_flight: usize,
}

#[derive(Debug, Default)]
struct Counters {
    downloads: AtomicU64,
    normalizations: AtomicU64,
    cache_hits: AtomicU64,
    coalesced: AtomicU64,
    unavailable: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Collaborators injected into [`FullTextManager::new`].
#[derive(Debug)]
pub struct ManagerParts {
    pub downloader: WaterfallDownloader,
    pub index: Option<MetadataIndex>,
    pub normalizer: Normalizer,
}

#[derive(Debug)]
struct Inner {
    policy: PrecedencePolicy,
    store: SourceStore,
    locator: LocalLocator,
    downloader: WaterfallDownloader,
    normalizer: Arc<Normalizer>,
    cache: ParsedCache,
    staleness: StalenessPolicy,
    index: Option<MetadataIndex>,
    leases: LeaseTable<DocumentResponse>,
    counters: Counters,
    batch_defaults: BatchOptions,
}

/// One per process: owns the cache directories, the index and the providers.
#[derive(Debug, Clone)]
pub struct FullTextManager {
    inner: Arc<Inner>,
}

impl FullTextManager {
    /// Builds the manager from configuration: opens the index, creates the
    /// HTTP client and the configured provider adapters.
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration, when the cache root cannot be
    /// created, the index cannot be opened or the HTTP client cannot be built.
    #[instrument(skip(config), fields(cache_root = %config.cache_root.display()))]
    pub async fn from_config(config: &FullTextConfig) -> Result<Self, FullTextError> {
        config.validate()?;
        tokio::fs::create_dir_all(&config.cache_root)
            .await
            .map_err(|e| FullTextError::io(&config.cache_root, e))?;

        let db = Database::new_with_options(&config.index_path(), config.database_options()).await?;
        let http = HttpFetcher::new(&config.http_options())?;
        let downloader = WaterfallDownloader::new(
            config.build_adapters(&http),
            config.waterfall_options(),
            Arc::new(config.rate_limiter()),
        );
        info!(providers = ?downloader.providers(), "full-text manager ready");

        Self::new(
            config,
            ManagerParts {
                downloader,
                index: Some(MetadataIndex::new(db)),
                normalizer: Normalizer::default(),
            },
        )
    }

    /// Builds the manager around injected collaborators.
    ///
    /// # Errors
    ///
    /// [`FullTextError::Identifier`] if the precedence list is invalid.
    pub fn new(config: &FullTextConfig, parts: ManagerParts) -> Result<Self, FullTextError> {
        let store = SourceStore::new(config.sources_dir());
        let locator = LocalLocator::new(
            store.clone(),
            parts.index.clone(),
            parts.downloader.providers(),
        );
        let inner = Inner {
            policy: config.precedence_policy()?,
            store,
            locator,
            downloader: parts.downloader,
            normalizer: Arc::new(parts.normalizer),
            cache: ParsedCache::new(config.parsed_dir()),
            staleness: config.staleness_policy(),
            index: parts.index,
            leases: LeaseTable::new(),
            counters: Counters::default(),
            batch_defaults: BatchOptions {
                concurrency: config.batch_concurrency,
                deadline: config.batch_deadline(),
            },
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Retrieves the normalized document for a publication.
    ///
    /// Acquisition and parse failures are reported in the response outcome,
    /// never as an error.
    ///
    /// # Errors
    ///
    /// [`FullTextError::Identifier`] when `ids` holds nothing resolvable.
    #[instrument(skip(self, ids))]
    pub async fn get_document(&self, ids: &IdentifierSet) -> Result<DocumentResponse, FullTextError> {
        let id = resolve(ids, &self.inner.policy)?;
        let alternates = self.alternates_of(ids, &id);
        let key = id.canonical_key.clone();

        let inner = Arc::clone(&self.inner);
        let ids = ids.clone();
        let leased = self
            .inner
            .leases
            .run(&key, move || async move { inner.retrieve(&ids, id, alternates).await })
            .await;

        let mut response = leased.value;
        if leased.joined {
            Counters::bump(&self.inner.counters.coalesced);
            response.coalesced = true;
        }
        Ok(response)
    }

    /// Lists local files and probes every provider, without downloading.
    ///
    /// # Errors
    ///
    /// [`FullTextError::Identifier`] when `ids` holds nothing resolvable.
    #[instrument(skip(self, ids))]
    pub async fn list_candidate_sources(
        &self,
        ids: &IdentifierSet,
    ) -> Result<CandidateSources, FullTextError> {
        let id = resolve(ids, &self.inner.policy)?;
        let alternates = self.alternates_of(ids, &id);
        let (local, remote) = tokio::join!(
            self.inner.locator.list_local(&id, &alternates),
            self.inner.downloader.probe_all(ids)
        );
        Ok(CandidateSources {
            identifier: id,
            local,
            remote,
        })
    }

    #[must_use]
    pub fn index(&self) -> Option<&MetadataIndex> {
        self.inner.index.as_ref()
    }

    fn require_index(&self) -> Result<&MetadataIndex, FullTextError> {
        self.index().ok_or(FullTextError::IndexDisabled)
    }

    /// Filtered scan over the metadata index.
    ///
    /// # Errors
    ///
    /// [`FullTextError::IndexDisabled`] without an index, otherwise index failures.
    pub async fn query(&self, query: &IndexQuery) -> Result<Vec<CacheEntry>, FullTextError> {
        Ok(self.require_index()?.query(query).await?)
    }

    /// Per-provider aggregates over the index.
    ///
    /// # Errors
    ///
    /// [`FullTextError::IndexDisabled`] without an index, otherwise index failures.
    pub async fn provider_aggregates(&self) -> Result<Vec<ProviderAggregate>, FullTextError> {
        Ok(self.require_index()?.provider_aggregates().await?)
    }

    /// Documents reachable through more than one identifier.
    ///
    /// # Errors
    ///
    /// [`FullTextError::IndexDisabled`] without an index, otherwise index failures.
    pub async fn duplicates(&self) -> Result<Vec<DuplicateGroup>, FullTextError> {
        Ok(self.require_index()?.duplicates().await?)
    }

    #[must_use]
    pub fn stats(&self) -> ManagerStats {
        let c = &self.inner.counters;
        ManagerStats {
            downloads: c.downloads.load(Ordering::Relaxed),
            normalizations: c.normalizations.load(Ordering::Relaxed),
            cache_hits: c.cache_hits.load(Ordering::Relaxed),
            coalesced: c.coalesced.load(Ordering::Relaxed),
            unavailable: c.unavailable.load(Ordering::Relaxed),
            in_flight: self.inner.leases.in_flight(),
        }
    }

    fn alternates_of(
        &self,
        ids: &IdentifierSet,
        id: &PublicationIdentifier,
    ) -> Vec<PublicationIdentifier> {
        alternate_keys(ids, &self.inner.policy)
            .into_iter()
            .filter(|k| k.canonical_key != id.canonical_key)
            .collect()
    }
}

impl Inner {
    #[instrument(skip(self, ids, alternates), fields(key = %id.canonical_key))]
    async fn retrieve(
        &self,
        ids: &IdentifierSet,
        id: PublicationIdentifier,
        alternates: Vec<PublicationIdentifier>,
    ) -> DocumentResponse {
        let mut trail = StateTrail::new();
        trail.advance(FetchState::Locating);

        let outcome = match self.locator.locate(&id, &alternates).await {
            LocateOutcome::Found(source) => {
                trail.advance(FetchState::FoundLocal);
                let owner = self.owner_of(&id, &alternates, &source).await;
                self.serve_local(&mut trail, &owner, source).await
            }
            LocateOutcome::NotFoundLocally => {
                trail.advance(FetchState::Downloading);
                self.download(&mut trail, ids, &id).await
            }
        };

        DocumentResponse {
            identifier: id,
            states: trail.into_states(),
            outcome,
            coalesced: false,
        }
    }

    /// Identifier the source file (and its parsed document) is stored under.
    async fn owner_of(
        &self,
        id: &PublicationIdentifier,
        alternates: &[PublicationIdentifier],
        source: &SourceFile,
    ) -> PublicationIdentifier {
        if let Some(own) = std::iter::once(id)
            .chain(alternates)
            .find(|k| k.canonical_key == source.identifier)
        {
            return own.clone();
        }
        if let Some(index) = &self.index {
            match index.get(&source.identifier).await {
                Ok(Some(entry)) => {
                    if let Some(owner) = entry
                        .kind()
                        .and_then(|kind| PublicationIdentifier::from_stored(kind, &entry.identifier).ok())
                    {
                        return owner;
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(owner = %source.identifier, error = %e, "index lookup failed"),
            }
        }
        id.clone()
    }

    async fn serve_local(
        &self,
        trail: &mut StateTrail,
        owner: &PublicationIdentifier,
        source: SourceFile,
    ) -> DocumentOutcome {
        let cached = match self.cache.load(owner).await {
            Ok(doc) => doc,
            Err(e) => {
                warn!(error = %e, "unreadable cached document, re-normalizing");
                None
            }
        };
        let Some(doc) = cached else {
            return self
                .normalize(trail, owner, source, None, CacheStatus::Miss)
                .await;
        };

        match self.staleness.evaluate(&doc, &source) {
            Freshness::Fresh => {
                Counters::bump(&self.counters.cache_hits);
                self.index_touch(owner).await;
                trail.advance(FetchState::Normalized);
                debug!("served from parsed cache");
                DocumentOutcome::Normalized {
                    document: Arc::new(doc),
                    source,
                    cache: CacheStatus::Hit,
                }
            }
            Freshness::Stale(reasons) => {
                debug!(?reasons, "cached document is stale");
                let schema_only =
                    matches!(reasons.as_slice(), [StaleReason::SchemaOutdated { .. }]);
                if schema_only {
                    match self.normalizer.upgrade(doc.clone()) {
                        Ok(upgraded) => {
                            trail.advance(FetchState::Normalizing);
                            return self
                                .finish(trail, owner, source, upgraded, CacheStatus::Refreshed { reasons })
                                .await;
                        }
                        Err(e) => debug!(error = %e, "schema upgrade impossible, re-normalizing"),
                    }
                }
                self.normalize(
                    trail,
                    owner,
                    source,
                    Some(doc),
                    CacheStatus::Refreshed { reasons },
                )
                .await
            }
        }
    }

    async fn download(
        &self,
        trail: &mut StateTrail,
        ids: &IdentifierSet,
        id: &PublicationIdentifier,
    ) -> DocumentOutcome {
        let acquisition = match self.downloader.acquire(ids, &id.canonical_key).await {
            WaterfallOutcome::Acquired(acquisition) => acquisition,
            WaterfallOutcome::Unavailable(report) => {
                Counters::bump(&self.counters.unavailable);
                trail.advance(FetchState::Unavailable);
                info!(attempts = report.attempts.len(), summary = %report.summary(), "document unavailable");
                return DocumentOutcome::Unavailable { report };
            }
        };
        Counters::bump(&self.counters.downloads);

        match self.store_acquisition(id, &acquisition).await {
            Ok((owner, source)) => {
                trail.advance(FetchState::Downloaded);
                self.normalize(trail, &owner, source, None, CacheStatus::Miss)
                    .await
            }
            Err(e) => {
                warn!(error = %e, "failed to store downloaded source");
                Counters::bump(&self.counters.unavailable);
                trail.advance(FetchState::Unavailable);
                let mut attempts = acquisition.failed_attempts;
                attempts.push(AttemptRecord {
                    provider: acquisition.provider,
                    tier: Some(acquisition.tier),
                    url: Some(acquisition.url),
                    reason: FailureReason::Io,
                    detail: e.to_string(),
                    attempts: 1,
                });
                DocumentOutcome::Unavailable {
                    report: UnavailableReport { attempts },
                }
            }
        }
    }

    /// Persists downloaded bytes unless identical content is already stored
    /// under another identifier, in which case `id` becomes its alias.
    async fn store_acquisition(
        &self,
        id: &PublicationIdentifier,
        acquisition: &Acquisition,
    ) -> Result<(PublicationIdentifier, SourceFile), SourceError> {
        let hash = content_hash(&acquisition.bytes);
        if let Some(existing) = self.existing_copy(id, &hash).await {
            return Ok(existing);
        }

        let source = self
            .store
            .persist(id, &acquisition.provider, acquisition.format, &acquisition.bytes)
            .await?;
        let Some(index) = &self.index else {
            return Ok((id.clone(), source));
        };
        let canonical = match index.upsert(&CacheEntry::from_source(id, &source)).await {
            Ok(UpsertOutcome::Merged { canonical }) => canonical,
            Ok(_) => return Ok((id.clone(), source)),
            Err(e) => {
                warn!(error = %e, transient = e.is_transient(), "index upsert failed");
                return Ok((id.clone(), source));
            }
        };

        // A concurrent retrieval under another key stored the same bytes first.
        let entry = match index.get(&canonical).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return Ok((id.clone(), source)),
            Err(e) => {
                warn!(error = %e, "index owner lookup failed, keeping second copy");
                return Ok((id.clone(), source));
            }
        };
        match self.owner_copy(&entry, &hash).await {
            Some((owner, owner_source)) if owner_source.path != source.path => {
                if let Err(e) = tokio::fs::remove_file(&source.path).await {
                    warn!(path = %source.path.display(), error = %e, "failed to remove duplicate source");
                }
                debug!(%canonical, "dropped copy stored concurrently under another identifier");
                Ok((owner, owner_source))
            }
            _ => Ok((id.clone(), source)),
        }
    }

    async fn existing_copy(
        &self,
        id: &PublicationIdentifier,
        hash: &str,
    ) -> Option<(PublicationIdentifier, SourceFile)> {
        let index = self.index.as_ref()?;
        let entry = match index.find_by_hash(hash).await {
            Ok(Some(entry)) if entry.identifier != id.canonical_key => entry,
            Ok(_) => return None,
            Err(e) => {
                warn!(error = %e, "index hash lookup failed");
                return None;
            }
        };
        let (owner, source) = self.owner_copy(&entry, hash).await?;

        if let Err(e) = index.add_alias(id, &entry.identifier).await {
            warn!(error = %e, "failed to record identifier alias");
        }
        warn!(
            identifier = %id.canonical_key,
            canonical = %entry.identifier,
            content_hash = %hash,
            "identifier conflict: identical content already stored, recorded as alias"
        );
        Some((owner, source))
    }

    /// The owning identifier of `entry` and its source file, if the file on
    /// disk still has content `hash`.
    async fn owner_copy(
        &self,
        entry: &CacheEntry,
        hash: &str,
    ) -> Option<(PublicationIdentifier, SourceFile)> {
        let format = entry.source_format()?;
        let owner = entry
            .kind()
            .and_then(|kind| PublicationIdentifier::from_stored(kind, &entry.identifier).ok())?;

        match self
            .store
            .describe(&entry.path(), &entry.identifier, entry.provider(), format)
            .await
        {
            Ok(source) if source.content_hash == hash => Some((owner, source)),
            Ok(_) | Err(_) => {
                debug!(path = %entry.file_path, "indexed copy missing or changed");
                None
            }
        }
    }

    async fn normalize(
        &self,
        trail: &mut StateTrail,
        owner: &PublicationIdentifier,
        source: SourceFile,
        last_good: Option<NormalizedDocument>,
        status: CacheStatus,
    ) -> DocumentOutcome {
        trail.advance(FetchState::Normalizing);

        let bytes = match tokio::fs::read(&source.path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                let reason = format!("cannot read {}: {e}", source.path.display());
                return Self::failed(trail, reason, source, last_good);
            }
        };

        Counters::bump(&self.counters.normalizations);
        let normalizer = Arc::clone(&self.normalizer);
        let file = source.clone();
        let parsed = ParsedSource::from_bytes(source.format, bytes);
        let result = tokio::task::spawn_blocking(move || normalizer.normalize(parsed, &file)).await;

        match result {
            Ok(Ok(doc)) => self.finish(trail, owner, source, doc, status).await,
            Ok(Err(e)) => Self::failed(trail, e.to_string(), source, last_good),
            Err(e) => Self::failed(trail, format!("normalization task failed: {e}"), source, last_good),
        }
    }

    /// Caches and indexes a fresh document.
    async fn finish(
        &self,
        trail: &mut StateTrail,
        owner: &PublicationIdentifier,
        source: SourceFile,
        doc: NormalizedDocument,
        status: CacheStatus,
    ) -> DocumentOutcome {
        if let Err(e) = self.cache.store(owner, &doc).await {
            warn!(error = %e, "failed to cache normalized document");
        }
        self.index_parse(owner, &source, &doc).await;
        trail.advance(FetchState::Normalized);
        DocumentOutcome::Normalized {
            document: Arc::new(doc),
            source,
            cache: status,
        }
    }

    fn failed(
        trail: &mut StateTrail,
        reason: String,
        source: SourceFile,
        last_good: Option<NormalizedDocument>,
    ) -> DocumentOutcome {
        warn!(%reason, has_fallback = last_good.is_some(), "normalization failed");
        trail.advance(FetchState::NormalizationFailed);
        DocumentOutcome::NormalizationFailed {
            reason,
            source,
            fallback: last_good.map(Arc::new),
        }
    }

    async fn index_parse(&self, owner: &PublicationIdentifier, source: &SourceFile, doc: &NormalizedDocument) {
        let Some(index) = &self.index else {
            return;
        };
        let target = match index.upsert(&CacheEntry::from_source(owner, source)).await {
            Ok(UpsertOutcome::Merged { canonical }) => canonical,
            Ok(_) => owner.canonical_key.clone(),
            Err(e) => {
                warn!(error = %e, transient = e.is_transient(), "index upsert failed");
                return;
            }
        };
        if let Err(e) = index.record_parse(&target, &ParseSummary::from(doc)).await {
            warn!(error = %e, transient = e.is_transient(), "failed to record parse in index");
        }
    }

    async fn index_touch(&self, owner: &PublicationIdentifier) {
        if let Some(index) = &self.index
            && let Err(e) = index.touch(&owner.canonical_key).await
        {
            debug!(error = %e, "index touch failed");
        }
    }
}
