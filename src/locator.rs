//! Local discovery of already-downloaded source files ("smart cache").
//!
//! No network access happens here. Search order:
//! 1. per-provider directories, for the canonical key and then every
//!    alternate key of the publication;
//! 2. among hits, the best format (XML > LaTeX > HTML > PDF), then provider
//!    preference order;
//! 3. as a last resort, the metadata index by key or alias. An alias is
//!    recorded whenever downloaded bytes match a stored content hash, so this
//!    finds a file stored under a different identifier.

use tracing::{debug, instrument, warn};

use crate::identifier::PublicationIdentifier;
use crate::index::MetadataIndex;
use crate::source::{Provider, SourceFile, SourceFormat, SourceStore};

/// Result of a local lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocateOutcome {
    Found(SourceFile),
    NotFoundLocally,
}

impl LocateOutcome {
    #[must_use]
    pub fn into_found(self) -> Option<SourceFile> {
        match self {
            Self::Found(file) => Some(file),
            Self::NotFoundLocally => None,
        }
    }
}

/// Filesystem and index lookup for source files.
#[derive(Debug, Clone)]
pub struct LocalLocator {
    store: SourceStore,
    index: Option<MetadataIndex>,
    /// Providers in preference order; unlisted providers rank after these by name.
    provider_order: Vec<Provider>,
}

impl LocalLocator {
    #[must_use]
    pub fn new(store: SourceStore, index: Option<MetadataIndex>, provider_order: Vec<Provider>) -> Self {
        Self {
            store,
            index,
            provider_order,
        }
    }

    #[must_use]
    pub fn store(&self) -> &SourceStore {
        &self.store
    }

    /// Finds the best local source file for `id`.
    ///
    /// `alternates` are other keys of the same publication (e.g. the DOI when
    /// `id` is a PMCID); files stored under them are reused.
    #[instrument(skip(self, alternates), fields(id = %id.canonical_key))]
    pub async fn locate(
        &self,
        id: &PublicationIdentifier,
        alternates: &[PublicationIdentifier],
    ) -> LocateOutcome {
        let candidates = self.scan(id, alternates).await;
        if let Some(best) = candidates.into_iter().next() {
            debug!(path = %best.path.display(), provider = %best.provider, format = %best.format, "found in provider directory");
            return LocateOutcome::Found(best);
        }

        if let Some(found) = self.locate_via_index(id, alternates).await {
            debug!(path = %found.path.display(), owner = %found.identifier, "found through metadata index");
            return LocateOutcome::Found(found);
        }

        debug!("not found locally");
        LocateOutcome::NotFoundLocally
    }

    /// Every local file for the publication, best first.
    pub async fn list_local(
        &self,
        id: &PublicationIdentifier,
        alternates: &[PublicationIdentifier],
    ) -> Vec<SourceFile> {
        let mut files = self.scan(id, alternates).await;
        if files.is_empty() {
            if let Some(found) = self.locate_via_index(id, alternates).await {
                files.push(found);
            }
        }
        files
    }

    async fn scan(
        &self,
        id: &PublicationIdentifier,
        alternates: &[PublicationIdentifier],
    ) -> Vec<SourceFile> {
        let providers = match self.store.existing_providers().await {
            Ok(providers) => providers,
            Err(e) => {
                warn!(error = %e, "could not list source directories");
                return Vec::new();
            }
        };

        let mut hits = Vec::new();
        for key in std::iter::once(id).chain(alternates.iter()) {
            for provider in &providers {
                for format in SourceFormat::ALL {
                    let path = self.store.path_for(key, provider, format);
                    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                        continue;
                    }
                    match self
                        .store
                        .describe(&path, &key.canonical_key, provider.clone(), format)
                        .await
                    {
                        Ok(file) => hits.push(file),
                        Err(e) => warn!(path = %path.display(), error = %e, "unreadable source file skipped"),
                    }
                }
            }
        }

        hits.sort_by(|a, b| {
            a.format
                .cmp(&b.format)
                .then_with(|| self.provider_rank(&a.provider).cmp(&self.provider_rank(&b.provider)))
        });
        hits.dedup_by(|a, b| a.path == b.path);
        hits
    }

    async fn locate_via_index(
        &self,
        id: &PublicationIdentifier,
        alternates: &[PublicationIdentifier],
    ) -> Option<SourceFile> {
        let index = self.index.as_ref()?;
        for key in std::iter::once(id).chain(alternates.iter()) {
            let entry = match index.lookup(&key.canonical_key).await {
                Ok(Some(entry)) => entry,
                Ok(None) => continue,
                Err(e) => {
                    warn!(key = %key.canonical_key, error = %e, "index lookup failed");
                    return None;
                }
            };
            let Some(format) = entry.source_format() else {
                continue;
            };
            let path = entry.path();
            match self
                .store
                .describe(&path, &entry.identifier, entry.provider(), format)
                .await
            {
                Ok(file) => return Some(file),
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "indexed file missing on disk");
                }
            }
        }
        None
    }

    fn provider_rank(&self, provider: &Provider) -> (usize, String) {
        let position = self
            .provider_order
            .iter()
            .position(|p| p == provider)
            .unwrap_or(self.provider_order.len());
        (position, provider.as_str().to_string())
    }
}
