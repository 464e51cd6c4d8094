//! Provider adapter contract.
//!
//! An adapter knows how to turn an [`IdentifierSet`] into a candidate URL
//! (`probe`) and how to fetch that URL (`fetch`). Query construction and any
//! provider-specific credentials stay inside the adapter; the waterfall only
//! sees candidates, bytes and [`DownloadError`]s.

use async_trait::async_trait;
use serde::Serialize;

use super::DownloadError;
use super::client::HttpFetcher;
use crate::identifier::IdentifierSet;
use crate::source::{Provider, ProviderTier, SourceFormat};

/// A URL a provider claims to serve for a publication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CandidateSource {
    pub provider: Provider,
    pub tier: ProviderTier,
    pub url: String,
    pub format: SourceFormat,
}

/// One external full-text source.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Provider this adapter stores files under.
    fn provider(&self) -> Provider;

    fn tier(&self) -> ProviderTier;

    /// Format the adapter's candidates are expected to be.
    fn expected_format(&self) -> SourceFormat;

    /// Concurrent in-flight requests allowed against this provider.
    ///
    /// `None` uses the downloader-wide default.
    fn max_concurrency(&self) -> Option<usize> {
        None
    }

    /// Returns a candidate URL, or `None` when the provider cannot serve
    /// this publication (e.g. the needed identifier is absent).
    ///
    /// Probing may call lightweight lookup APIs but never downloads content.
    async fn probe(&self, ids: &IdentifierSet) -> Result<Option<CandidateSource>, DownloadError>;

    /// Fetches the candidate's bytes.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, DownloadError>;
}

/// Plain GET through the shared fetcher; the default `fetch` body for adapters.
pub(crate) async fn fetch_with(http: &HttpFetcher, url: &str) -> Result<Vec<u8>, DownloadError> {
    Ok(http.get_bytes(url).await?.bytes)
}
