//! arXiv PDFs.

use async_trait::async_trait;

use crate::download::DownloadError;
use crate::download::adapter::{CandidateSource, ProviderAdapter, fetch_with};
use crate::download::client::HttpFetcher;
use crate::identifier::{IdentifierKind, IdentifierSet, normalize_arxiv_id};
use crate::source::{Provider, ProviderTier, SourceFormat};

pub const ARXIV_BASE_URL: &str = "https://arxiv.org";

/// DOI prefix arXiv registers for its preprints.
const ARXIV_DOI_PREFIX: &str = "10.48550/";

/// Tier-1 adapter serving `<base>/pdf/<id>`.
#[derive(Debug, Clone)]
pub struct ArxivAdapter {
    http: HttpFetcher,
    base_url: String,
}

impl ArxivAdapter {
    #[must_use]
    pub fn new(http: HttpFetcher, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn arxiv_id(ids: &IdentifierSet) -> Option<String> {
        ids.normalized(IdentifierKind::Arxiv).or_else(|| {
            ids.normalized(IdentifierKind::Doi)
                .filter(|doi| doi.starts_with(ARXIV_DOI_PREFIX))
                .and_then(|doi| normalize_arxiv_id(&doi))
        })
    }
}

#[async_trait]
impl ProviderAdapter for ArxivAdapter {
    fn provider(&self) -> Provider {
        Provider::Arxiv
    }

    fn tier(&self) -> ProviderTier {
        ProviderTier::FreeStructured
    }

    fn expected_format(&self) -> SourceFormat {
        SourceFormat::Pdf
    }

    async fn probe(&self, ids: &IdentifierSet) -> Result<Option<CandidateSource>, DownloadError> {
        Ok(Self::arxiv_id(ids).map(|id| CandidateSource {
            provider: self.provider(),
            tier: self.tier(),
            url: format!("{}/pdf/{id}", self.base_url),
            format: self.expected_format(),
        }))
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, DownloadError> {
        fetch_with(&self.http, url).await
    }
}
