//! Unpaywall open-access location lookup.
//!
//! `GET <base>/<doi>?email=<contact>` returns the best known OA location;
//! its `url_for_pdf` becomes the candidate.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::download::DownloadError;
use crate::download::adapter::{CandidateSource, ProviderAdapter, fetch_with};
use crate::download::client::HttpFetcher;
use crate::identifier::{IdentifierKind, IdentifierSet};
use crate::source::{Provider, ProviderTier, SourceFormat};

pub const UNPAYWALL_BASE_URL: &str = "https://api.unpaywall.org/v2";

#[derive(Debug, Deserialize)]
struct UnpaywallRecord {
    #[serde(default)]
    is_oa: bool,
    best_oa_location: Option<OaLocation>,
    #[serde(default)]
    oa_locations: Vec<OaLocation>,
}

#[derive(Debug, Deserialize)]
struct OaLocation {
    url_for_pdf: Option<String>,
}

impl UnpaywallRecord {
    fn pdf_url(self) -> Option<String> {
        if !self.is_oa {
            return None;
        }
        self.best_oa_location
            .into_iter()
            .chain(self.oa_locations)
            .find_map(|loc| loc.url_for_pdf.filter(|u| !u.trim().is_empty()))
    }
}

/// Tier-2 aggregator adapter. Disabled (always `None`) without a contact email.
#[derive(Debug, Clone)]
pub struct UnpaywallAdapter {
    http: HttpFetcher,
    base_url: String,
    email: Option<String>,
}

impl UnpaywallAdapter {
    #[must_use]
    pub fn new(http: HttpFetcher, base_url: impl Into<String>, email: Option<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            email: email.filter(|e| !e.trim().is_empty()),
        }
    }
}

#[async_trait]
impl ProviderAdapter for UnpaywallAdapter {
    fn provider(&self) -> Provider {
        Provider::Unpaywall
    }

    fn tier(&self) -> ProviderTier {
        ProviderTier::OpenAccessAggregator
    }

    fn expected_format(&self) -> SourceFormat {
        SourceFormat::Pdf
    }

    #[instrument(skip(self, ids))]
    async fn probe(&self, ids: &IdentifierSet) -> Result<Option<CandidateSource>, DownloadError> {
        let Some(email) = &self.email else {
            debug!("unpaywall disabled: no contact email configured");
            return Ok(None);
        };
        let Some(doi) = ids.normalized(IdentifierKind::Doi) else {
            return Ok(None);
        };

        let url = format!(
            "{}/{doi}?email={}",
            self.base_url,
            urlencoding::encode(email)
        );
        let record: Option<UnpaywallRecord> = self.http.get_json(&url).await?;
        Ok(record.and_then(UnpaywallRecord::pdf_url).map(|pdf| CandidateSource {
            provider: self.provider(),
            tier: self.tier(),
            url: pdf,
            format: self.expected_format(),
        }))
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, DownloadError> {
        fetch_with(&self.http, url).await
    }
}
