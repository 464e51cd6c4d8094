//! PubMed Central full-text XML through the Europe PMC REST API.
//!
//! With a PMCID the candidate is `<base>/<PMCID>/fullTextXML` directly.
//! With only a PMID or DOI the adapter first asks the search endpoint whether
//! an open-access PMC copy exists.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::download::adapter::{CandidateSource, ProviderAdapter, fetch_with};
use crate::download::client::HttpFetcher;
use crate::download::DownloadError;
use crate::identifier::{IdentifierKind, IdentifierSet, normalize_pmcid};
use crate::source::{Provider, ProviderTier, SourceFormat};

/// Public Europe PMC REST endpoint.
pub const EUROPE_PMC_BASE_URL: &str = "https://www.ebi.ac.uk/europepmc/webservices/rest";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(rename = "resultList", default)]
    result_list: ResultList,
}

#[derive(Debug, Default, Deserialize)]
struct ResultList {
    #[serde(default)]
    result: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    pmcid: Option<String>,
    #[serde(rename = "isOpenAccess")]
    is_open_access: Option<String>,
    #[serde(rename = "inEPMC")]
    in_epmc: Option<String>,
}

impl SearchHit {
    fn open_pmcid(&self) -> Option<String> {
        let yes = |flag: &Option<String>| flag.as_deref() == Some("Y");
        if yes(&self.is_open_access) || yes(&self.in_epmc) {
            self.pmcid.as_deref().and_then(normalize_pmcid)
        } else {
            None
        }
    }
}

/// Tier-1 adapter for PMC structured XML.
#[derive(Debug, Clone)]
pub struct EuropePmcAdapter {
    http: HttpFetcher,
    base_url: String,
}

impl EuropePmcAdapter {
    #[must_use]
    pub fn new(http: HttpFetcher, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn full_text_url(&self, pmcid: &str) -> String {
        format!("{}/{pmcid}/fullTextXML", self.base_url)
    }

    async fn lookup_pmcid(&self, query: &str) -> Result<Option<String>, DownloadError> {
        let url = format!(
            "{}/search?query={}&format=json&resultType=lite&pageSize=1",
            self.base_url,
            urlencoding::encode(query)
        );
        let response: Option<SearchResponse> = self.http.get_json(&url).await?;
        Ok(response
            .and_then(|r| r.result_list.result.into_iter().next())
            .and_then(|hit| hit.open_pmcid()))
    }
}

#[async_trait]
impl ProviderAdapter for EuropePmcAdapter {
    fn provider(&self) -> Provider {
        Provider::Pmc
    }

    fn tier(&self) -> ProviderTier {
        ProviderTier::FreeStructured
    }

    fn expected_format(&self) -> SourceFormat {
        SourceFormat::Xml
    }

    #[instrument(skip(self, ids))]
    async fn probe(&self, ids: &IdentifierSet) -> Result<Option<CandidateSource>, DownloadError> {
        let pmcid = if let Some(pmcid) = ids.normalized(IdentifierKind::Pmcid) {
            Some(pmcid)
        } else if let Some(pmid) = ids.normalized(IdentifierKind::Pmid) {
            self.lookup_pmcid(&format!("EXT_ID:{pmid} AND SRC:MED")).await?
        } else if let Some(doi) = ids.normalized(IdentifierKind::Doi) {
            self.lookup_pmcid(&format!("DOI:\"{doi}\"")).await?
        } else {
            None
        };

        let Some(pmcid) = pmcid else {
            debug!("no open-access PMC copy known");
            return Ok(None);
        };
        Ok(Some(CandidateSource {
            provider: self.provider(),
            tier: self.tier(),
            url: self.full_text_url(&pmcid),
            format: self.expected_format(),
        }))
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, DownloadError> {
        fetch_with(&self.http, url).await
    }
}
