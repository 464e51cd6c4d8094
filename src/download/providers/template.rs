//! URL-template adapters for institutional proxies, aggregators and mirrors.
//!
//! A template such as `https://oa.example.org/pdf/{doi}` yields a candidate
//! only when every placeholder it uses has a value. Placeholders: `{doi}`,
//! `{pmid}`, `{pmcid}`, `{arxiv}`. Values are percent-encoded; slashes in
//! DOIs are kept so path-style DOI URLs still work.

use async_trait::async_trait;

use crate::download::DownloadError;
use crate::download::adapter::{CandidateSource, ProviderAdapter, fetch_with};
use crate::download::client::HttpFetcher;
use crate::identifier::{IdentifierKind, IdentifierSet};
use crate::source::{Provider, ProviderTier, SourceFormat};

/// Supported placeholders and the identifier each one reads.
pub const PLACEHOLDERS: [(&str, IdentifierKind); 4] = [
    ("{doi}", IdentifierKind::Doi),
    ("{pmid}", IdentifierKind::Pmid),
    ("{pmcid}", IdentifierKind::Pmcid),
    ("{arxiv}", IdentifierKind::Arxiv),
];

/// Whether `template` contains at least one supported placeholder.
#[must_use]
pub fn has_placeholder(template: &str) -> bool {
    PLACEHOLDERS.iter().any(|(p, _)| template.contains(p))
}

/// Adapter built from configuration.
#[derive(Debug, Clone)]
pub struct TemplateAdapter {
    http: HttpFetcher,
    provider: Provider,
    tier: ProviderTier,
    format: SourceFormat,
    template: String,
    max_concurrency: Option<usize>,
}

impl TemplateAdapter {
    #[must_use]
    pub fn new(
        http: HttpFetcher,
        provider: Provider,
        tier: ProviderTier,
        format: SourceFormat,
        template: impl Into<String>,
        max_concurrency: Option<usize>,
    ) -> Self {
        Self {
            http,
            provider,
            tier,
            format,
            template: template.into(),
            max_concurrency,
        }
    }

    /// Expands the template, or `None` if any used placeholder has no value.
    #[must_use]
    pub fn expand(&self, ids: &IdentifierSet) -> Option<String> {
        let mut url = self.template.clone();
        for (placeholder, kind) in PLACEHOLDERS {
            if !url.contains(placeholder) {
                continue;
            }
            let value = ids.normalized(kind)?;
            let encoded = urlencoding::encode(&value).replace("%2F", "/");
            url = url.replace(placeholder, &encoded);
        }
        (url != self.template).then_some(url)
    }
}

#[async_trait]
impl ProviderAdapter for TemplateAdapter {
    fn provider(&self) -> Provider {
        self.provider.clone()
    }

    fn tier(&self) -> ProviderTier {
        self.tier
    }

    fn expected_format(&self) -> SourceFormat {
        self.format
    }

    fn max_concurrency(&self) -> Option<usize> {
        self.max_concurrency
    }

    async fn probe(&self, ids: &IdentifierSet) -> Result<Option<CandidateSource>, DownloadError> {
        Ok(self.expand(ids).map(|url| CandidateSource {
            provider: self.provider.clone(),
            tier: self.tier,
            url,
            format: self.format,
        }))
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, DownloadError> {
        fetch_with(&self.http, url).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::download::client::HttpOptions;

    fn adapter(template: &str) -> TemplateAdapter {
        TemplateAdapter::new(
            HttpFetcher::new(&HttpOptions::default()).unwrap(),
            Provider::from_name("oa_api"),
            ProviderTier::OpenAccessAggregator,
            SourceFormat::Pdf,
            template,
            Some(2),
        )
    }

    #[test]
    fn test_expand_doi_keeps_slash() {
        let url = adapter("https://oa.example.org/pdf/{doi}")
            .expand(&IdentifierSet::default().with_doi("10.1000/a b"))
            .unwrap();
        assert_eq!(url, "https://oa.example.org/pdf/10.1000/a%20b");
    }

    #[test]
    fn test_expand_requires_all_placeholders() {
        let adapter = adapter("https://m.example.org/{pmid}/{doi}");
        assert!(adapter.expand(&IdentifierSet::default().with_pmid("1")).is_none());
        assert_eq!(
            adapter
                .expand(&IdentifierSet::default().with_pmid("1").with_doi("10.1000/x"))
                .unwrap(),
            "https://m.example.org/1/10.1000/x"
        );
    }

    #[test]
    fn test_expand_without_placeholders_is_none() {
        assert!(adapter("https://static.example.org/file.pdf")
            .expand(&IdentifierSet::default().with_pmid("1"))
            .is_none());
        assert!(!has_placeholder("https://static.example.org/file.pdf"));
        assert!(has_placeholder("https://x.org/{arxiv}"));
    }

    #[tokio::test]
    async fn test_probe_reports_configured_provider() {
        let candidate = adapter("https://oa.example.org/{pmcid}.pdf")
            .probe(&IdentifierSet::default().with_pmcid("PMC5"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(candidate.provider.as_str(), "oa_api");
        assert_eq!(candidate.url, "https://oa.example.org/PMC5.pdf");
        assert_eq!(adapter("x{doi}").max_concurrency(), Some(2));
    }
}
