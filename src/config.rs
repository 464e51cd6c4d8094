//! Injected configuration: cache root, staleness, concurrency and providers.
//!
//! Loaded from TOML. Every field has a default, so an empty file (or no file)
//! yields a working configuration rooted at `./fulltext-cache`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::{DEFAULT_MIN_QUALITY, DEFAULT_TTL_DAYS, StalenessPolicy};
use crate::db::{DEFAULT_BUSY_TIMEOUT_MS, DEFAULT_MAX_CONNECTIONS, DatabaseOptions};
use crate::download::providers::{
    ARXIV_BASE_URL, ArxivAdapter, EUROPE_PMC_BASE_URL, EuropePmcAdapter, TemplateAdapter,
    UNPAYWALL_BASE_URL, UnpaywallAdapter, has_placeholder,
};
use crate::download::{
    DEFAULT_MAX_ATTEMPTS, DEFAULT_PROVIDER_CONCURRENCY, HttpFetcher, HttpOptions, ProviderAdapter,
    RateLimiter, RetryPolicy, WaterfallOptions, default_user_agent,
};
use crate::identifier::{IdentifierError, PrecedencePolicy};
use crate::source::{Provider, ProviderTier, SourceFormat};

/// Default batch fan-out.
pub const DEFAULT_BATCH_CONCURRENCY: usize = 10;
/// Default minimum interval between requests to one host.
pub const DEFAULT_RATE_LIMIT_MS: u64 = 1000;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

const MAX_RATE_LIMIT_MS: u64 = 60_000;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is outside its accepted range.
    #[error("Invalid config value for `{field}`: {value}. Expected {expected}")]
    Invalid {
        field: &'static str,
        value: String,
        expected: &'static str,
    },
}

impl ConfigError {
    fn invalid(field: &'static str, value: impl ToString, expected: &'static str) -> Self {
        Self::Invalid {
            field,
            value: value.to_string(),
            expected,
        }
    }
}

/// An extra URL-template provider (institutional proxy, mirror, aggregator).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider name; also the directory files are stored under.
    pub name: String,
    /// Tier 1-4.
    pub tier: u8,
    /// Expected format of the fetched content.
    pub format: SourceFormat,
    /// URL with `{doi}`, `{pmid}`, `{pmcid}` or `{arxiv}` placeholders.
    pub url_template: String,
    #[serde(default)]
    pub max_concurrency: Option<usize>,
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FullTextConfig {
    pub cache_root: PathBuf,
    pub ttl_days: u32,
    pub min_quality: f64,
    pub batch_concurrency: usize,
    pub provider_concurrency: usize,
    /// Per-host request interval; 0 disables rate limiting.
    pub rate_limit_ms: u64,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub max_attempts: u32,
    /// Aggregate deadline for `batch_get`; none by default.
    pub batch_deadline_secs: Option<u64>,
    /// Identifier precedence, highest first.
    pub precedence: Vec<String>,
    /// Required by Unpaywall; the adapter is skipped without it.
    pub contact_email: Option<String>,
    pub europepmc_base_url: String,
    pub arxiv_base_url: String,
    pub unpaywall_base_url: String,
    pub providers: Vec<ProviderConfig>,
    pub db_max_connections: u32,
    pub db_busy_timeout_ms: u32,
}

impl Default for FullTextConfig {
    fn default() -> Self {
        Self {
            cache_root: PathBuf::from("fulltext-cache"),
            ttl_days: DEFAULT_TTL_DAYS,
            min_quality: DEFAULT_MIN_QUALITY,
            batch_concurrency: DEFAULT_BATCH_CONCURRENCY,
            provider_concurrency: DEFAULT_PROVIDER_CONCURRENCY,
            rate_limit_ms: DEFAULT_RATE_LIMIT_MS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            batch_deadline_secs: None,
            precedence: ["pmcid", "doi", "pmid", "arxiv"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            contact_email: None,
            europepmc_base_url: EUROPE_PMC_BASE_URL.to_string(),
            arxiv_base_url: ARXIV_BASE_URL.to_string(),
            unpaywall_base_url: UNPAYWALL_BASE_URL.to_string(),
            providers: Vec::new(),
            db_max_connections: DEFAULT_MAX_CONNECTIONS,
            db_busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

impl FullTextConfig {
    /// Configuration with defaults and the given cache root.
    #[must_use]
    pub fn with_cache_root(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: cache_root.into(),
            ..Self::default()
        }
    }

    /// Reads and validates a TOML file.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Read`] if the file cannot be read, otherwise as
    /// [`Self::from_toml_str`].
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Parses and validates TOML text.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for malformed TOML or unknown value types,
    /// [`ConfigError::Invalid`] for out-of-range values.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks ranges and cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError::Invalid`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_root.as_os_str().is_empty() {
            return Err(ConfigError::invalid("cache_root", "\"\"", "a non-empty path"));
        }
        if self.ttl_days < 1 {
            return Err(ConfigError::invalid("ttl_days", self.ttl_days, "at least 1"));
        }
        if !(0.0..=1.0).contains(&self.min_quality) {
            return Err(ConfigError::invalid("min_quality", self.min_quality, "range: 0..=1"));
        }
        validate_concurrency("batch_concurrency", self.batch_concurrency)?;
        validate_concurrency("provider_concurrency", self.provider_concurrency)?;
        if self.rate_limit_ms > MAX_RATE_LIMIT_MS {
            return Err(ConfigError::invalid("rate_limit_ms", self.rate_limit_ms, "range: 0..=60000"));
        }
        validate_timeout_secs("connect_timeout_secs", self.connect_timeout_secs)?;
        validate_timeout_secs("request_timeout_secs", self.request_timeout_secs)?;
        if let Some(deadline) = self.batch_deadline_secs {
            validate_timeout_secs("batch_deadline_secs", deadline)?;
        }
        if !(1..=10).contains(&self.max_attempts) {
            return Err(ConfigError::invalid("max_attempts", self.max_attempts, "range: 1..=10"));
        }
        self.validate_precedence()?;
        if !(1..=20).contains(&self.db_max_connections) {
            return Err(ConfigError::invalid(
                "db_max_connections",
                self.db_max_connections,
                "range: 1..=20",
            ));
        }
        if self.db_busy_timeout_ms > 120_000 {
            return Err(ConfigError::invalid(
                "db_busy_timeout_ms",
                self.db_busy_timeout_ms,
                "range: 0..=120000",
            ));
        }
        for provider in &self.providers {
            validate_provider(provider)?;
        }
        Ok(())
    }

    fn validate_precedence(&self) -> Result<(), ConfigError> {
        if self.precedence.is_empty() {
            return Err(ConfigError::invalid("precedence", "[]", "a non-empty list"));
        }
        let policy = self.precedence_policy().map_err(|e| {
            ConfigError::invalid("precedence", e, "names among pmcid, doi, pmid, arxiv")
        })?;
        if policy.order().len() != self.precedence.len() {
            return Err(ConfigError::invalid(
                "precedence",
                self.precedence.join(", "),
                "unique identifier kinds (hash is implicit)",
            ));
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`IdentifierError::UnknownKind`] for an unknown name.
    pub fn precedence_policy(&self) -> Result<PrecedencePolicy, IdentifierError> {
        PrecedencePolicy::from_names(&self.precedence)
    }

    #[must_use]
    pub fn sources_dir(&self) -> PathBuf {
        self.cache_root.join("sources")
    }

    #[must_use]
    pub fn parsed_dir(&self) -> PathBuf {
        self.cache_root.join("parsed")
    }

    #[must_use]
    pub fn index_path(&self) -> PathBuf {
        self.cache_root.join("index.db")
    }

    #[must_use]
    pub fn staleness_policy(&self) -> StalenessPolicy {
        StalenessPolicy::new(self.ttl_days, self.min_quality)
    }

    #[must_use]
    pub fn database_options(&self) -> DatabaseOptions {
        DatabaseOptions {
            max_connections: self.db_max_connections,
            busy_timeout_ms: self.db_busy_timeout_ms,
        }
    }

    #[must_use]
    pub fn http_options(&self) -> HttpOptions {
        HttpOptions {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            user_agent: default_user_agent(),
            ..HttpOptions::default()
        }
    }

    #[must_use]
    pub fn waterfall_options(&self) -> WaterfallOptions {
        WaterfallOptions {
            retry: RetryPolicy::with_max_attempts(self.max_attempts),
            provider_concurrency: self.provider_concurrency,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }

    #[must_use]
    pub fn rate_limiter(&self) -> RateLimiter {
        if self.rate_limit_ms == 0 {
            RateLimiter::disabled()
        } else {
            RateLimiter::new(Duration::from_millis(self.rate_limit_ms))
        }
    }

    #[must_use]
    pub fn batch_deadline(&self) -> Option<Duration> {
        self.batch_deadline_secs.map(Duration::from_secs)
    }

    /// Built-in adapters followed by configured template providers.
    ///
    /// Unpaywall is only included when `contact_email` is set.
    #[must_use]
    pub fn build_adapters(&self, http: &HttpFetcher) -> Vec<Arc<dyn ProviderAdapter>> {
        let mut adapters: Vec<Arc<dyn ProviderAdapter>> = vec![
            Arc::new(EuropePmcAdapter::new(http.clone(), &self.europepmc_base_url)),
            Arc::new(ArxivAdapter::new(http.clone(), &self.arxiv_base_url)),
        ];
        if let Some(email) = self.contact_email.as_deref().filter(|e| !e.trim().is_empty()) {
            adapters.push(Arc::new(UnpaywallAdapter::new(
                http.clone(),
                &self.unpaywall_base_url,
                Some(email.trim().to_string()),
            )));
        }
        for provider in &self.providers {
            // Tiers were checked by validate().
            let Some(tier) = ProviderTier::from_number(provider.tier) else {
                continue;
            };
            adapters.push(Arc::new(TemplateAdapter::new(
                http.clone(),
                Provider::from_name(&provider.name),
                tier,
                provider.format,
                provider.url_template.clone(),
                provider.max_concurrency,
            )));
        }
        adapters
    }
}

fn validate_concurrency(field: &'static str, value: usize) -> Result<(), ConfigError> {
    if !(1..=100).contains(&value) {
        return Err(ConfigError::invalid(field, value, "range: 1..=100"));
    }
    Ok(())
}

fn validate_timeout_secs(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if !(1..=3600).contains(&value) {
        return Err(ConfigError::invalid(field, value, "range: 1..=3600"));
    }
    Ok(())
}

fn validate_provider(provider: &ProviderConfig) -> Result<(), ConfigError> {
    if provider.name.trim().is_empty() {
        return Err(ConfigError::invalid("providers.name", "\"\"", "a non-empty name"));
    }
    if ProviderTier::from_number(provider.tier).is_none() {
        return Err(ConfigError::invalid("providers.tier", provider.tier, "range: 1..=4"));
    }
    if !has_placeholder(&provider.url_template) {
        return Err(ConfigError::invalid(
            "providers.url_template",
            &provider.url_template,
            "at least one of {doi}, {pmid}, {pmcid}, {arxiv}",
        ));
    }
    if let Some(n) = provider.max_concurrency {
        validate_concurrency("providers.max_concurrency", n)?;
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_is_default() {
        let config = FullTextConfig::from_toml_str("").unwrap();
        assert_eq!(config, FullTextConfig::default());
        assert_eq!(config.ttl_days, 90);
        assert_eq!(config.batch_concurrency, 10);
        assert!(config.batch_deadline().is_none());
    }

    #[test]
    fn test_full_toml_parses() {
        let raw = r#"
cache_root = "/var/cache/fulltext"
ttl_days = 30
min_quality = 0.5
batch_concurrency = 4
rate_limit_ms = 0
batch_deadline_secs = 120
precedence = ["doi", "pmcid"]
contact_email = "lab@example.org"

[[providers]]
name = "oa_api"
tier = 2
format = "pdf"
url_template = "https://oa.example.org/pdf/{doi}"
max_concurrency = 2
"#;
        let config = FullTextConfig::from_toml_str(raw).unwrap();
        assert_eq!(config.index_path(), PathBuf::from("/var/cache/fulltext/index.db"));
        assert_eq!(config.parsed_dir(), PathBuf::from("/var/cache/fulltext/parsed"));
        assert_eq!(config.batch_deadline(), Some(Duration::from_secs(120)));
        assert_eq!(config.providers[0].format, SourceFormat::Pdf);
        assert_eq!(
            config.precedence_policy().unwrap().order()[0],
            crate::identifier::IdentifierKind::Doi
        );
    }

    #[test]
    fn test_out_of_range_values_rejected() {
        for raw in [
            "batch_concurrency = 0",
            "provider_concurrency = 101",
            "request_timeout_secs = 0",
            "connect_timeout_secs = 3601",
            "ttl_days = 0",
            "min_quality = 1.5",
            "precedence = []",
            "precedence = [\"doi\", \"doi\"]",
            "precedence = [\"isbn\"]",
            "db_max_connections = 50",
        ] {
            let err = FullTextConfig::from_toml_str(raw).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid { .. }), "{raw}: {err}");
        }
    }

    #[test]
    fn test_provider_template_requires_placeholder() {
        let raw = r#"
[[providers]]
name = "mirror"
tier = 4
format = "pdf"
url_template = "https://mirror.example.org/static"
"#;
        let err = FullTextConfig::from_toml_str(raw).unwrap_err();
        assert!(err.to_string().contains("url_template"), "{err}");
    }

    #[test]
    fn test_type_errors_are_parse_errors() {
        let err = FullTextConfig::from_toml_str("ttl_days = \"soon\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_build_adapters_skips_unpaywall_without_email() {
        let http = HttpFetcher::new(&HttpOptions::default()).unwrap();
        let mut config = FullTextConfig::default();
        let providers: Vec<_> = config.build_adapters(&http).iter().map(|a| a.provider()).collect();
        assert_eq!(providers, vec![Provider::Pmc, Provider::Arxiv]);

        config.contact_email = Some("me@example.org".to_string());
        config.providers.push(ProviderConfig {
            name: "oa_api".to_string(),
            tier: 2,
            format: SourceFormat::Pdf,
            url_template: "http://localhost/{doi}".to_string(),
            max_concurrency: None,
        });
        let providers: Vec<_> = config.build_adapters(&http).iter().map(|a| a.provider()).collect();
        assert_eq!(
            providers,
            vec![
                Provider::Pmc,
                Provider::Arxiv,
                Provider::Unpaywall,
                Provider::Other("oa_api".to_string())
            ]
        );
    }

    #[test]
    fn test_load_missing_file_is_read_error() {
        let err = FullTextConfig::load(Path::new("/nonexistent/fulltext.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
