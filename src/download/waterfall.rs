//! Waterfall acquisition across prioritized providers.
//!
//! Adapters are tried in tier order (registration order within a tier). For
//! each adapter the downloader probes for a candidate, fetches it under the
//! adapter's own concurrency limit with per-host pacing, per-request timeout
//! and retry/backoff, then validates the bytes against the advertised
//! format. The first valid payload wins. Every skipped or failed provider
//! leaves an [`AttemptRecord`], so an exhausted waterfall is reported as
//! [`WaterfallOutcome::Unavailable`] with the full list of reasons.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use super::adapter::{CandidateSource, ProviderAdapter};
use super::client::DEFAULT_REQUEST_TIMEOUT;
use super::rate_limiter::RateLimiter;
use super::retry::{FailureType, RetryDecision, RetryPolicy, classify_error};
use super::DownloadError;
use crate::identifier::IdentifierSet;
use crate::source::{Provider, ProviderTier, SourceFormat, validate_content};

/// Default in-flight requests per provider.
pub const DEFAULT_PROVIDER_CONCURRENCY: usize = 4;

/// Why a provider did not yield the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The provider has nothing for these identifiers.
    NoCandidate,
    Network,
    Timeout,
    HttpStatus,
    NeedsAuth,
    /// Bytes did not match the advertised format.
    Validation,
    InvalidResponse,
    InvalidUrl,
    Io,
    /// A batch deadline expired before acquisition finished.
    Deadline,
}

impl FailureReason {
    fn from_error(error: &DownloadError) -> Self {
        match error {
            DownloadError::Network { .. } => Self::Network,
            DownloadError::Timeout { .. } => Self::Timeout,
            DownloadError::HttpStatus { .. } => {
                if classify_error(error) == FailureType::NeedsAuth {
                    Self::NeedsAuth
                } else {
                    Self::HttpStatus
                }
            }
            DownloadError::Validation { .. } => Self::Validation,
            DownloadError::InvalidResponse { .. } => Self::InvalidResponse,
            DownloadError::InvalidUrl { .. } => Self::InvalidUrl,
            DownloadError::Io { .. } => Self::Io,
        }
    }
}

/// Diagnostic for one provider that did not produce the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptRecord {
    pub provider: Provider,
    pub tier: Option<ProviderTier>,
    /// Candidate URL, when the probe produced one.
    pub url: Option<String>,
    pub reason: FailureReason,
    pub detail: String,
    /// Requests issued against the candidate (0 when never fetched).
    pub attempts: u32,
}

impl AttemptRecord {
    /// Record for members abandoned at a batch deadline.
    #[must_use]
    pub fn deadline(elapsed: Duration) -> Self {
        Self {
            provider: Provider::Other("batch".to_string()),
            tier: None,
            url: None,
            reason: FailureReason::Deadline,
            detail: format!("batch deadline of {}ms reached", elapsed.as_millis()),
            attempts: 0,
        }
    }
}

/// Explicit "could not acquire" result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnavailableReport {
    pub attempts: Vec<AttemptRecord>,
}

impl UnavailableReport {
    /// One line per provider, e.g. `pmc (tier 1): no_candidate`.
    #[must_use]
    pub fn summary(&self) -> String {
        if self.attempts.is_empty() {
            return "no providers configured".to_string();
        }
        self.attempts
            .iter()
            .map(|a| match a.tier {
                Some(tier) => format!("{} ({tier}): {}", a.provider, a.detail),
                None => format!("{}: {}", a.provider, a.detail),
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Successfully acquired bytes.
#[derive(Debug, Clone)]
pub struct Acquisition {
    pub bytes: Vec<u8>,
    pub format: SourceFormat,
    pub provider: Provider,
    pub tier: ProviderTier,
    pub url: String,
    /// Providers tried (and failed) before the winning one.
    pub failed_attempts: Vec<AttemptRecord>,
}

/// Terminal state of a waterfall run.
#[derive(Debug, Clone)]
pub enum WaterfallOutcome {
    Acquired(Acquisition),
    Unavailable(UnavailableReport),
}

/// Result of probing one adapter without fetching.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub provider: Provider,
    pub tier: ProviderTier,
    pub format: SourceFormat,
    pub candidate: Option<CandidateSource>,
    pub error: Option<String>,
}

/// Downloader-wide knobs.
#[derive(Debug, Clone)]
pub struct WaterfallOptions {
    pub retry: RetryPolicy,
    pub provider_concurrency: usize,
    pub request_timeout: Duration,
}

impl Default for WaterfallOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            provider_concurrency: DEFAULT_PROVIDER_CONCURRENCY,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

struct AdapterSlot {
    adapter: Arc<dyn ProviderAdapter>,
    permits: Arc<Semaphore>,
}

/// Waterfall state: which adapter is being worked on and what happened so far.
enum Step {
    Probe(usize),
    Fetch {
        index: usize,
        candidate: CandidateSource,
    },
    Done(WaterfallOutcome),
}

/// Tries providers in tier order until one yields valid content.
pub struct WaterfallDownloader {
    slots: Vec<AdapterSlot>,
    options: WaterfallOptions,
    rate_limiter: Arc<RateLimiter>,
}

impl std::fmt::Debug for WaterfallDownloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaterfallDownloader")
            .field("providers", &self.providers())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl WaterfallDownloader {
    /// Builds the downloader; adapters are stably sorted by tier.
    #[must_use]
    pub fn new(
        mut adapters: Vec<Arc<dyn ProviderAdapter>>,
        options: WaterfallOptions,
        rate_limiter: Arc<RateLimiter>,
    ) -> Self {
        adapters.sort_by_key(|a| a.tier());
        let default_permits = options.provider_concurrency.max(1);
        let slots = adapters
            .into_iter()
            .map(|adapter| {
                let permits = adapter.max_concurrency().unwrap_or(default_permits).max(1);
                AdapterSlot {
                    adapter,
                    permits: Arc::new(Semaphore::new(permits)),
                }
            })
            .collect();
        Self {
            slots,
            options,
            rate_limiter,
        }
    }

    /// Providers in the order they are tried.
    #[must_use]
    pub fn providers(&self) -> Vec<Provider> {
        self.slots.iter().map(|s| s.adapter.provider()).collect()
    }

    /// Runs the waterfall for one publication.
    #[instrument(skip(self, ids), fields(key = %key))]
    pub async fn acquire(&self, ids: &IdentifierSet, key: &str) -> WaterfallOutcome {
        let mut failures: Vec<AttemptRecord> = Vec::new();
        let mut step = Step::Probe(0);

        loop {
            step = match step {
                Step::Probe(index) if index >= self.slots.len() => {
                    warn!(tried = failures.len(), "all providers exhausted");
                    Step::Done(WaterfallOutcome::Unavailable(UnavailableReport {
                        attempts: std::mem::take(&mut failures),
                    }))
                }
                Step::Probe(index) => {
                    let slot = &self.slots[index];
                    match self.probe_slot(slot, ids).await {
                        Ok(Some(candidate)) => Step::Fetch { index, candidate },
                        Ok(None) => {
                            debug!(provider = %slot.adapter.provider(), "no candidate");
                            failures.push(record(slot, None, FailureReason::NoCandidate, "no candidate".to_string(), 0));
                            Step::Probe(index + 1)
                        }
                        Err(e) => {
                            debug!(provider = %slot.adapter.provider(), error = %e, "probe failed");
                            failures.push(record(slot, None, FailureReason::from_error(&e), format!("probe failed: {e}"), 0));
                            Step::Probe(index + 1)
                        }
                    }
                }
                Step::Fetch { index, candidate } => {
                    let slot = &self.slots[index];
                    match self.fetch_with_retry(slot, &candidate).await {
                        Ok((bytes, attempts)) => {
                            info!(
                                provider = %candidate.provider,
                                tier = candidate.tier.number(),
                                bytes = bytes.len(),
                                attempts,
                                "document acquired"
                            );
                            Step::Done(WaterfallOutcome::Acquired(Acquisition {
                                bytes,
                                format: candidate.format,
                                provider: candidate.provider,
                                tier: candidate.tier,
                                url: candidate.url,
                                failed_attempts: std::mem::take(&mut failures),
                            }))
                        }
                        Err((e, attempts)) => {
                            warn!(provider = %candidate.provider, url = %candidate.url, error = %e, attempts, "provider failed, moving to next");
                            failures.push(record(
                                slot,
                                Some(candidate.url),
                                FailureReason::from_error(&e),
                                e.to_string(),
                                attempts,
                            ));
                            Step::Probe(index + 1)
                        }
                    }
                }
                Step::Done(outcome) => return outcome,
            };
        }
    }

    /// Probes every adapter concurrently; nothing is downloaded.
    pub async fn probe_all(&self, ids: &IdentifierSet) -> Vec<ProbeReport> {
        join_all(self.slots.iter().map(|slot| async move {
            let result = self.probe_slot(slot, ids).await;
            let (candidate, error) = match result {
                Ok(candidate) => (candidate, None),
                Err(e) => (None, Some(e.to_string())),
            };
            ProbeReport {
                provider: slot.adapter.provider(),
                tier: slot.adapter.tier(),
                format: slot.adapter.expected_format(),
                candidate,
                error,
            }
        }))
        .await
    }

    async fn probe_slot(
        &self,
        slot: &AdapterSlot,
        ids: &IdentifierSet,
    ) -> Result<Option<CandidateSource>, DownloadError> {
        let _permit = slot.permits.acquire().await.map_err(|_| {
            DownloadError::invalid_response(slot.adapter.provider().as_str(), "provider closed")
        })?;
        tokio::time::timeout(self.options.request_timeout, slot.adapter.probe(ids))
            .await
            .map_err(|_| DownloadError::timeout(format!("probe:{}", slot.adapter.provider())))?
    }

    async fn fetch_with_retry(
        &self,
        slot: &AdapterSlot,
        candidate: &CandidateSource,
    ) -> Result<(Vec<u8>, u32), (DownloadError, u32)> {
        let policy = &self.options.retry;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let result = {
                let _permit = slot.permits.acquire().await.map_err(|_| {
                    (
                        DownloadError::invalid_response(&candidate.url, "provider closed"),
                        attempt,
                    )
                })?;
                self.rate_limiter.acquire(&candidate.url).await;
                match tokio::time::timeout(
                    self.options.request_timeout,
                    slot.adapter.fetch(&candidate.url),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(DownloadError::timeout(&candidate.url)),
                }
            };

            let error = match result {
                Ok(bytes) => match validate_content(candidate.format, &bytes) {
                    Ok(_) => return Ok((bytes, attempt)),
                    Err(reason) => DownloadError::validation(&candidate.url, reason),
                },
                Err(e) => e,
            };

            let failure = classify_error(&error);
            if let FailureType::RateLimited {
                retry_after: Some(delay),
            } = failure
            {
                self.rate_limiter.record_rate_limit(&candidate.url, delay).await;
            }

            match policy.should_retry(failure, attempt) {
                RetryDecision::Retry { delay, attempt: next } => {
                    info!(
                        url = %candidate.url,
                        attempt = next,
                        max_attempts = policy.max_attempts(),
                        delay_ms = delay.as_millis(),
                        error = %error,
                        "retrying provider request"
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::DoNotRetry { reason } => {
                    debug!(url = %candidate.url, %reason, "not retrying");
                    return Err((error, attempt));
                }
            }
        }
    }
}

fn record(
    slot: &AdapterSlot,
    url: Option<String>,
    reason: FailureReason,
    detail: String,
    attempts: u32,
) -> AttemptRecord {
    AttemptRecord {
        provider: slot.adapter.provider(),
        tier: Some(slot.adapter.tier()),
        url,
        reason,
        detail,
        attempts,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Adapter returning canned responses in order, then repeating the last.
    struct ScriptedAdapter {
        provider: Provider,
        tier: ProviderTier,
        format: SourceFormat,
        candidate: bool,
        responses: std::sync::Mutex<Vec<Result<Vec<u8>, u16>>>,
        fetches: AtomicU32,
    }

    impl ScriptedAdapter {
        fn new(name: &str, tier: ProviderTier, format: SourceFormat, responses: Vec<Result<Vec<u8>, u16>>) -> Arc<Self> {
            Arc::new(Self {
                provider: Provider::from_name(name),
                tier,
                format,
                candidate: true,
                responses: std::sync::Mutex::new(responses),
                fetches: AtomicU32::new(0),
            })
        }

        fn without_candidate(name: &str, tier: ProviderTier) -> Arc<Self> {
            Arc::new(Self {
                provider: Provider::from_name(name),
                tier,
                format: SourceFormat::Xml,
                candidate: false,
                responses: std::sync::Mutex::new(Vec::new()),
                fetches: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl ProviderAdapter for ScriptedAdapter {
        fn provider(&self) -> Provider {
            self.provider.clone()
        }
        fn tier(&self) -> ProviderTier {
            self.tier
        }
        fn expected_format(&self) -> SourceFormat {
            self.format
        }
        async fn probe(&self, _ids: &IdentifierSet) -> Result<Option<CandidateSource>, DownloadError> {
            Ok(self.candidate.then(|| CandidateSource {
                provider: self.provider.clone(),
                tier: self.tier,
                url: format!("https://{}.example.org/doc", self.provider),
                format: self.format,
            }))
        }
        async fn fetch(&self, url: &str) -> Result<Vec<u8>, DownloadError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            let next = if responses.len() > 1 {
                responses.remove(0)
            } else {
                responses[0].clone()
            };
            next.map_err(|status| DownloadError::http_status(url, status))
        }
    }

    fn downloader(adapters: Vec<Arc<dyn ProviderAdapter>>) -> WaterfallDownloader {
        WaterfallDownloader::new(
            adapters,
            WaterfallOptions {
                retry: RetryPolicy::with_max_attempts(3)
                    .with_base_delay(Duration::from_millis(1))
                    .with_jitter(Duration::ZERO),
                provider_concurrency: 2,
                request_timeout: Duration::from_secs(5),
            },
            Arc::new(RateLimiter::disabled()),
        )
    }

    fn ids() -> IdentifierSet {
        IdentifierSet::default().with_doi("10.1000/x")
    }

    #[tokio::test]
    async fn test_tier_two_used_when_tier_one_has_nothing() {
        let pmc = ScriptedAdapter::without_candidate("pmc", ProviderTier::FreeStructured);
        let oa = ScriptedAdapter::new(
            "oa_api",
            ProviderTier::OpenAccessAggregator,
            SourceFormat::Pdf,
            vec![Ok(b"%PDF-1.7 body".to_vec())],
        );
        // Registered out of order on purpose: tiers decide the order.
        let waterfall = downloader(vec![oa.clone(), pmc]);

        let WaterfallOutcome::Acquired(acq) = waterfall.acquire(&ids(), "10.1000/x").await else {
            panic!("expected acquisition");
        };
        assert_eq!(acq.provider.as_str(), "oa_api");
        assert_eq!(acq.format, SourceFormat::Pdf);
        assert_eq!(acq.failed_attempts.len(), 1);
        assert_eq!(acq.failed_attempts[0].provider, Provider::Pmc);
        assert_eq!(acq.failed_attempts[0].reason, FailureReason::NoCandidate);
    }

    #[tokio::test]
    async fn test_mislabeled_content_moves_to_next_provider() {
        let bad = ScriptedAdapter::new(
            "arxiv",
            ProviderTier::FreeStructured,
            SourceFormat::Pdf,
            vec![Ok(b"<!DOCTYPE html><html>login</html>".to_vec())],
        );
        let good = ScriptedAdapter::new(
            "mirror",
            ProviderTier::Mirror,
            SourceFormat::Pdf,
            vec![Ok(b"%PDF-1.4".to_vec())],
        );
        let waterfall = downloader(vec![bad.clone(), good]);

        let WaterfallOutcome::Acquired(acq) = waterfall.acquire(&ids(), "k").await else {
            panic!("expected acquisition");
        };
        assert_eq!(acq.provider, Provider::Mirror);
        assert_eq!(acq.failed_attempts[0].reason, FailureReason::Validation);
        // Validation failures are not retried against the same provider.
        assert_eq!(bad.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_failure_retried_then_succeeds() {
        let flaky = ScriptedAdapter::new(
            "pmc",
            ProviderTier::FreeStructured,
            SourceFormat::Xml,
            vec![Err(503), Err(503), Ok(b"<?xml version=\"1.0\"?><article/>".to_vec())],
        );
        let waterfall = downloader(vec![flaky.clone()]);

        let WaterfallOutcome::Acquired(acq) = waterfall.acquire(&ids(), "k").await else {
            panic!("expected acquisition");
        };
        assert_eq!(acq.provider, Provider::Pmc);
        assert!(acq.failed_attempts.is_empty());
        assert_eq!(flaky.fetches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_waterfall_reports_every_provider() {
        let pmc = ScriptedAdapter::new("pmc", ProviderTier::FreeStructured, SourceFormat::Xml, vec![Err(404)]);
        let flaky = ScriptedAdapter::new("core", ProviderTier::OpenAccessAggregator, SourceFormat::Pdf, vec![Err(500)]);
        let none = ScriptedAdapter::without_candidate("mirror", ProviderTier::Mirror);
        let waterfall = downloader(vec![pmc.clone(), flaky.clone(), none]);

        let WaterfallOutcome::Unavailable(report) = waterfall.acquire(&ids(), "k").await else {
            panic!("expected unavailable");
        };
        let reasons: Vec<_> = report.attempts.iter().map(|a| a.reason).collect();
        assert_eq!(
            reasons,
            vec![FailureReason::HttpStatus, FailureReason::HttpStatus, FailureReason::NoCandidate]
        );
        assert_eq!(report.attempts[0].attempts, 1);
        assert_eq!(report.attempts[1].attempts, 3);
        assert_eq!(pmc.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(flaky.fetches.load(Ordering::SeqCst), 3);
        assert!(report.summary().contains("core (tier 2)"));
    }

    #[tokio::test]
    async fn test_no_adapters_is_unavailable() {
        let waterfall = downloader(Vec::new());
        let WaterfallOutcome::Unavailable(report) = waterfall.acquire(&ids(), "k").await else {
            panic!("expected unavailable");
        };
        assert!(report.attempts.is_empty());
        assert_eq!(report.summary(), "no providers configured");
    }

    #[tokio::test]
    async fn test_probe_all_does_not_fetch() {
        let pmc = ScriptedAdapter::new("pmc", ProviderTier::FreeStructured, SourceFormat::Xml, vec![Ok(Vec::new())]);
        let none = ScriptedAdapter::without_candidate("mirror", ProviderTier::Mirror);
        let waterfall = downloader(vec![none, pmc.clone()]);

        let reports = waterfall.probe_all(&ids()).await;
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].provider, Provider::Pmc);
        assert!(reports[0].candidate.is_some());
        assert!(reports[1].candidate.is_none());
        assert_eq!(pmc.fetches.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_provider_order_by_tier() {
        let waterfall = downloader(vec![
            ScriptedAdapter::without_candidate("mirror", ProviderTier::Mirror),
            ScriptedAdapter::without_candidate("unpaywall", ProviderTier::OpenAccessAggregator),
            ScriptedAdapter::without_candidate("pmc", ProviderTier::FreeStructured),
            ScriptedAdapter::without_candidate("arxiv", ProviderTier::FreeStructured),
        ]);
        assert_eq!(
            waterfall.providers(),
            vec![Provider::Pmc, Provider::Arxiv, Provider::Unpaywall, Provider::Mirror]
        );
    }
}
