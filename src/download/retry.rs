//! Retry with exponential backoff for transient provider failures.
//!
//! A failed request is classified into a [`FailureType`]; the
//! [`RetryPolicy`] turns the failure and the attempt number into a
//! [`RetryDecision`]. Only transient and rate-limited failures are retried.
//! A validation failure means the provider served the wrong thing, so
//! retrying the same provider is pointless and the waterfall moves on.

use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

use super::DownloadError;
use super::rate_limiter::parse_retry_after;

/// Default attempts per provider (initial try included).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(32);
const DEFAULT_BACKOFF_MULTIPLIER: f32 = 2.0;
const DEFAULT_MAX_JITTER: Duration = Duration::from_millis(500);

/// Classification of a failed provider request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Timeouts, connection failures, 5xx.
    Transient,
    /// 404, 400, malformed URL, mislabeled content.
    Permanent,
    /// 401/403: the adapter lacks credentials for this resource.
    NeedsAuth,
    /// 429, optionally with the server's requested pause.
    RateLimited { retry_after: Option<Duration> },
}

/// Whether and when to retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    Retry {
        delay: Duration,
        /// 1-indexed number of the upcoming attempt.
        attempt: u32,
    },
    DoNotRetry {
        reason: String,
    },
}

/// Backoff configuration.
///
/// `delay(n) = min(base * multiplier^(n-1), max_delay) + jitter`, with the
/// server's `Retry-After` taking precedence when it is longer.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f32,
    max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            max_jitter: DEFAULT_MAX_JITTER,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f32,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            backoff_multiplier,
            max_jitter: DEFAULT_MAX_JITTER,
        }
    }

    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Replaces the jitter bound (zero makes delays deterministic).
    #[must_use]
    pub fn with_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    #[must_use]
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decides whether to retry after `attempt` (1-indexed) failed.
    #[instrument(skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        let server_delay = match failure_type {
            FailureType::Permanent => {
                return RetryDecision::DoNotRetry {
                    reason: "permanent failure".to_string(),
                };
            }
            FailureType::NeedsAuth => {
                return RetryDecision::DoNotRetry {
                    reason: "authentication required".to_string(),
                };
            }
            FailureType::Transient => None,
            FailureType::RateLimited { retry_after } => retry_after,
        };

        if attempt >= self.max_attempts {
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let backoff = self.backoff_delay(attempt);
        let delay = server_delay.map_or(backoff, |d| d.max(backoff));
        debug!(
            attempt,
            delay_ms = delay.as_millis(),
            "scheduling retry"
        );
        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let exponent = f64::from(attempt.saturating_sub(1));
        let raw_ms = base_ms * f64::from(self.backoff_multiplier).powf(exponent);
        let capped_ms = raw_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64) + self.jitter()
    }

    #[allow(clippy::cast_possible_truncation)]
    fn jitter(&self) -> Duration {
        let max_ms = self.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}

/// Classifies a provider error for retry decisions.
///
/// | Error | Type |
/// |-------|------|
/// | Timeout, network (non-TLS), 408, 5xx | Transient |
/// | 429 | RateLimited (with parsed `Retry-After`) |
/// | 401, 403, 407 | NeedsAuth |
/// | other 4xx, TLS, validation, bad payload, IO, bad URL | Permanent |
#[must_use]
pub fn classify_error(error: &DownloadError) -> FailureType {
    match error {
        DownloadError::HttpStatus {
            status,
            retry_after,
            ..
        } => classify_http_status(*status, retry_after.as_deref()),
        DownloadError::Timeout { .. } => FailureType::Transient,
        DownloadError::Network { source, .. } => {
            if is_tls_error(source) {
                FailureType::Permanent
            } else {
                FailureType::Transient
            }
        }
        DownloadError::Validation { .. }
        | DownloadError::InvalidResponse { .. }
        | DownloadError::Io { .. }
        | DownloadError::InvalidUrl { .. } => FailureType::Permanent,
    }
}

#[allow(clippy::match_same_arms)]
fn classify_http_status(status: u16, retry_after: Option<&str>) -> FailureType {
    match status {
        401 | 403 | 407 => FailureType::NeedsAuth,
        408 => FailureType::Transient,
        429 => FailureType::RateLimited {
            retry_after: retry_after.and_then(parse_retry_after),
        },
        400..=499 => FailureType::Permanent,
        500..=599 => FailureType::Transient,
        _ => FailureType::Permanent,
    }
}

fn is_tls_error(error: &reqwest::Error) -> bool {
    let text = error.to_string().to_lowercase();
    ["certificate", "tls", "ssl", "handshake"]
        .iter()
        .any(|needle| text.contains(needle))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn no_jitter() -> RetryPolicy {
        RetryPolicy::default().with_jitter(Duration::ZERO)
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(32));
    }

    #[test]
    fn test_max_attempts_at_least_one() {
        assert_eq!(RetryPolicy::with_max_attempts(0).max_attempts(), 1);
    }

    #[test]
    fn test_backoff_doubles_without_jitter() {
        let policy = no_jitter();
        assert_eq!(policy.backoff_delay(1), Duration::from_secs(1));
        assert_eq!(policy.backoff_delay(2), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(3), Duration::from_secs(4));
    }

    #[test]
    fn test_backoff_capped() {
        let policy = RetryPolicy::new(10, Duration::from_secs(1), Duration::from_secs(5), 2.0)
            .with_jitter(Duration::ZERO);
        assert_eq!(policy.backoff_delay(8), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_bounded() {
        let policy = RetryPolicy::default();
        for _ in 0..50 {
            assert!(policy.jitter() <= DEFAULT_MAX_JITTER);
        }
    }

    #[test]
    fn test_permanent_not_retried() {
        let decision = no_jitter().should_retry(FailureType::Permanent, 1);
        assert!(matches!(decision, RetryDecision::DoNotRetry { .. }));
    }

    #[test]
    fn test_needs_auth_not_retried() {
        let decision = no_jitter().should_retry(FailureType::NeedsAuth, 1);
        assert_eq!(
            decision,
            RetryDecision::DoNotRetry {
                reason: "authentication required".to_string()
            }
        );
    }

    #[test]
    fn test_transient_retried_until_exhausted() {
        let policy = no_jitter();
        assert!(matches!(
            policy.should_retry(FailureType::Transient, 1),
            RetryDecision::Retry { attempt: 2, .. }
        ));
        assert!(matches!(
            policy.should_retry(FailureType::Transient, 2),
            RetryDecision::Retry { attempt: 3, .. }
        ));
        match policy.should_retry(FailureType::Transient, 3) {
            RetryDecision::DoNotRetry { reason } => assert!(reason.contains("exhausted")),
            other => panic!("expected no retry, got {other:?}"),
        }
    }

    #[test]
    fn test_rate_limited_uses_longer_server_delay() {
        let decision = no_jitter().should_retry(
            FailureType::RateLimited {
                retry_after: Some(Duration::from_secs(10)),
            },
            1,
        );
        assert_eq!(
            decision,
            RetryDecision::Retry {
                delay: Duration::from_secs(10),
                attempt: 2
            }
        );
    }

    #[test]
    fn test_classify_statuses() {
        let cases = [
            (400, FailureType::Permanent),
            (401, FailureType::NeedsAuth),
            (403, FailureType::NeedsAuth),
            (404, FailureType::Permanent),
            (408, FailureType::Transient),
            (410, FailureType::Permanent),
            (500, FailureType::Transient),
            (503, FailureType::Transient),
        ];
        for (status, expected) in cases {
            let error = DownloadError::http_status("https://example.org", status);
            assert_eq!(classify_error(&error), expected, "status {status}");
        }
    }

    #[test]
    fn test_classify_429_parses_retry_after() {
        let error = DownloadError::http_status_with_retry_after(
            "https://example.org",
            429,
            Some("30".to_string()),
        );
        assert_eq!(
            classify_error(&error),
            FailureType::RateLimited {
                retry_after: Some(Duration::from_secs(30))
            }
        );
    }

    #[test]
    fn test_classify_validation_permanent() {
        let error = DownloadError::validation("https://example.org/x.pdf", "html");
        assert_eq!(classify_error(&error), FailureType::Permanent);
    }

    #[test]
    fn test_classify_timeout_transient() {
        assert_eq!(
            classify_error(&DownloadError::timeout("https://example.org")),
            FailureType::Transient
        );
    }
}
