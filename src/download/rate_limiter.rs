//! Per-host request pacing for provider traffic.
//!
//! Each host gets a "next allowed" instant. [`RateLimiter::acquire`] waits
//! until that instant and pushes it forward by the configured interval;
//! [`RateLimiter::record_rate_limit`] pushes it further when a server answers
//! 429 with `Retry-After`. Hosts are independent, so a throttled provider
//! never delays requests to other providers.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

/// Cumulative wait per host after which a warning is logged.
const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(30);

/// Upper bound honoured for `Retry-After`.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Shared, per-host pacing state. Wrap in `Arc` and share across tasks.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    disabled: bool,
    // Arc lets callers drop the shard guard before awaiting the inner mutex.
    hosts: DashMap<String, Arc<HostState>>,
}

#[derive(Debug, Default)]
struct HostState {
    /// `None` until the first request; the first request never waits.
    next_allowed: Mutex<Option<Instant>>,
    waited_ms: AtomicU64,
}

impl HostState {
    #[allow(clippy::cast_possible_truncation)]
    fn add_wait(&self, delay: Duration) -> Duration {
        let delay_ms = delay.as_millis() as u64;
        let total = self.waited_ms.fetch_add(delay_ms, Ordering::Relaxed) + delay_ms;
        Duration::from_millis(total)
    }
}

impl RateLimiter {
    /// Creates a limiter enforcing `interval` between requests to one host.
    ///
    /// A zero interval disables pacing, but `Retry-After` is still honoured.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            disabled: false,
            hosts: DashMap::new(),
        }
    }

    /// A limiter that never waits, not even for `Retry-After`.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            interval: Duration::ZERO,
            disabled: true,
            hosts: DashMap::new(),
        }
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn state(&self, host: &str) -> Arc<HostState> {
        self.hosts
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(HostState::default()))
            .clone()
    }

    /// Waits until a request to `url`'s host is allowed and reserves the slot.
    #[instrument(skip(self), fields(host))]
    pub async fn acquire(&self, url: &str) {
        if self.disabled {
            return;
        }
        let host = extract_host(url);
        tracing::Span::current().record("host", host.as_str());

        let state = self.state(&host);
        let mut next_allowed = state.next_allowed.lock().await;

        let now = Instant::now();
        if let Some(at) = *next_allowed {
            if at > now {
                let delay = at - now;
                let total = state.add_wait(delay);
                debug!(host = %host, delay_ms = delay.as_millis(), "pacing request");
                if total >= CUMULATIVE_DELAY_WARNING_THRESHOLD {
                    warn!(
                        host = %host,
                        cumulative_delay_secs = total.as_secs(),
                        "heavy rate limiting against provider host"
                    );
                }
                tokio::time::sleep_until(at).await;
            }
        }

        *next_allowed = Some(Instant::now() + self.interval);
    }

    /// Records a server-mandated pause for `url`'s host.
    ///
    /// The delay is capped at [`MAX_RETRY_AFTER`].
    #[instrument(skip(self), fields(host))]
    pub async fn record_rate_limit(&self, url: &str, delay: Duration) {
        if self.disabled {
            return;
        }
        let host = extract_host(url);
        tracing::Span::current().record("host", host.as_str());

        let delay = delay.min(MAX_RETRY_AFTER);
        let state = self.state(&host);
        let mut next_allowed = state.next_allowed.lock().await;
        let resume_at = Instant::now() + delay;
        if next_allowed.is_none_or(|at| at < resume_at) {
            *next_allowed = Some(resume_at);
        }
        debug!(host = %host, delay_ms = delay.as_millis(), "server requested pause");
    }
}

/// Lower-cased host of `url`, or `"unknown"` for unparseable input.
#[must_use]
pub fn extract_host(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_lowercase))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Parses a `Retry-After` value (delta seconds or HTTP-date).
///
/// Negative or unparseable values yield `None`; dates in the past yield zero;
/// anything longer than [`MAX_RETRY_AFTER`] is capped.
#[must_use]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let value = header_value.trim();

    let delay = if let Ok(seconds) = value.parse::<i64>() {
        Duration::from_secs(u64::try_from(seconds).ok()?)
    } else {
        let at = httpdate::parse_http_date(value).ok()?;
        at.duration_since(std::time::SystemTime::now())
            .unwrap_or(Duration::ZERO)
    };

    if delay > MAX_RETRY_AFTER {
        warn!(
            delay_secs = delay.as_secs(),
            "Retry-After exceeds maximum, capping at 1 hour"
        );
        return Some(MAX_RETRY_AFTER);
    }
    Some(delay)
}
