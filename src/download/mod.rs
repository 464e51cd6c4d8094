//! Remote acquisition of full-text sources.
//!
//! - [`ProviderAdapter`]: one external source (Europe PMC, arXiv, Unpaywall,
//!   URL templates from configuration)
//! - [`WaterfallDownloader`]: tries adapters in tier order with per-provider
//!   concurrency, per-host pacing, retries and content validation
//! - [`HttpFetcher`]: shared reqwest client with timeouts and a body cap

mod adapter;
mod client;
mod error;
pub mod providers;
pub mod rate_limiter;
mod retry;
mod waterfall;

pub use adapter::{CandidateSource, ProviderAdapter};
pub use client::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT, FetchedBody, HttpFetcher, HttpOptions,
    MAX_BODY_BYTES, default_user_agent,
};
pub use error::DownloadError;
pub use rate_limiter::{RateLimiter, extract_host, parse_retry_after};
pub use retry::{DEFAULT_MAX_ATTEMPTS, FailureType, RetryDecision, RetryPolicy, classify_error};
pub use waterfall::{
    Acquisition, AttemptRecord, DEFAULT_PROVIDER_CONCURRENCY, FailureReason, ProbeReport,
    UnavailableReport, WaterfallDownloader, WaterfallOptions, WaterfallOutcome,
};
