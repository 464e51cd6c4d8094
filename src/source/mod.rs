//! Downloaded source artifacts and their on-disk store.
//!
//! A [`SourceFile`] is a raw file obtained from one provider (XML, LaTeX,
//! HTML or PDF). Files live in one directory per provider under the cache
//! root, named after the publication's filesystem-safe identifier.

mod format;
pub(crate) mod store;

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub use format::{SourceFormat, sniff_format, validate_content};
pub use store::SourceStore;

/// Errors from the source store.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Filesystem failure while reading or writing a source file.
    #[error("IO error on source file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SourceError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Where a source file came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Provider {
    /// PubMed Central (via Europe PMC).
    Pmc,
    Arxiv,
    Unpaywall,
    Core,
    Institutional,
    Mirror,
    /// A configured adapter with its own name (for example `oa_api`).
    Other(String),
}

impl Provider {
    /// Maps a provider name to a variant; unknown names become [`Provider::Other`].
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "pmc" | "europepmc" => Self::Pmc,
            "arxiv" => Self::Arxiv,
            "unpaywall" => Self::Unpaywall,
            "core" => Self::Core,
            "institutional" => Self::Institutional,
            "mirror" => Self::Mirror,
            other => Self::Other(other.to_string()),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pmc => "pmc",
            Self::Arxiv => "arxiv",
            Self::Unpaywall => "unpaywall",
            Self::Core => "core",
            Self::Institutional => "institutional",
            Self::Mirror => "mirror",
            Self::Other(name) => name,
        }
    }

    /// Directory name under `sources/`; anything outside `[a-z0-9_-]` becomes `_`.
    #[must_use]
    pub fn dir_name(&self) -> String {
        self.as_str()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c.to_ascii_lowercase()
                } else {
                    '_'
                }
            })
            .collect()
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for Provider {
    fn from(value: String) -> Self {
        Self::from_name(&value)
    }
}

impl From<Provider> for String {
    fn from(value: Provider) -> Self {
        value.as_str().to_string()
    }
}

/// Acquisition tier of a provider. Lower tiers are tried first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderTier {
    /// Free, permanent, structured sources (PMC, arXiv, preprint servers).
    FreeStructured = 1,
    /// Open-access aggregator APIs.
    OpenAccessAggregator = 2,
    /// Institutional or authenticated access.
    Institutional = 3,
    /// Last-resort mirrors.
    Mirror = 4,
}

impl ProviderTier {
    /// Parses a numeric tier (1-4).
    #[must_use]
    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(Self::FreeStructured),
            2 => Some(Self::OpenAccessAggregator),
            3 => Some(Self::Institutional),
            4 => Some(Self::Mirror),
            _ => None,
        }
    }

    #[must_use]
    pub fn number(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for ProviderTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tier {}", self.number())
    }
}

/// A physical downloaded artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub path: PathBuf,
    /// Canonical key of the identifier the file is stored under.
    pub identifier: String,
    pub provider: Provider,
    pub format: SourceFormat,
    /// Lower-case hex SHA-256 of the file bytes.
    pub content_hash: String,
    pub size_bytes: u64,
    pub downloaded_at: DateTime<Utc>,
    /// Filesystem modification time, used for staleness checks.
    pub modified_at: DateTime<Utc>,
}

/// SHA-256 of `bytes` as lower-case hex.
#[must_use]
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_known_names() {
        assert_eq!(Provider::from_name("PMC"), Provider::Pmc);
        assert_eq!(Provider::from_name("europepmc"), Provider::Pmc);
        assert_eq!(Provider::from_name("unpaywall"), Provider::Unpaywall);
    }

    #[test]
    fn test_provider_other_keeps_name() {
        let provider = Provider::from_name("oa_api");
        assert_eq!(provider, Provider::Other("oa_api".to_string()));
        assert_eq!(provider.as_str(), "oa_api");
        assert_eq!(provider.dir_name(), "oa_api");
    }

    #[test]
    fn test_provider_dir_name_sanitized() {
        assert_eq!(Provider::Other("../evil".to_string()).dir_name(), "___evil");
    }

    #[test]
    fn test_provider_serde_as_string() {
        let json = serde_json::to_string(&Provider::Arxiv).unwrap();
        assert_eq!(json, "\"arxiv\"");
        let back: Provider = serde_json::from_str("\"oa_api\"").unwrap();
        assert_eq!(back, Provider::Other("oa_api".to_string()));
    }

    #[test]
    fn test_tier_ordering() {
        assert!(ProviderTier::FreeStructured < ProviderTier::OpenAccessAggregator);
        assert!(ProviderTier::Institutional < ProviderTier::Mirror);
        assert_eq!(ProviderTier::from_number(2), Some(ProviderTier::OpenAccessAggregator));
        assert_eq!(ProviderTier::from_number(9), None);
    }

    #[test]
    fn test_content_hash_is_sha256_hex() {
        assert_eq!(
            content_hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
