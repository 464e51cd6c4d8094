//! Canonical identifier resolution for publications.
//!
//! A publication may be known by any subset of PMC ID, DOI, PMID and arXiv ID.
//! [`resolve`] picks exactly one of them according to a [`PrecedencePolicy`]
//! and derives the cache key, filesystem name and display name from it. When
//! nothing is known, a key is derived by hashing the title.
//!
//! Resolution is pure: the same [`IdentifierSet`] and policy always produce the
//! same [`PublicationIdentifier`].

mod normalize;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

pub use normalize::{
    escape_for_filesystem, normalize_arxiv_id, normalize_doi, normalize_pmcid, normalize_pmid,
    normalize_title,
};
pub(crate) use normalize::compile_static_regex;

/// Prefix of content-derived canonical keys.
pub const HASH_KEY_PREFIX: &str = "hash-";

/// Hex characters kept from the SHA-256 digest in hash-derived keys.
const HASH_KEY_HEX_LEN: usize = 16;

/// Maximum characters of a title used as a display name.
const DISPLAY_TITLE_MAX_CHARS: usize = 60;

/// Errors from identifier resolution.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentifierError {
    /// No usable identifier or title was supplied.
    #[error("no usable identifier or title supplied")]
    Empty,

    /// A precedence policy string named an unknown identifier kind.
    #[error("unknown identifier kind '{0}'")]
    UnknownKind(String),
}

/// Kind of identifier a canonical key was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierKind {
    /// PubMed Central ID (`PMC123`).
    Pmcid,
    /// Digital Object Identifier.
    Doi,
    /// PubMed ID.
    Pmid,
    /// arXiv identifier without version.
    Arxiv,
    /// Content-derived key from the title.
    Hash,
}

impl IdentifierKind {
    /// Returns the lowercase name stored in the index and used in filenames.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pmcid => "pmcid",
            Self::Doi => "doi",
            Self::Pmid => "pmid",
            Self::Arxiv => "arxiv",
            Self::Hash => "hash",
        }
    }
}

impl fmt::Display for IdentifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IdentifierKind {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pmcid" | "pmc" => Ok(Self::Pmcid),
            "doi" => Ok(Self::Doi),
            "pmid" => Ok(Self::Pmid),
            "arxiv" | "arxiv_id" => Ok(Self::Arxiv),
            "hash" => Ok(Self::Hash),
            other => Err(IdentifierError::UnknownKind(other.to_string())),
        }
    }
}

/// Any subset of known identifiers for one publication, as supplied upstream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentifierSet {
    pub pmcid: Option<String>,
    pub doi: Option<String>,
    pub pmid: Option<String>,
    pub arxiv_id: Option<String>,
    /// Title or other free-text fallback used for hash-derived keys.
    pub title: Option<String>,
}

impl IdentifierSet {
    #[must_use]
    pub fn with_pmcid(mut self, value: impl Into<String>) -> Self {
        self.pmcid = Some(value.into());
        self
    }

    #[must_use]
    pub fn with_doi(mut self, value: impl Into<String>) -> Self {
        self.doi = Some(value.into());
        self
    }

    #[must_use]
    pub fn with_pmid(mut self, value: impl Into<String>) -> Self {
        self.pmid = Some(value.into());
        self
    }

    #[must_use]
    pub fn with_arxiv_id(mut self, value: impl Into<String>) -> Self {
        self.arxiv_id = Some(value.into());
        self
    }

    #[must_use]
    pub fn with_title(mut self, value: impl Into<String>) -> Self {
        self.title = Some(value.into());
        self
    }

    /// Returns the normalized value for `kind`, or `None` if absent or invalid.
    #[must_use]
    pub fn normalized(&self, kind: IdentifierKind) -> Option<String> {
        let raw = match kind {
            IdentifierKind::Pmcid => self.pmcid.as_deref(),
            IdentifierKind::Doi => self.doi.as_deref(),
            IdentifierKind::Pmid => self.pmid.as_deref(),
            IdentifierKind::Arxiv => self.arxiv_id.as_deref(),
            IdentifierKind::Hash => None,
        }?;
        let normalized = match kind {
            IdentifierKind::Pmcid => normalize_pmcid(raw),
            IdentifierKind::Doi => normalize_doi(raw),
            IdentifierKind::Pmid => normalize_pmid(raw),
            IdentifierKind::Arxiv => normalize_arxiv_id(raw),
            IdentifierKind::Hash => None,
        };
        if normalized.is_none() && !raw.trim().is_empty() {
            debug!(kind = %kind, raw = %raw, "ignoring invalid identifier value");
        }
        normalized
    }

    /// Returns `true` when neither identifiers nor a title are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        [
            &self.pmcid,
            &self.doi,
            &self.pmid,
            &self.arxiv_id,
            &self.title,
        ]
        .iter()
        .all(|v| v.as_deref().is_none_or(|s| s.trim().is_empty()))
    }
}

/// Ordered identifier kinds consulted during resolution.
///
/// The hash fallback is always tried last and is never part of the list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrecedencePolicy {
    order: Vec<IdentifierKind>,
}

impl Default for PrecedencePolicy {
    fn default() -> Self {
        Self {
            order: vec![
                IdentifierKind::Pmcid,
                IdentifierKind::Doi,
                IdentifierKind::Pmid,
                IdentifierKind::Arxiv,
            ],
        }
    }
}

impl PrecedencePolicy {
    /// Builds a policy from an explicit order. `Hash` entries and duplicates are dropped.
    #[must_use]
    pub fn new(order: impl IntoIterator<Item = IdentifierKind>) -> Self {
        let mut deduped = Vec::new();
        for kind in order {
            if kind != IdentifierKind::Hash && !deduped.contains(&kind) {
                deduped.push(kind);
            }
        }
        Self { order: deduped }
    }

    /// Parses names such as `["doi", "pmcid"]`.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError::UnknownKind`] for an unrecognised name.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, IdentifierError> {
        let kinds = names
            .iter()
            .map(|n| n.as_ref().parse::<IdentifierKind>())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(kinds))
    }

    #[must_use]
    pub fn order(&self) -> &[IdentifierKind] {
        &self.order
    }
}

/// The resolved canonical identity of a publication.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicationIdentifier {
    /// Key used by the cache, the index and request coalescing.
    pub canonical_key: String,
    pub kind: IdentifierKind,
    /// Normalized value the key was derived from (the title for hash keys).
    pub raw_value: String,
    /// Injective, path-separator-free name for on-disk files.
    pub filesystem_safe_name: String,
    pub display_name: String,
}

impl PublicationIdentifier {
    fn from_parts(kind: IdentifierKind, canonical_key: String, raw_value: String) -> Self {
        let filesystem_safe_name = format!("{}_{}", kind.as_str(), escape_for_filesystem(&canonical_key));
        let display_name = match kind {
            IdentifierKind::Pmcid => canonical_key.clone(),
            IdentifierKind::Doi => format!("doi:{canonical_key}"),
            IdentifierKind::Pmid => format!("PMID {canonical_key}"),
            IdentifierKind::Arxiv => format!("arXiv:{canonical_key}"),
            IdentifierKind::Hash => truncate_title(&raw_value),
        };
        Self {
            canonical_key,
            kind,
            raw_value,
            filesystem_safe_name,
            display_name,
        }
    }

    /// Rebuilds an identifier from an index row (`identifier`, `identifier_kind`).
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError::Empty`] when the stored key is blank.
    pub fn from_stored(kind: IdentifierKind, canonical_key: &str) -> Result<Self, IdentifierError> {
        let key = canonical_key.trim();
        if key.is_empty() {
            return Err(IdentifierError::Empty);
        }
        Ok(Self::from_parts(kind, key.to_string(), key.to_string()))
    }
}

impl fmt::Display for PublicationIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name)
    }
}

/// Resolves an identifier set to its canonical identity.
///
/// # Errors
///
/// Returns [`IdentifierError::Empty`] when no valid identifier and no title is present.
pub fn resolve(
    ids: &IdentifierSet,
    policy: &PrecedencePolicy,
) -> Result<PublicationIdentifier, IdentifierError> {
    for &kind in policy.order() {
        if let Some(value) = ids.normalized(kind) {
            return Ok(PublicationIdentifier::from_parts(kind, value.clone(), value));
        }
    }

    let title = ids
        .title
        .as_deref()
        .map(normalize_title)
        .filter(|t| !t.is_empty())
        .ok_or(IdentifierError::Empty)?;

    Ok(PublicationIdentifier::from_parts(
        IdentifierKind::Hash,
        hash_key(&title),
        title,
    ))
}

/// Every canonical key the set could resolve to, in policy order, for alias lookups.
#[must_use]
pub fn alternate_keys(ids: &IdentifierSet, policy: &PrecedencePolicy) -> Vec<PublicationIdentifier> {
    let mut keys: Vec<PublicationIdentifier> = policy
        .order()
        .iter()
        .filter_map(|&kind| {
            ids.normalized(kind)
                .map(|v| PublicationIdentifier::from_parts(kind, v.clone(), v))
        })
        .collect();
    keys.dedup_by(|a, b| a.canonical_key == b.canonical_key);
    keys
}

fn hash_key(normalized_title: &str) -> String {
    let digest = Sha256::digest(normalized_title.as_bytes());
    let hex = hex::encode(digest);
    format!("{HASH_KEY_PREFIX}{}", &hex[..HASH_KEY_HEX_LEN])
}

fn truncate_title(title: &str) -> String {
    if title.chars().count() <= DISPLAY_TITLE_MAX_CHARS {
        return title.to_string();
    }
    let truncated: String = title.chars().take(DISPLAY_TITLE_MAX_CHARS).collect();
    format!("{}...", truncated.trim_end())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_pmcid_wins_over_pmid() {
        let ids = IdentifierSet::default()
            .with_pmcid("PMC999")
            .with_pmid("12345678");
        let id = resolve(&ids, &PrecedencePolicy::default()).unwrap();
        assert_eq!(id.canonical_key, "PMC999");
        assert_eq!(id.kind, IdentifierKind::Pmcid);
        assert_eq!(id.display_name, "PMC999");
    }

    #[test]
    fn test_resolve_doi_before_pmid() {
        let ids = IdentifierSet::default()
            .with_pmid("42")
            .with_doi("https://doi.org/10.1000/ABC");
        let id = resolve(&ids, &PrecedencePolicy::default()).unwrap();
        assert_eq!(id.kind, IdentifierKind::Doi);
        assert_eq!(id.canonical_key, "10.1000/abc");
        assert_eq!(id.display_name, "doi:10.1000/abc");
    }

    #[test]
    fn test_resolve_skips_invalid_value() {
        let ids = IdentifierSet::default()
            .with_pmcid("not-a-pmcid")
            .with_pmid("555");
        let id = resolve(&ids, &PrecedencePolicy::default()).unwrap();
        assert_eq!(id.kind, IdentifierKind::Pmid);
        assert_eq!(id.canonical_key, "555");
    }

    #[test]
    fn test_resolve_custom_policy() {
        let policy = PrecedencePolicy::from_names(&["pmid", "pmcid"]).unwrap();
        let ids = IdentifierSet::default()
            .with_pmcid("PMC999")
            .with_pmid("12345678");
        let id = resolve(&ids, &policy).unwrap();
        assert_eq!(id.canonical_key, "12345678");
    }

    #[test]
    fn test_policy_drops_hash_and_duplicates() {
        let policy = PrecedencePolicy::new([
            IdentifierKind::Doi,
            IdentifierKind::Hash,
            IdentifierKind::Doi,
        ]);
        assert_eq!(policy.order(), &[IdentifierKind::Doi]);
    }

    #[test]
    fn test_policy_unknown_name() {
        let err = PrecedencePolicy::from_names(&["isbn"]).unwrap_err();
        assert_eq!(err, IdentifierError::UnknownKind("isbn".to_string()));
    }

    #[test]
    fn test_resolve_hash_fallback_is_deterministic() {
        let a = IdentifierSet::default().with_title("Deep  Learning for Genomics");
        let b = IdentifierSet::default().with_title("deep learning\tfor genomics ");
        let id_a = resolve(&a, &PrecedencePolicy::default()).unwrap();
        let id_b = resolve(&b, &PrecedencePolicy::default()).unwrap();
        assert_eq!(id_a.kind, IdentifierKind::Hash);
        assert_eq!(id_a, id_b);
        assert!(id_a.canonical_key.starts_with(HASH_KEY_PREFIX));
        assert_eq!(id_a.canonical_key.len(), HASH_KEY_PREFIX.len() + 16);
    }

    #[test]
    fn test_resolve_empty_fails() {
        let err = resolve(&IdentifierSet::default(), &PrecedencePolicy::default()).unwrap_err();
        assert_eq!(err, IdentifierError::Empty);

        let blank = IdentifierSet::default().with_title("   ");
        assert!(blank.is_empty());
        assert!(resolve(&blank, &PrecedencePolicy::default()).is_err());
    }

    #[test]
    fn test_filesystem_name_has_no_separators() {
        let ids = IdentifierSet::default().with_doi("10.1234/a.b/c");
        let id = resolve(&ids, &PrecedencePolicy::default()).unwrap();
        assert!(id.filesystem_safe_name.starts_with("doi_"));
        assert!(!id.filesystem_safe_name.contains('/'));
        assert!(!id.filesystem_safe_name.contains('.'));
    }

    #[test]
    fn test_filesystem_names_distinct_across_kinds() {
        let pmid = resolve(
            &IdentifierSet::default().with_pmid("123"),
            &PrecedencePolicy::default(),
        )
        .unwrap();
        let pmcid = resolve(
            &IdentifierSet::default().with_pmcid("123"),
            &PrecedencePolicy::default(),
        )
        .unwrap();
        assert_ne!(pmid.filesystem_safe_name, pmcid.filesystem_safe_name);
    }

    #[test]
    fn test_alternate_keys_in_policy_order() {
        let ids = IdentifierSet::default()
            .with_pmid("1")
            .with_doi("10.1000/x")
            .with_pmcid("PMC2");
        let keys: Vec<String> = alternate_keys(&ids, &PrecedencePolicy::default())
            .into_iter()
            .map(|k| k.canonical_key)
            .collect();
        assert_eq!(keys, vec!["PMC2", "10.1000/x", "1"]);
    }

    #[test]
    fn test_hash_display_name_truncated() {
        let long_title = "word ".repeat(40);
        let id = resolve(
            &IdentifierSet::default().with_title(long_title),
            &PrecedencePolicy::default(),
        )
        .unwrap();
        assert!(id.display_name.ends_with("..."));
        assert!(id.display_name.chars().count() <= DISPLAY_TITLE_MAX_CHARS + 3);
    }

    #[test]
    fn test_from_stored_roundtrips_filename() {
        let resolved = resolve(
            &IdentifierSet::default().with_doi("10.1000/xyz"),
            &PrecedencePolicy::default(),
        )
        .unwrap();
        let stored = PublicationIdentifier::from_stored(IdentifierKind::Doi, "10.1000/xyz").unwrap();
        assert_eq!(resolved.filesystem_safe_name, stored.filesystem_safe_name);
    }

    #[test]
    fn test_identifier_kind_parse() {
        assert_eq!("PMC".parse::<IdentifierKind>().unwrap(), IdentifierKind::Pmcid);
        assert_eq!("arxiv_id".parse::<IdentifierKind>().unwrap(), IdentifierKind::Arxiv);
        assert!("bogus".parse::<IdentifierKind>().is_err());
    }
}
