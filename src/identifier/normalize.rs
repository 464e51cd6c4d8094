//! Normalization of raw identifier strings (DOI, PMID, PMCID, arXiv).
//!
//! Every function here is pure: `None` means the input is not a valid
//! identifier of that kind.

use std::sync::LazyLock;

use regex::Regex;

/// Compiles a hard-coded regex, panicking with the pattern on failure.
pub(crate) fn compile_static_regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid static regex '{pattern}': {e}"))
}

static DOI_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r#"^10\.\d{4,9}(?:\.\d+)*/[^\s<>"']+$"#));

static PMCID_RE: LazyLock<Regex> = LazyLock::new(|| compile_static_regex(r"^PMC\d{1,10}$"));

static PMID_RE: LazyLock<Regex> = LazyLock::new(|| compile_static_regex(r"^\d{1,10}$"));

static ARXIV_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r"^(?:\d{4}\.\d{4,5}|[a-z\-]+(?:\.[a-z]{2})?/\d{7})$")
});

static ARXIV_VERSION_RE: LazyLock<Regex> = LazyLock::new(|| compile_static_regex(r"v\d+$"));

const DOI_PREFIXES: [&str; 4] = [
    "https://doi.org/",
    "http://doi.org/",
    "https://dx.doi.org/",
    "http://dx.doi.org/",
];

/// Normalizes a DOI: strips URL and `doi:` prefixes, URL-decodes, lower-cases.
///
/// DOIs are case-insensitive, so the lower-cased form is the canonical one.
#[must_use]
pub fn normalize_doi(raw: &str) -> Option<String> {
    let mut doi = raw.trim();

    let lower = doi.to_ascii_lowercase();
    for prefix in DOI_PREFIXES {
        if lower.starts_with(prefix) {
            doi = &doi[prefix.len()..];
            break;
        }
    }

    if let Some(rest) = strip_prefix_ignore_case(doi, "doi:") {
        doi = rest.trim_start();
    }

    let decoded = match urlencoding::decode(doi) {
        Ok(decoded) => decoded.trim().to_string(),
        Err(_) => doi.trim().to_string(),
    };
    let cleaned = decoded
        .trim_end_matches(['.', ',', ';', ')'])
        .to_ascii_lowercase();

    DOI_RE.is_match(&cleaned).then_some(cleaned)
}

/// Normalizes a PubMed Central ID to `PMC<digits>`.
///
/// Accepts `PMC123`, `pmc123` and bare digits.
#[must_use]
pub fn normalize_pmcid(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let upper = trimmed.to_ascii_uppercase();
    let candidate = if upper.starts_with("PMC") {
        upper
    } else {
        format!("PMC{upper}")
    };
    PMCID_RE.is_match(&candidate).then_some(candidate)
}

/// Normalizes a PubMed ID (digits only, optional `PMID:` prefix).
#[must_use]
pub fn normalize_pmid(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let stripped = strip_prefix_ignore_case(trimmed, "pmid:").map_or(trimmed, str::trim);
    let without_zeros = stripped.trim_start_matches('0');
    (PMID_RE.is_match(stripped) && !without_zeros.is_empty()).then(|| without_zeros.to_string())
}

/// `str::strip_prefix` with an ASCII case-insensitive prefix; safe on any UTF-8 input.
fn strip_prefix_ignore_case<'a>(value: &'a str, prefix: &str) -> Option<&'a str> {
    let head = value.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &value[prefix.len()..])
}

/// Normalizes an arXiv identifier: drops `arXiv:` prefix, DOI form and version suffix.
#[must_use]
pub fn normalize_arxiv_id(raw: &str) -> Option<String> {
    let mut candidate = raw.trim().trim_matches('/').to_ascii_lowercase();

    if let Some(rest) = candidate.strip_prefix("10.48550/") {
        candidate = rest.to_string();
    }
    if let Some(rest) = candidate.strip_prefix("arxiv:") {
        candidate = rest.trim().to_string();
    } else if let Some(rest) = candidate.strip_prefix("arxiv.") {
        candidate = rest.to_string();
    }

    let unversioned = ARXIV_VERSION_RE.replace(&candidate, "").to_string();
    ARXIV_ID_RE.is_match(&unversioned).then_some(unversioned)
}

/// Collapses whitespace and lower-cases free text used for hash-derived keys.
#[must_use]
pub fn normalize_title(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Escapes a canonical value into a filesystem-safe, injective name.
///
/// ASCII letters, digits and `-` pass through; every other byte becomes `_xx`
/// (lower-case hex), so `/` and `.` in DOIs can never create path components
/// or hidden files.
#[must_use]
pub fn escape_for_filesystem(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("_{byte:02x}"));
        }
    }
    out
}
