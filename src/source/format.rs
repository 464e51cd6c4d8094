//! Source formats and magic-byte validation of downloaded content.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Bytes inspected when sniffing content.
const SNIFF_WINDOW: usize = 2048;

/// Physical format of a downloaded source file.
///
/// Variants are declared best-first: the derived `Ord` is the locator's
/// format preference (structured XML before LaTeX before HTML before PDF).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    /// JATS / NLM structured XML.
    Xml,
    /// LaTeX source.
    Latex,
    /// Publisher HTML page.
    Html,
    /// PDF document.
    Pdf,
}

impl SourceFormat {
    /// All formats in preference order.
    pub const ALL: [SourceFormat; 4] = [Self::Xml, Self::Latex, Self::Html, Self::Pdf];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Xml => "xml",
            Self::Latex => "latex",
            Self::Html => "html",
            Self::Pdf => "pdf",
        }
    }

    /// File extension used in the source store.
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Xml => "xml",
            Self::Latex => "tex",
            Self::Html => "html",
            Self::Pdf => "pdf",
        }
    }

    /// Maps a file extension back to a format.
    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "xml" | "nxml" => Some(Self::Xml),
            "tex" => Some(Self::Latex),
            "html" | "htm" => Some(Self::Html),
            "pdf" => Some(Self::Pdf),
            _ => None,
        }
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "xml" => Ok(Self::Xml),
            "latex" | "tex" => Ok(Self::Latex),
            "html" => Ok(Self::Html),
            "pdf" => Ok(Self::Pdf),
            other => Err(format!("unknown source format '{other}'")),
        }
    }
}

/// Detects the format of `bytes` from its leading signature.
///
/// Returns `None` when nothing recognisable is found.
#[must_use]
pub fn sniff_format(bytes: &[u8]) -> Option<SourceFormat> {
    if bytes.starts_with(b"%PDF-") {
        return Some(SourceFormat::Pdf);
    }

    let window = &bytes[..bytes.len().min(SNIFF_WINDOW)];
    let head = String::from_utf8_lossy(window);
    let trimmed = head.trim_start_matches('\u{feff}').trim_start();
    let lower = trimmed.to_ascii_lowercase();

    if lower.starts_with("<!doctype html") || lower.starts_with("<html") || lower.contains("<html")
    {
        return Some(SourceFormat::Html);
    }
    if lower.starts_with("<?xml") || lower.starts_with("<article") || lower.starts_with("<!doctype article")
    {
        return Some(SourceFormat::Xml);
    }
    if lower.contains("\\documentclass") || lower.contains("\\begin{document}") {
        return Some(SourceFormat::Latex);
    }
    None
}

/// Checks that `bytes` really are `expected`.
///
/// # Errors
///
/// Returns a human-readable reason when the content is empty, unrecognised,
/// or a different format than advertised (for example an HTML login page
/// served under a `.pdf` URL).
pub fn validate_content(expected: SourceFormat, bytes: &[u8]) -> Result<SourceFormat, String> {
    if bytes.is_empty() {
        return Err("empty response body".to_string());
    }
    match sniff_format(bytes) {
        Some(actual) if actual == expected => Ok(actual),
        Some(actual) => Err(format!("expected {expected} content, got {actual}")),
        None => Err(format!("content does not look like {expected}")),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_format_order_prefers_xml() {
        assert!(SourceFormat::Xml < SourceFormat::Latex);
        assert!(SourceFormat::Latex < SourceFormat::Html);
        assert!(SourceFormat::Html < SourceFormat::Pdf);
    }

    #[test]
    fn test_sniff_pdf() {
        assert_eq!(sniff_format(b"%PDF-1.7\n..."), Some(SourceFormat::Pdf));
    }

    #[test]
    fn test_sniff_xml_with_declaration_and_bom() {
        let xml = "\u{feff}<?xml version=\"1.0\"?><article></article>";
        assert_eq!(sniff_format(xml.as_bytes()), Some(SourceFormat::Xml));
        assert_eq!(sniff_format(b"  <article>"), Some(SourceFormat::Xml));
    }

    #[test]
    fn test_sniff_xhtml_is_html() {
        let xhtml = "<?xml version=\"1.0\"?>\n<html xmlns=\"http://www.w3.org/1999/xhtml\">";
        assert_eq!(sniff_format(xhtml.as_bytes()), Some(SourceFormat::Html));
    }

    #[test]
    fn test_sniff_latex() {
        assert_eq!(
            sniff_format(b"% comment\n\\documentclass{article}"),
            Some(SourceFormat::Latex)
        );
    }

    #[test]
    fn test_sniff_unknown() {
        assert_eq!(sniff_format(b"just some text"), None);
    }

    #[test]
    fn test_validate_rejects_mislabeled_html() {
        let err = validate_content(SourceFormat::Pdf, b"<!DOCTYPE html><html>login</html>")
            .unwrap_err();
        assert!(err.contains("expected pdf"), "{err}");
    }

    #[test]
    fn test_validate_rejects_empty() {
        assert!(validate_content(SourceFormat::Xml, b"").is_err());
    }

    #[test]
    fn test_extension_roundtrip() {
        for format in SourceFormat::ALL {
            assert_eq!(SourceFormat::from_extension(format.extension()), Some(format));
        }
    }
}
