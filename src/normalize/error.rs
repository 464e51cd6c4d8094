//! Converter failures.

use thiserror::Error;

use crate::source::SourceFormat;

/// A converter could not extract minimum structure from its input.
///
/// Never fatal to a retrieval: the normalizer degrades to text-only output
/// or falls back to the last good cached document.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The input is not well-formed for its format.
    #[error("malformed {format} input: {reason}")]
    Malformed { format: SourceFormat, reason: String },

    /// Parsing succeeded but nothing usable was found.
    #[error("no extractable content in {format} input")]
    Empty { format: SourceFormat },

    /// The extraction backend failed (e.g. encrypted or corrupt PDF).
    #[error("{format} extraction failed: {reason}")]
    Extraction { format: SourceFormat, reason: String },

    /// A stored document was written by a newer schema than this build knows.
    #[error("document schema version {found} is newer than supported version {supported}")]
    UnsupportedSchema { found: u32, supported: u32 },

    /// No converter is registered for the format.
    #[error("no converter registered for {0}")]
    Unsupported(SourceFormat),
}

impl ParseError {
    pub fn malformed(format: SourceFormat, reason: impl Into<String>) -> Self {
        Self::Malformed {
            format,
            reason: reason.into(),
        }
    }

    pub fn empty(format: SourceFormat) -> Self {
        Self::Empty { format }
    }

    pub fn extraction(format: SourceFormat, reason: impl Into<String>) -> Self {
        Self::Extraction {
            format,
            reason: reason.into(),
        }
    }
}
