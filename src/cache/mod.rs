//! Compressed store of normalized documents.
//!
//! One gzip-compressed JSON file per canonical identifier under the parsed
//! directory. Writes go to a unique temp file and are renamed into place, so
//! readers see either the previous or the new document, never a torn one.
//! Serializing writes per identifier is the caller's job (see
//! [`crate::lease`]).

mod staleness;

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use thiserror::Error;
use tracing::{debug, instrument};

pub use staleness::{
    DEFAULT_MIN_QUALITY, DEFAULT_TTL_DAYS, Freshness, StaleReason, StalenessPolicy,
};

use crate::identifier::PublicationIdentifier;
use crate::normalize::NormalizedDocument;
use crate::source::SourceError;
use crate::source::store::write_atomic;

/// File suffix of cached documents.
pub const PARSED_EXTENSION: &str = "json.gz";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode document for {identifier}: {source}")]
    Encode {
        identifier: String,
        #[source]
        source: serde_json::Error,
    },

    /// The cached file exists but is not a readable document.
    #[error("corrupt cached document {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

impl CacheError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Parsed content cache rooted at `<cache_root>/parsed`.
#[derive(Debug, Clone)]
pub struct ParsedCache {
    root: PathBuf,
}

impl ParsedCache {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn path_for(&self, id: &PublicationIdentifier) -> PathBuf {
        self.root
            .join(format!("{}.{PARSED_EXTENSION}", id.filesystem_safe_name))
    }

    /// Loads the cached document for `id`, or `None` if there is none.
    ///
    /// # Errors
    ///
    /// [`CacheError::Io`] on read failures other than "not found";
    /// [`CacheError::Corrupt`] when the file cannot be decompressed or parsed.
    #[instrument(skip(self), fields(id = %id.canonical_key))]
    pub async fn load(
        &self,
        id: &PublicationIdentifier,
    ) -> Result<Option<NormalizedDocument>, CacheError> {
        let path = self.path_for(id);
        let compressed = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::io(&path, e)),
        };
        let doc = decode(&compressed).map_err(|reason| CacheError::Corrupt {
            path: path.clone(),
            reason,
        })?;
        debug!(path = %path.display(), "cached document loaded");
        Ok(Some(doc))
    }

    /// Compresses and atomically writes `doc` under `id`.
    ///
    /// # Errors
    ///
    /// [`CacheError::Encode`] if serialization fails, [`CacheError::Io`] if
    /// the directory cannot be created or the write fails.
    #[instrument(skip(self, doc), fields(id = %id.canonical_key))]
    pub async fn store(
        &self,
        id: &PublicationIdentifier,
        doc: &NormalizedDocument,
    ) -> Result<PathBuf, CacheError> {
        let compressed = encode(doc).map_err(|source| CacheError::Encode {
            identifier: id.canonical_key.clone(),
            source,
        })?;
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| CacheError::io(&self.root, e))?;

        let path = self.path_for(id);
        write_atomic(&path, &compressed)
            .await
            .map_err(|SourceError::Io { path, source }| CacheError::Io { path, source })?;
        debug!(path = %path.display(), bytes = compressed.len(), "document cached");
        Ok(path)
    }

    /// Deletes the cached document; `false` if there was none.
    ///
    /// # Errors
    ///
    /// [`CacheError::Io`] if removal fails for a reason other than absence.
    pub async fn remove(&self, id: &PublicationIdentifier) -> Result<bool, CacheError> {
        let path = self.path_for(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CacheError::io(&path, e)),
        }
    }
}

fn encode(doc: &NormalizedDocument) -> Result<Vec<u8>, serde_json::Error> {
    let json = serde_json::to_vec(doc)?;
    let mut encoder = GzEncoder::new(Vec::with_capacity(json.len() / 4), Compression::default());
    // Writes into a Vec only fail on allocation failure.
    encoder
        .write_all(&json)
        .and_then(|()| encoder.finish())
        .map_err(serde_json::Error::io)
}

fn decode(compressed: &[u8]) -> Result<NormalizedDocument, String> {
    let mut json = Vec::new();
    GzDecoder::new(compressed)
        .read_to_end(&mut json)
        .map_err(|e| format!("gzip: {e}"))?;
    serde_json::from_slice(&json).map_err(|e| format!("json: {e}"))
}
