//! Crate-level errors for construction and non-retrieval operations.
//!
//! Retrieval itself never fails with an error: [`crate::FullTextManager::get_document`]
//! reports unavailability and parse failures inside its response.

use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;
use crate::db::DbError;
use crate::identifier::IdentifierError;
use crate::index::IndexError;

#[derive(Debug, Error)]
pub enum FullTextError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The identifier set cannot be resolved to a key.
    #[error(transparent)]
    Identifier(#[from] IdentifierError),

    #[error("failed to open metadata index: {0}")]
    Database(#[from] DbError),

    #[error(transparent)]
    Index(#[from] IndexError),

    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The manager was built without a metadata index.
    #[error("metadata index is not configured")]
    IndexDisabled,
}

impl FullTextError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
