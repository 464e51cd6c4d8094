//! Error types for metadata index operations.

use std::fmt;

use thiserror::Error;

/// What went wrong in SQLite, coarse enough to decide on a retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexDbErrorKind {
    /// Another writer holds the database (`SQLITE_BUSY` / `SQLITE_LOCKED`).
    BusyOrLocked,
    /// Unique, foreign-key or check constraint rejected the write.
    Constraint,
    /// No pooled connection became available, or the pool is shut down.
    Pool,
    /// A stored row did not decode into a [`super::CacheEntry`].
    Decode,
    Io,
    Other,
}

impl IndexDbErrorKind {
    #[must_use]
    pub fn from_sqlx(error: &sqlx::Error) -> Self {
        match error {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => Self::Pool,
            sqlx::Error::Io(_) => Self::Io,
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => Self::Decode,
            sqlx::Error::Database(db) => Self::from_database(db.as_ref()),
            _ => Self::Other,
        }
    }

    fn from_database(db: &(dyn sqlx::error::DatabaseError + 'static)) -> Self {
        // Extended result codes arrive as numbers: 5 = BUSY, 6 = LOCKED.
        let code = db.code();
        let code = code.as_deref().unwrap_or_default();
        if matches!(code, "5" | "6" | "SQLITE_BUSY" | "SQLITE_LOCKED") {
            return Self::BusyOrLocked;
        }
        if db.is_unique_violation() || db.is_foreign_key_violation() || db.is_check_violation() {
            return Self::Constraint;
        }
        if db.message().contains("database is locked") {
            return Self::BusyOrLocked;
        }
        Self::Other
    }

    /// Whether the same statement could succeed once contention clears.
    #[must_use]
    pub fn is_transient(self) -> bool {
        matches!(self, Self::BusyOrLocked | Self::Pool)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BusyOrLocked => "busy_or_locked",
            Self::Constraint => "constraint",
            Self::Pool => "pool",
            Self::Decode => "decode",
            Self::Io => "io",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for IndexDbErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from the metadata index.
#[derive(Debug, Clone, Error)]
pub enum IndexError {
    #[error("index database error ({kind}): {message}")]
    Database {
        kind: IndexDbErrorKind,
        message: String,
    },

    /// No row (and no alias) exists for the identifier.
    #[error("no index entry for '{0}'")]
    NotFound(String),
}

impl From<sqlx::Error> for IndexError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database {
            kind: IndexDbErrorKind::from_sqlx(&err),
            message: err.to_string(),
        }
    }
}

impl IndexError {
    #[must_use]
    pub fn database_kind(&self) -> Option<IndexDbErrorKind> {
        match self {
            Self::Database { kind, .. } => Some(*kind),
            Self::NotFound(_) => None,
        }
    }

    /// Lock contention or pool exhaustion; the write may be retried later.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.database_kind().is_some_and(IndexDbErrorKind::is_transient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_timeout_is_transient() {
        let err = IndexError::from(sqlx::Error::PoolTimedOut);
        assert_eq!(err.database_kind(), Some(IndexDbErrorKind::Pool));
        assert!(err.is_transient());
        assert!(err.to_string().contains("(pool)"));
    }

    #[test]
    fn test_missing_row_is_not_a_database_error() {
        let err = IndexError::NotFound("PMC1".to_string());
        assert_eq!(err.database_kind(), None);
        assert!(!err.is_transient());
        assert!(err.to_string().contains("PMC1"));
    }

    #[test]
    fn test_unclassified_errors_are_permanent() {
        let err = IndexError::from(sqlx::Error::RowNotFound);
        assert_eq!(err.database_kind(), Some(IndexDbErrorKind::Other));
        assert!(!IndexDbErrorKind::Constraint.is_transient());
    }
}
