//! Error types for the session store.
//!
//! [`StoreError`] is the primary error type returned by all store
//! operations. Reads signal absence with `Option`, never an error; the
//! `NotFound` variant covers operations that require an existing row
//! (appending to a missing session, for example).
//!
//! Only the `Connection` and `PoolExhausted` classes are transient and
//! safe to retry; everything else propagates unchanged to the caller.

use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A row this operation requires is absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Primary-key collision on create/append.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// The backend's existing layout matches neither known schema version.
    /// Fatal for that backend instance.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Transient connection failure (I/O, TLS, protocol, closed pool).
    #[error("connection failure: {0}")]
    Connection(String),

    /// No pooled connection became available within the acquire timeout.
    #[error("pool exhausted: {0}")]
    PoolExhausted(String),

    /// A payload could not be encoded or decoded. Fatal for that single
    /// row, harmless to unrelated operations.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Foreign-key or other constraint failure surfaced by the backend.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// Uncategorized backend error.
    #[error("database error: {0}")]
    Database(String),

    /// Invalid connection URL or options.
    #[error("configuration error: {0}")]
    Config(String),
}

impl StoreError {
    /// Whether this error class is safe to retry with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::PoolExhausted(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        use sqlx::error::ErrorKind;
        match e {
            sqlx::Error::PoolTimedOut => {
                Self::PoolExhausted("timed out waiting for a pooled connection".into())
            }
            sqlx::Error::PoolClosed => Self::Connection("connection pool is closed".into()),
            sqlx::Error::WorkerCrashed => Self::Connection("database worker crashed".into()),
            sqlx::Error::Io(err) => Self::Connection(err.to_string()),
            sqlx::Error::Tls(err) => Self::Connection(err.to_string()),
            sqlx::Error::Protocol(msg) => Self::Connection(msg),
            sqlx::Error::Configuration(err) => Self::Config(err.to_string()),
            sqlx::Error::ColumnDecode { index, source } => {
                Self::Serialization(format!("column {index}: {source}"))
            }
            sqlx::Error::Decode(err) => Self::Serialization(err.to_string()),
            sqlx::Error::Database(db) => match db.kind() {
                ErrorKind::UniqueViolation => Self::DuplicateKey(db.message().to_string()),
                ErrorKind::ForeignKeyViolation
                | ErrorKind::NotNullViolation
                | ErrorKind::CheckViolation => {
                    Self::ConstraintViolation(db.message().to_string())
                }
                _ => Self::Database(db.to_string()),
            },
            other => Self::Database(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Convenience type alias for store results.
pub type Result<T> = std::result::Result<T, StoreError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display() {
        let err = StoreError::NotFound("session sess-1".into());
        assert_eq!(err.to_string(), "not found: session sess-1");
    }

    #[test]
    fn schema_mismatch_display() {
        let err = StoreError::SchemaMismatch("unknown event columns".into());
        assert_eq!(err.to_string(), "schema mismatch: unknown event columns");
    }

    #[test]
    fn transient_classes() {
        assert!(StoreError::Connection("reset".into()).is_transient());
        assert!(StoreError::PoolExhausted("timeout".into()).is_transient());
        assert!(!StoreError::DuplicateKey("pk".into()).is_transient());
        assert!(!StoreError::NotFound("x".into()).is_transient());
        assert!(!StoreError::SchemaMismatch("y".into()).is_transient());
    }

    #[test]
    fn pool_timeout_maps_to_exhausted() {
        let err: StoreError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, StoreError::PoolExhausted(_)));
    }

    #[test]
    fn pool_closed_maps_to_connection() {
        let err: StoreError = sqlx::Error::PoolClosed.into();
        assert!(matches!(err, StoreError::Connection(_)));
    }

    #[test]
    fn from_serde_error() {
        let serde_err = serde_json::from_str::<String>("not json").unwrap_err();
        let err: StoreError = serde_err.into();
        assert!(matches!(err, StoreError::Serialization(_)));
    }

    #[test]
    fn result_alias() {
        fn example() -> Result<u32> {
            Ok(7)
        }
        assert_eq!(example().unwrap(), 7);
    }
}
