//! Store-level error type shared by every `DocumentStore` backend.

use may_postgres::Error as PostgresError;
use std::fmt;

/// Error raised by a document store backend
#[derive(Debug)]
pub enum StoreError {
    /// `PostgreSQL` error from `may_postgres`
    PostgresError(PostgresError),
    /// Statement or lookup failed inside the backend
    QueryError(String),
    /// Stored document could not be decoded
    ParseError(String),
    /// Session was already committed or aborted
    SessionClosed,
    /// Other backend errors
    Other(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::PostgresError(e) => {
                write!(f, "PostgreSQL error: {e}")
            }
            StoreError::QueryError(s) => {
                write!(f, "Query error: {s}")
            }
            StoreError::ParseError(s) => {
                write!(f, "Parse error: {s}")
            }
            StoreError::SessionClosed => {
                write!(f, "Session has already been committed or aborted")
            }
            StoreError::Other(s) => {
                write!(f, "Store error: {s}")
            }
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::PostgresError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<PostgresError> for StoreError {
    fn from(err: PostgresError) -> Self {
        StoreError::PostgresError(err)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::ParseError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        let err = StoreError::QueryError("boom".to_string());
        assert!(err.to_string().contains("Query error"));
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_store_error_all_variants() {
        assert!(StoreError::ParseError("x".into()).to_string().contains("Parse error"));
        assert!(StoreError::SessionClosed.to_string().contains("already been committed"));
        assert!(StoreError::Other("x".into()).to_string().contains("Store error"));
    }

    #[test]
    fn test_store_error_from_serde() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let store_err: StoreError = err.into();
        assert!(matches!(store_err, StoreError::ParseError(_)));
    }
}
