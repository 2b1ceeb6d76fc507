//! PostgreSQL transactions backing `PgStore` sessions.
//!
//! A [`Transaction`] owns a dedicated `may_postgres::Client`: a session must
//! not share its connection with autocommit traffic, otherwise `BEGIN` would
//! leak into unrelated statements pipelined on the same connection.

use crate::executor::{instrumented, SqlExecutor};
use crate::store::StoreError;
use may_postgres::types::ToSql;
use may_postgres::{Client, Error as PostgresError, Row};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

/// Transaction isolation level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Read committed (default)
    #[default]
    ReadCommitted,
    /// Repeatable read
    RepeatableRead,
    /// Serializable
    Serializable,
}

impl IsolationLevel {
    /// Convert to PostgreSQL SQL syntax
    fn to_sql(self) -> &'static str {
        match self {
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

/// Transaction error type
#[derive(Debug)]
pub enum TransactionError {
    /// PostgreSQL error from may_postgres
    PostgresError(PostgresError),
    /// Transaction already committed or rolled back
    TransactionClosed,
    /// Other transaction errors
    Other(String),
}

impl fmt::Display for TransactionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionError::PostgresError(e) => {
                write!(f, "PostgreSQL error: {}", e)
            }
            TransactionError::TransactionClosed => {
                write!(f, "Transaction has already been committed or rolled back")
            }
            TransactionError::Other(s) => {
                write!(f, "Transaction error: {}", s)
            }
        }
    }
}

impl std::error::Error for TransactionError {}

impl From<PostgresError> for TransactionError {
    fn from(err: PostgresError) -> Self {
        TransactionError::PostgresError(err)
    }
}

impl From<TransactionError> for StoreError {
    fn from(err: TransactionError) -> Self {
        match err {
            TransactionError::PostgresError(e) => StoreError::PostgresError(e),
            TransactionError::TransactionClosed => StoreError::SessionClosed,
            TransactionError::Other(s) => StoreError::Other(s),
        }
    }
}

/// A database transaction on its own connection
///
/// Commit and rollback take `&self` so a transaction can be shared behind an
/// `Arc` by every clone of a session; the first of them closes it.
pub struct Transaction {
    client: Client,
    closed: AtomicBool,
}

impl Transaction {
    /// Start a transaction on `client` with the given isolation level
    ///
    /// # Errors
    ///
    /// Returns `TransactionError` if `BEGIN` fails.
    pub fn begin(client: Client, isolation_level: IsolationLevel) -> Result<Self, TransactionError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::begin_session_span().entered();

        client
            .execute("BEGIN", &[])
            .map_err(TransactionError::from)?;

        if isolation_level != IsolationLevel::ReadCommitted {
            let isolation_sql = format!(
                "SET TRANSACTION ISOLATION LEVEL {}",
                isolation_level.to_sql()
            );
            client
                .execute(isolation_sql.as_str(), &[])
                .map_err(TransactionError::from)?;
        }

        Ok(Self {
            client,
            closed: AtomicBool::new(false),
        })
    }

    /// Commit the transaction
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction has already been closed or `COMMIT` fails.
    pub fn commit(&self) -> Result<(), TransactionError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(TransactionError::TransactionClosed);
        }

        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::commit_session_span().entered();

        self.client
            .execute("COMMIT", &[])
            .map_err(TransactionError::from)?;
        Ok(())
    }

    /// Roll the transaction back
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction has already been closed or `ROLLBACK` fails.
    pub fn rollback(&self) -> Result<(), TransactionError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(TransactionError::TransactionClosed);
        }

        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::abort_session_span().entered();

        self.client
            .execute("ROLLBACK", &[])
            .map_err(TransactionError::from)?;
        Ok(())
    }

    /// Check if the transaction is closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl SqlExecutor for Transaction {
    fn execute(&self, query: &str, params: &[&dyn ToSql]) -> Result<u64, StoreError> {
        if self.is_closed() {
            return Err(StoreError::SessionClosed);
        }
        instrumented(query, || self.client.execute(query, params))
    }

    fn query_one(&self, query: &str, params: &[&dyn ToSql]) -> Result<Row, StoreError> {
        if self.is_closed() {
            return Err(StoreError::SessionClosed);
        }
        instrumented(query, || self.client.query_one(query, params))
    }

    fn query_all(&self, query: &str, params: &[&dyn ToSql]) -> Result<Vec<Row>, StoreError> {
        if self.is_closed() {
            return Err(StoreError::SessionClosed);
        }
        instrumented(query, || self.client.query(query, params))
    }
}
