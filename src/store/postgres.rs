//! PostgreSQL document store over `may_postgres`.
//!
//! Documents live in JSONB columns and join records in typed tables, one
//! table per collection. Tables are created lazily: the first upsert into a
//! collection creates it, and reads against a collection that does not exist
//! return nothing instead of failing.
//!
//! Session-free calls share one autocommit connection. Every session opens a
//! dedicated connection and runs on it inside `BEGIN ... COMMIT`. Schema
//! statements always run on the autocommit connection, so a collection created
//! during an aborted session survives, empty.
//!
//! A store built with [`PgStore::from_config`] holds at most
//! `max_connections` connections: the autocommit one plus one per open
//! session. `begin_session` waits up to `pool_timeout_seconds` for a session
//! connection to come free. A session's slot is released when its last clone
//! is dropped, which is also when its connection closes.

use crate::config::DatabaseConfig;
use crate::connection::connect;
use crate::executor::{MayPostgresExecutor, SqlExecutor};
use crate::store::filter::{Filter, FindOptions};
use crate::store::sql::{self, Statement, MAX_IDENTIFIER_LEN};
use crate::store::{DocumentStore, JoinFilter, JoinRecord, StoreError};
use crate::transaction::{IsolationLevel, Transaction};
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, Sender};
use may_postgres::Row;
use parking_lot::RwLock;
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// SQLSTATEs a concurrent `CREATE ... IF NOT EXISTS` fails with when another
/// connection created the same table or index first
const ALREADY_CREATED_STATES: [&str; 2] = ["23505", "42P07"];

/// A transaction on its own connection; clones share it
#[derive(Clone)]
pub struct PgSession {
    tx: Arc<Transaction>,
    _slot: Option<Arc<SessionSlot>>,
}

impl PgSession {
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Session connection slots, one token per free slot
struct SessionSlots {
    free: Receiver<()>,
    release: Sender<()>,
    wait: Duration,
}

impl SessionSlots {
    fn new(slots: usize, wait: Duration) -> Self {
        let (release, free) = bounded(slots);
        for _ in 0..slots {
            // capacity is exactly `slots`, so this never blocks
            let _ = release.send(());
        }
        Self { free, release, wait }
    }

    fn acquire(&self) -> Result<SessionSlot, StoreError> {
        self.free.recv_timeout(self.wait).map_err(|_| {
            StoreError::Other(format!(
                "no session connection came free within {}s",
                self.wait.as_secs_f64()
            ))
        })?;
        Ok(SessionSlot {
            release: self.release.clone(),
        })
    }
}

/// Held by a session for the life of its connection
struct SessionSlot {
    release: Sender<()>,
}

impl Drop for SessionSlot {
    fn drop(&mut self) {
        let _ = self.release.try_send(());
    }
}

pub struct PgStore {
    url: String,
    executor: MayPostgresExecutor,
    isolation: IsolationLevel,
    known_tables: RwLock<HashSet<String>>,
    slots: Option<SessionSlots>,
}

impl PgStore {
    /// Connect the autocommit executor to `url`
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the connection string is invalid or the server
    /// cannot be reached.
    pub fn connect(url: &str) -> Result<Self, StoreError> {
        let client = connect(url)?;
        Ok(Self {
            url: url.to_string(),
            executor: MayPostgresExecutor::new(client),
            isolation: IsolationLevel::default(),
            known_tables: RwLock::new(HashSet::new()),
            slots: None,
        })
    }

    /// Connect to `config.url`, bounding sessions by `max_connections`
    ///
    /// One connection is the autocommit executor, so at most
    /// `max_connections - 1` sessions are open at once. `begin_session` waits
    /// `pool_timeout_seconds` for a free one before failing.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Other` if `max_connections` leaves no room for a
    /// session, and otherwise fails like [`PgStore::connect`].
    pub fn from_config(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let sessions = session_capacity(config.max_connections)?;
        let mut store = Self::connect(&config.url)?;
        store.slots = Some(SessionSlots::new(
            sessions,
            Duration::from_secs(config.pool_timeout_seconds),
        ));
        log::debug!(
            "postgres store: up to {sessions} session connection(s), {}s wait",
            config.pool_timeout_seconds
        );
        Ok(store)
    }

    /// Isolation level for sessions started after this call
    pub fn with_isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = isolation;
        self
    }

    pub fn executor(&self) -> &MayPostgresExecutor {
        &self.executor
    }

    /// Create a document collection ahead of its first write
    pub fn ensure_document_collection(&self, collection: &str) -> Result<(), StoreError> {
        check_table_name(collection)?;
        if self.known_tables.read().contains(collection) {
            return Ok(());
        }
        self.run_ddl(&sql::create_document_table(collection))?;
        self.known_tables.write().insert(collection.to_string());
        Ok(())
    }

    /// Run a `CREATE ... IF NOT EXISTS` on the autocommit connection
    fn run_ddl(&self, ddl: &str) -> Result<(), StoreError> {
        match self.executor.execute(ddl, &[]) {
            Ok(_) => Ok(()),
            Err(err) if is_already_created(&err) => {
                log::debug!("postgres store: lost a concurrent create, object exists: {err}");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn executor_for<'a>(&'a self, session: Option<&'a PgSession>) -> &'a dyn SqlExecutor {
        match session {
            Some(session) => session.tx.as_ref(),
            None => &self.executor,
        }
    }

    fn table_exists(&self, collection: &str) -> Result<bool, StoreError> {
        if self.known_tables.read().contains(collection) {
            return Ok(true);
        }
        let row = self.executor.query_one(sql::TABLE_EXISTS, &[&collection])?;
        let exists: bool = row
            .try_get(0)
            .map_err(|e| StoreError::ParseError(e.to_string()))?;
        if exists {
            self.known_tables.write().insert(collection.to_string());
        }
        Ok(exists)
    }

    fn run_execute(&self, session: Option<&PgSession>, stmt: &Statement) -> Result<u64, StoreError> {
        self.executor_for(session).execute(&stmt.sql, &stmt.param_refs())
    }

    fn run_query(&self, session: Option<&PgSession>, stmt: &Statement) -> Result<Vec<Row>, StoreError> {
        self.executor_for(session).query_all(&stmt.sql, &stmt.param_refs())
    }

    fn run_count(&self, session: Option<&PgSession>, stmt: &Statement) -> Result<u64, StoreError> {
        let row = self
            .executor_for(session)
            .query_one(&stmt.sql, &stmt.param_refs())?;
        let count: i64 = row
            .try_get(0)
            .map_err(|e| StoreError::ParseError(e.to_string()))?;
        Ok(count.max(0) as u64)
    }
}

fn session_capacity(max_connections: i32) -> Result<usize, StoreError> {
    match usize::try_from(max_connections) {
        Ok(max) if max >= 2 => Ok(max - 1),
        _ => Err(StoreError::Other(format!(
            "max_connections = {max_connections} leaves no connection for sessions; it must be at least 2"
        ))),
    }
}

fn is_already_created(err: &StoreError) -> bool {
    match err {
        StoreError::PostgresError(e) => e
            .code()
            .is_some_and(|state| is_already_created_state(state.code())),
        _ => false,
    }
}

fn is_already_created_state(code: &str) -> bool {
    ALREADY_CREATED_STATES.contains(&code)
}

fn check_table_name(collection: &str) -> Result<(), StoreError> {
    if collection.is_empty() {
        return Err(StoreError::QueryError("collection name is empty".to_string()));
    }
    if collection.len() > MAX_IDENTIFIER_LEN {
        return Err(StoreError::QueryError(format!(
            "collection name `{collection}` exceeds {MAX_IDENTIFIER_LEN} bytes"
        )));
    }
    Ok(())
}

fn decode_document(row: &Row) -> Result<(String, Value), StoreError> {
    let id: String = row
        .try_get(0)
        .map_err(|e| StoreError::ParseError(e.to_string()))?;
    let doc: Value = row
        .try_get(1)
        .map_err(|e| StoreError::ParseError(e.to_string()))?;
    Ok((id, doc))
}

fn decode_join_record(row: &Row) -> Result<JoinRecord, StoreError> {
    let parse = |e: may_postgres::Error| StoreError::ParseError(e.to_string());
    let modified_on: DateTime<Utc> = row.try_get(3).map_err(parse)?;
    Ok(JoinRecord {
        id: row.try_get(0).map_err(parse)?,
        parent_id: row.try_get(1).map_err(parse)?,
        child_id: row.try_get(2).map_err(parse)?,
        modified_on,
    })
}

impl DocumentStore for PgStore {
    type Session = PgSession;

    fn begin_session(&self) -> Result<PgSession, StoreError> {
        let slot = self.slots.as_ref().map(SessionSlots::acquire).transpose()?;
        let client = connect(&self.url)?;
        let tx = Transaction::begin(client, self.isolation)?;
        Ok(PgSession {
            tx: Arc::new(tx),
            _slot: slot.map(Arc::new),
        })
    }

    fn commit_session(&self, session: PgSession) -> Result<(), StoreError> {
        session.tx.commit().map_err(StoreError::from)
    }

    fn abort_session(&self, session: PgSession) -> Result<(), StoreError> {
        session.tx.rollback().map_err(StoreError::from)
    }

    fn list_collection_names(&self, pattern: &Regex) -> Result<Vec<String>, StoreError> {
        let rows = self.executor.query_all(sql::LIST_TABLES, &[])?;
        let mut names = Vec::new();
        for row in rows {
            let name: String = row
                .try_get(0)
                .map_err(|e| StoreError::ParseError(e.to_string()))?;
            if pattern.is_match(&name) {
                names.push(name);
            }
        }
        Ok(names)
    }

    fn upsert_document(
        &self,
        session: Option<&PgSession>,
        collection: &str,
        id: &str,
        document: Value,
    ) -> Result<(), StoreError> {
        self.ensure_document_collection(collection)?;
        let stmt = sql::upsert_document(collection, id, document);
        self.run_execute(session, &stmt).map(|_| ())
    }

    fn find_documents(
        &self,
        session: Option<&PgSession>,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<Vec<(String, Value)>, StoreError> {
        if !self.table_exists(collection)? {
            return Ok(Vec::new());
        }
        let stmt = sql::select_documents(collection, filter, options);
        self.run_query(session, &stmt)?
            .iter()
            .map(decode_document)
            .collect()
    }

    fn count_documents(
        &self,
        session: Option<&PgSession>,
        collection: &str,
        filter: &Filter,
    ) -> Result<u64, StoreError> {
        if !self.table_exists(collection)? {
            return Ok(0);
        }
        self.run_count(session, &sql::count_documents(collection, filter))
    }

    fn delete_documents(
        &self,
        session: Option<&PgSession>,
        collection: &str,
        filter: &Filter,
    ) -> Result<u64, StoreError> {
        if !self.table_exists(collection)? {
            return Ok(0);
        }
        self.run_execute(session, &sql::delete_documents(collection, filter))
    }

    fn ensure_join_collection(&self, collection: &str) -> Result<(), StoreError> {
        check_table_name(collection)?;
        if self.known_tables.read().contains(collection) {
            return Ok(());
        }
        self.run_ddl(&sql::create_join_table(collection))?;
        self.run_ddl(&sql::create_pair_index(collection))?;
        self.run_ddl(&sql::create_child_index(collection))?;
        log::debug!("ensured join collection {collection}");
        self.known_tables.write().insert(collection.to_string());
        Ok(())
    }

    fn upsert_join_records(
        &self,
        session: Option<&PgSession>,
        collection: &str,
        records: &[JoinRecord],
    ) -> Result<u64, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }
        self.ensure_join_collection(collection)?;
        self.run_execute(session, &sql::upsert_join_records(collection, records))
    }

    fn find_join_records(
        &self,
        session: Option<&PgSession>,
        collection: &str,
        filter: &JoinFilter,
    ) -> Result<Vec<JoinRecord>, StoreError> {
        if !self.table_exists(collection)? {
            return Ok(Vec::new());
        }
        self.run_query(session, &sql::select_join_records(collection, filter))?
            .iter()
            .map(decode_join_record)
            .collect()
    }

    fn count_join_records(
        &self,
        session: Option<&PgSession>,
        collection: &str,
        filter: &JoinFilter,
    ) -> Result<u64, StoreError> {
        if !self.table_exists(collection)? {
            return Ok(0);
        }
        self.run_count(session, &sql::count_join_records(collection, filter))
    }

    fn delete_join_records(
        &self,
        session: Option<&PgSession>,
        collection: &str,
        filter: &JoinFilter,
    ) -> Result<u64, StoreError> {
        if !self.table_exists(collection)? {
            return Ok(0);
        }
        self.run_execute(session, &sql::delete_join_records(collection, filter))
    }
}
