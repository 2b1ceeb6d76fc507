//! In-process `DocumentStore`.
//!
//! `MemoryStore` keeps every collection in memory behind a single
//! `parking_lot::RwLock`, which makes each operation atomic on its own. It is
//! used by the test suites and is a reasonable embedded store for small data
//! sets.
//!
//! Sessions keep an undo log. A write made in a session is applied at once
//! and visible to every reader; the session records how to reverse it.
//! `abort_session` replays the log backwards and touches nothing else, so
//! session-free writes and other sessions survive the abort. `commit_session`
//! drops the log.
//!
//! [`MemoryStore::fail_collection`] makes every data operation on one
//! collection fail, to exercise partial-failure paths of the cascade delete.

use crate::store::filter::{compare_for_sort, project, sort_key, Filter, FindOptions, Order, ID_FIELD};
use crate::store::{DocumentStore, JoinField, JoinFilter, JoinRecord, StoreError};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
struct Documents {
    rows: Vec<(String, Value)>,
    index: HashMap<String, usize>,
}

impl Documents {
    fn reindex(&mut self) {
        self.index = self
            .rows
            .iter()
            .enumerate()
            .map(|(pos, (id, _))| (id.clone(), pos))
            .collect();
    }
}

#[derive(Debug, Default)]
struct JoinTable {
    rows: Vec<JoinRecord>,
    pairs: HashMap<(String, String), usize>,
}

impl JoinTable {
    fn reindex(&mut self) {
        self.pairs = self
            .rows
            .iter()
            .enumerate()
            .map(|(pos, r)| ((r.parent_id.clone(), r.child_id.clone()), pos))
            .collect();
    }
}

#[derive(Debug, Default)]
struct State {
    documents: HashMap<String, Documents>,
    joins: HashMap<String, JoinTable>,
}

/// How to reverse one session write
#[derive(Debug)]
enum Undo {
    /// Document upserted; `previous` is its value before, `None` if it was inserted
    Document {
        collection: String,
        id: String,
        previous: Option<Value>,
    },
    /// Documents deleted, with their former positions in ascending order
    DocumentsDeleted {
        collection: String,
        rows: Vec<(usize, String, Value)>,
    },
    /// Edge upserted; `previous` is its `ModifiedOn` before, `None` if it was inserted
    Edge {
        collection: String,
        pair: (String, String),
        previous: Option<DateTime<Utc>>,
    },
    /// Edges deleted, with their former positions in ascending order
    EdgesDeleted {
        collection: String,
        rows: Vec<(usize, JoinRecord)>,
    },
}

impl Undo {
    fn revert(self, state: &mut State) {
        match self {
            Undo::Document {
                collection,
                id,
                previous,
            } => {
                let docs = state.documents.entry(collection).or_default();
                match (previous, docs.index.get(&id).copied()) {
                    (Some(value), Some(pos)) => docs.rows[pos].1 = value,
                    (Some(value), None) => {
                        docs.index.insert(id.clone(), docs.rows.len());
                        docs.rows.push((id, value));
                    }
                    (None, Some(pos)) => {
                        docs.rows.remove(pos);
                        docs.reindex();
                    }
                    (None, None) => {}
                }
            }
            Undo::DocumentsDeleted { collection, rows } => {
                let docs = state.documents.entry(collection).or_default();
                for (pos, id, value) in rows {
                    if docs.index.contains_key(&id) {
                        continue;
                    }
                    let at = pos.min(docs.rows.len());
                    docs.index.insert(id.clone(), at);
                    docs.rows.insert(at, (id, value));
                }
                docs.reindex();
            }
            Undo::Edge {
                collection,
                pair,
                previous,
            } => {
                let table = state.joins.entry(collection).or_default();
                match (previous, table.pairs.get(&pair).copied()) {
                    (Some(at), Some(pos)) => table.rows[pos].modified_on = at,
                    (None, Some(pos)) => {
                        table.rows.remove(pos);
                        table.reindex();
                    }
                    // removed meanwhile by someone else; leave it removed
                    (_, None) => {}
                }
            }
            Undo::EdgesDeleted { collection, rows } => {
                let table = state.joins.entry(collection).or_default();
                for (pos, record) in rows {
                    let pair = (record.parent_id.clone(), record.child_id.clone());
                    if table.pairs.contains_key(&pair) {
                        continue;
                    }
                    let at = pos.min(table.rows.len());
                    table.pairs.insert(pair, at);
                    table.rows.insert(at, record);
                }
                table.reindex();
            }
        }
    }
}

/// Undo entries collected by one write; only kept for session writes
struct UndoLog {
    enabled: bool,
    entries: Vec<Undo>,
}

impl UndoLog {
    fn record(&mut self, undo: impl FnOnce() -> Undo) {
        if self.enabled {
            self.entries.push(undo());
        }
    }
}

/// Session handle for [`MemoryStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemorySession {
    id: u64,
}

/// In-memory document store
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
    sessions: Mutex<HashMap<u64, Vec<Undo>>>,
    next_session: AtomicU64,
    failures: RwLock<HashSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every data operation on `collection` fail until [`clear_failures`](Self::clear_failures)
    pub fn fail_collection(&self, collection: impl Into<String>) {
        self.failures.write().insert(collection.into());
    }

    pub fn clear_failures(&self) {
        self.failures.write().clear();
    }

    /// Number of join records in `collection`, outside any session
    pub fn join_record_count(&self, collection: &str) -> usize {
        self.state
            .read()
            .joins
            .get(collection)
            .map_or(0, |table| table.rows.len())
    }

    fn check_failure(&self, collection: &str) -> Result<(), StoreError> {
        if self.failures.read().contains(collection) {
            return Err(StoreError::QueryError(format!(
                "injected failure on collection '{collection}'"
            )));
        }
        Ok(())
    }

    fn check(&self, session: Option<&MemorySession>, collection: &str) -> Result<(), StoreError> {
        if let Some(session) = session {
            if !self.sessions.lock().contains_key(&session.id) {
                return Err(StoreError::SessionClosed);
            }
        }
        self.check_failure(collection)
    }

    /// Apply `write` under the state lock, logging its undo entries to `session`
    ///
    /// Lock order is state, then sessions; `abort_session` never holds both.
    fn write<R>(
        &self,
        session: Option<&MemorySession>,
        collection: &str,
        write: impl FnOnce(&mut State, &mut UndoLog) -> R,
    ) -> Result<R, StoreError> {
        self.check_failure(collection)?;
        let mut state = self.state.write();
        let mut sessions = self.sessions.lock();
        let log = match session {
            Some(session) => Some(sessions.get_mut(&session.id).ok_or(StoreError::SessionClosed)?),
            None => None,
        };
        let mut undo = UndoLog {
            enabled: log.is_some(),
            entries: Vec::new(),
        };
        let result = write(&mut state, &mut undo);
        if let Some(log) = log {
            log.extend(undo.entries);
        }
        Ok(result)
    }
}

/// Filter with `In` over string values pre-hashed
enum DocMatcher<'f> {
    StringSet(&'f str, HashSet<&'f str>),
    General(&'f Filter),
}

impl<'f> DocMatcher<'f> {
    fn new(filter: &'f Filter) -> Self {
        if let Filter::In(field, values) = filter {
            let strings: Option<HashSet<&str>> = values.iter().map(Value::as_str).collect();
            if let (Some(set), false) = (strings, field.contains('.')) {
                return DocMatcher::StringSet(field.as_str(), set);
            }
        }
        DocMatcher::General(filter)
    }

    fn matches(&self, id: &str, doc: &Value) -> bool {
        match self {
            DocMatcher::StringSet(field, set) => {
                if *field == ID_FIELD {
                    set.contains(id)
                } else {
                    doc.get(*field)
                        .and_then(Value::as_str)
                        .is_some_and(|v| set.contains(v))
                }
            }
            DocMatcher::General(filter) => filter.matches(id, doc),
        }
    }
}

/// Join filter with ID sets pre-hashed
enum JoinMatcher<'f> {
    All,
    In(JoinField, HashSet<&'f str>),
    EitherIn(HashSet<&'f str>),
    Pairs(HashSet<(&'f str, &'f str)>),
    Eq(JoinField, &'f str),
}

impl<'f> JoinMatcher<'f> {
    fn new(filter: &'f JoinFilter) -> Self {
        match filter {
            JoinFilter::All => JoinMatcher::All,
            JoinFilter::Eq(field, id) => JoinMatcher::Eq(*field, id),
            JoinFilter::In(field, ids) => JoinMatcher::In(*field, ids.iter().map(String::as_str).collect()),
            JoinFilter::EitherIn(ids) => JoinMatcher::EitherIn(ids.iter().map(String::as_str).collect()),
            JoinFilter::Pairs(pairs) => JoinMatcher::Pairs(
                pairs.iter().map(|(p, c)| (p.as_str(), c.as_str())).collect(),
            ),
        }
    }

    fn matches(&self, record: &JoinRecord) -> bool {
        match self {
            JoinMatcher::All => true,
            JoinMatcher::Eq(field, id) => field.of(record) == *id,
            JoinMatcher::In(field, ids) => ids.contains(field.of(record)),
            JoinMatcher::EitherIn(ids) => {
                ids.contains(record.parent_id.as_str()) || ids.contains(record.child_id.as_str())
            }
            JoinMatcher::Pairs(pairs) => {
                pairs.contains(&(record.parent_id.as_str(), record.child_id.as_str()))
            }
        }
    }
}

impl DocumentStore for MemoryStore {
    type Session = MemorySession;

    fn begin_session(&self) -> Result<MemorySession, StoreError> {
        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        self.sessions.lock().insert(id, Vec::new());
        log::debug!("memory store: began session {id}");
        Ok(MemorySession { id })
    }

    fn commit_session(&self, session: MemorySession) -> Result<(), StoreError> {
        self.sessions
            .lock()
            .remove(&session.id)
            .map(|_| ())
            .ok_or(StoreError::SessionClosed)
    }

    fn abort_session(&self, session: MemorySession) -> Result<(), StoreError> {
        let log = self
            .sessions
            .lock()
            .remove(&session.id)
            .ok_or(StoreError::SessionClosed)?;
        let undone = log.len();
        let mut state = self.state.write();
        for undo in log.into_iter().rev() {
            undo.revert(&mut state);
        }
        log::debug!("memory store: aborted session {} ({undone} write(s) undone)", session.id);
        Ok(())
    }

    fn list_collection_names(&self, pattern: &Regex) -> Result<Vec<String>, StoreError> {
        let state = self.state.read();
        let mut names: Vec<String> = state
            .documents
            .keys()
            .chain(state.joins.keys())
            .filter(|name| pattern.is_match(name))
            .cloned()
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    fn upsert_document(
        &self,
        session: Option<&MemorySession>,
        collection: &str,
        id: &str,
        document: Value,
    ) -> Result<(), StoreError> {
        self.write(session, collection, |state, undo| {
            let docs = state.documents.entry(collection.to_string()).or_default();
            let previous = match docs.index.get(id) {
                Some(&pos) => Some(std::mem::replace(&mut docs.rows[pos].1, document)),
                None => {
                    docs.index.insert(id.to_string(), docs.rows.len());
                    docs.rows.push((id.to_string(), document));
                    None
                }
            };
            undo.record(|| Undo::Document {
                collection: collection.to_string(),
                id: id.to_string(),
                previous,
            });
        })
    }

    fn find_documents(
        &self,
        session: Option<&MemorySession>,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<Vec<(String, Value)>, StoreError> {
        self.check(session, collection)?;
        let state = self.state.read();
        let Some(docs) = state.documents.get(collection) else {
            return Ok(Vec::new());
        };
        let matcher = DocMatcher::new(filter);
        let mut found: Vec<(String, Value)> = docs
            .rows
            .iter()
            .filter(|(id, doc)| matcher.matches(id, doc))
            .cloned()
            .collect();
        drop(state);

        if let Some((field, order)) = &options.sort {
            found.sort_by(|(a_id, a), (b_id, b)| {
                let ord = compare_for_sort(
                    sort_key(a_id, a, field).as_ref(),
                    sort_key(b_id, b, field).as_ref(),
                );
                match order {
                    Order::Asc => ord,
                    Order::Desc => ord.reverse(),
                }
            });
        }

        let (skip, limit) = options.window();
        Ok(found
            .into_iter()
            .skip(skip)
            .take(limit)
            .map(|(id, doc)| match &options.projection {
                Some(fields) => (id, project(doc, fields)),
                None => (id, doc),
            })
            .collect())
    }

    fn count_documents(
        &self,
        session: Option<&MemorySession>,
        collection: &str,
        filter: &Filter,
    ) -> Result<u64, StoreError> {
        self.check(session, collection)?;
        let state = self.state.read();
        let matcher = DocMatcher::new(filter);
        Ok(state.documents.get(collection).map_or(0, |docs| {
            docs.rows.iter().filter(|(id, doc)| matcher.matches(id, doc)).count() as u64
        }))
    }

    fn delete_documents(
        &self,
        session: Option<&MemorySession>,
        collection: &str,
        filter: &Filter,
    ) -> Result<u64, StoreError> {
        self.write(session, collection, |state, undo| {
            let Some(docs) = state.documents.get_mut(collection) else {
                return 0;
            };
            let matcher = DocMatcher::new(filter);
            let mut kept = Vec::with_capacity(docs.rows.len());
            let mut removed = Vec::new();
            for (pos, (id, doc)) in std::mem::take(&mut docs.rows).into_iter().enumerate() {
                if matcher.matches(&id, &doc) {
                    removed.push((pos, id, doc));
                } else {
                    kept.push((id, doc));
                }
            }
            docs.rows = kept;
            let count = removed.len() as u64;
            if count > 0 {
                docs.reindex();
                undo.record(|| Undo::DocumentsDeleted {
                    collection: collection.to_string(),
                    rows: removed,
                });
            }
            count
        })
    }

    fn ensure_join_collection(&self, collection: &str) -> Result<(), StoreError> {
        self.state
            .write()
            .joins
            .entry(collection.to_string())
            .or_default();
        Ok(())
    }

    fn upsert_join_records(
        &self,
        session: Option<&MemorySession>,
        collection: &str,
        records: &[JoinRecord],
    ) -> Result<u64, StoreError> {
        self.write(session, collection, |state, undo| {
            let table = state.joins.entry(collection.to_string()).or_default();
            for record in records {
                let pair = (record.parent_id.clone(), record.child_id.clone());
                let previous = match table.pairs.get(&pair) {
                    Some(&pos) => Some(std::mem::replace(
                        &mut table.rows[pos].modified_on,
                        record.modified_on,
                    )),
                    None => {
                        table.pairs.insert(pair.clone(), table.rows.len());
                        table.rows.push(record.clone());
                        None
                    }
                };
                undo.record(|| Undo::Edge {
                    collection: collection.to_string(),
                    pair,
                    previous,
                });
            }
            records.len() as u64
        })
    }

    fn find_join_records(
        &self,
        session: Option<&MemorySession>,
        collection: &str,
        filter: &JoinFilter,
    ) -> Result<Vec<JoinRecord>, StoreError> {
        self.check(session, collection)?;
        let state = self.state.read();
        let matcher = JoinMatcher::new(filter);
        Ok(state.joins.get(collection).map_or_else(Vec::new, |table| {
            table.rows.iter().filter(|r| matcher.matches(r)).cloned().collect()
        }))
    }

    fn count_join_records(
        &self,
        session: Option<&MemorySession>,
        collection: &str,
        filter: &JoinFilter,
    ) -> Result<u64, StoreError> {
        self.check(session, collection)?;
        let state = self.state.read();
        let matcher = JoinMatcher::new(filter);
        Ok(state.joins.get(collection).map_or(0, |table| {
            table.rows.iter().filter(|r| matcher.matches(r)).count() as u64
        }))
    }

    fn delete_join_records(
        &self,
        session: Option<&MemorySession>,
        collection: &str,
        filter: &JoinFilter,
    ) -> Result<u64, StoreError> {
        self.write(session, collection, |state, undo| {
            let Some(table) = state.joins.get_mut(collection) else {
                return 0;
            };
            let matcher = JoinMatcher::new(filter);
            let mut kept = Vec::with_capacity(table.rows.len());
            let mut removed = Vec::new();
            for (pos, record) in std::mem::take(&mut table.rows).into_iter().enumerate() {
                if matcher.matches(&record) {
                    removed.push((pos, record));
                } else {
                    kept.push(record);
                }
            }
            table.rows = kept;
            let count = removed.len() as u64;
            if count > 0 {
                table.reindex();
                undo.record(|| Undo::EdgesDeleted {
                    collection: collection.to_string(),
                    rows: removed,
                });
            }
            count
        })
    }
}
